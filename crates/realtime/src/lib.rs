//! Real-time processing-status synchronization.
//!
//! Keeps a local view of the backend's processing run in step with the
//! server by combining a streamed WebSocket feed of deltas with
//! request/response snapshots:
//!
//! - [`client`] -- transport seam ([`Connector`](client::Connector) /
//!   [`Transport`](client::Transport)) and its WebSocket implementation.
//! - [`reconnect`] -- bounded, cancellable retry policy.
//! - [`messages`] -- typed inbound events and the frame parser.
//! - [`store`] -- the published [`JobState`](briefing_core::JobState).
//! - [`processor`] -- turns inbound events into state transitions and
//!   user notifications.
//! - [`api`] -- REST collaborator for snapshots and start/stop.
//! - [`manager`] -- [`ProcessingSync`](manager::ProcessingSync), the
//!   facade the rest of the application talks to.

pub mod api;
pub mod client;
pub mod config;
pub mod manager;
pub mod messages;
pub mod processor;
pub mod reconnect;
pub mod store;

pub use config::SyncConfig;
pub use manager::{ProcessingSync, SyncError};
