//! Fan-out plumbing for the processing-status sync core.
//!
//! - [`SubscriberRegistry`] -- synchronous observer list that hands every
//!   inbound message to every registered callback, isolating callbacks
//!   from each other's panics.
//! - [`NotificationBus`] -- user-facing [`Notification`]s broadcast over
//!   `tokio::sync::broadcast`.

pub mod bus;
pub mod registry;

pub use bus::{Notification, NotificationBus, NotificationChannel, NotificationKind, Urgency};
pub use registry::{SubscriberRegistry, SubscriptionId};
