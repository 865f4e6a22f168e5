//! Shared data model for the processing-status sync core.
//!
//! - [`job`] -- the processing-run record ([`JobState`]), its partial
//!   update form ([`JobDelta`]) and the state-machine transitions that
//!   keep the two consistent.
//! - [`timestamp`] -- UTC timestamps and the lenient serde helpers used
//!   for backend-provided times.
//! - [`error`] -- [`CoreError`].

pub mod error;
pub mod job;
pub mod timestamp;

pub use error::CoreError;
pub use job::{JobDelta, JobState, JobStatus, LogEntry, LogLevel, Outcome};
pub use timestamp::Timestamp;
