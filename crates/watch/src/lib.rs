//! Headless watcher for the briefing backend's processing runs.
//!
//! - [`render`] -- one-line summaries of job state and notifications.
//! - [`trigger`] -- optional start request read from the environment.

pub mod render;
pub mod trigger;
