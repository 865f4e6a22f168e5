//! User-facing notifications and the broadcast bus that carries them.
//!
//! [`NotificationBus`] wraps a `tokio::sync::broadcast` channel. It is
//! designed to be shared via `Arc<NotificationBus>` between the sync
//! core (publisher) and any number of UI consumers (subscribers).

use briefing_core::Timestamp;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// Which error channel a notification belongs to. Job and connection
/// problems are reported independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Job,
    Connection,
}

/// How insistently the UI should present a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    /// Transient; may be auto-dismissed.
    Dismissible,
    /// Stays until the condition clears.
    Persistent,
    /// Must be acknowledged by the user.
    Blocking,
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A processing run finished successfully.
    JobCompleted,
    /// The backend reported a failed run.
    JobFailed,
    /// A start/stop/status request to the backend failed.
    RequestFailed,
    /// The live connection dropped; updates may be delayed.
    ConnectionDegraded,
    /// The live connection came back; clears `ConnectionDegraded`.
    ConnectionRestored,
    /// Reconnect attempts are exhausted.
    RealtimeUnavailable,
}

impl NotificationKind {
    pub fn urgency(self) -> Urgency {
        match self {
            Self::JobCompleted | Self::ConnectionDegraded | Self::ConnectionRestored => {
                Urgency::Dismissible
            }
            Self::RealtimeUnavailable => Urgency::Persistent,
            Self::JobFailed | Self::RequestFailed => Urgency::Blocking,
        }
    }

    pub fn channel(self) -> NotificationChannel {
        match self {
            Self::JobCompleted | Self::JobFailed | Self::RequestFailed => NotificationChannel::Job,
            Self::ConnectionDegraded | Self::ConnectionRestored | Self::RealtimeUnavailable => {
                NotificationChannel::Connection
            }
        }
    }
}

/// A user-facing alert.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub urgency: Urgency,
    pub channel: NotificationChannel,
    pub message: String,
    pub timestamp: Timestamp,
}

impl Notification {
    /// Create a notification; urgency and channel follow from `kind`.
    pub fn new(kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            urgency: kind.urgency(),
            channel: kind.channel(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn job_completed() -> Self {
        Self::new(NotificationKind::JobCompleted, "Processing completed")
    }

    pub fn job_failed(error: &str) -> Self {
        Self::new(
            NotificationKind::JobFailed,
            format!("Processing failed: {error}"),
        )
    }

    pub fn request_failed(action: &str, error: &str) -> Self {
        Self::new(
            NotificationKind::RequestFailed,
            format!("Failed to {action}: {error}"),
        )
    }

    pub fn connection_degraded() -> Self {
        Self::new(
            NotificationKind::ConnectionDegraded,
            "Real-time updates degraded, reconnecting",
        )
    }

    pub fn connection_restored() -> Self {
        Self::new(
            NotificationKind::ConnectionRestored,
            "Real-time updates restored",
        )
    }

    pub fn realtime_unavailable(attempts: u32) -> Self {
        Self::new(
            NotificationKind::RealtimeUnavailable,
            format!("Real-time updates unavailable after {attempts} reconnect attempts"),
        )
    }
}

// ---------------------------------------------------------------------------
// NotificationBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// In-process fan-out of [`Notification`]s.
///
/// # Usage
///
/// ```rust
/// use briefing_events::bus::{Notification, NotificationBus};
///
/// let bus = NotificationBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(Notification::job_completed());
/// ```
pub struct NotificationBus {
    sender: broadcast::Sender<Notification>,
}

impl NotificationBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest undelivered notifications are
    /// dropped and slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped silently when nobody
    /// is listening.
    pub fn publish(&self, notification: Notification) {
        tracing::debug!(
            kind = ?notification.kind,
            urgency = ?notification.urgency,
            message = %notification.message,
            "Notification",
        );
        // A SendError only means there are zero receivers.
        let _ = self.sender.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
