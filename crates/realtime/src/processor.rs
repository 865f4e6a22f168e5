//! Inbound event handling.
//!
//! [`EventClassifier`] applies each decoded [`InboundEvent`] to the
//! [`JobStore`] and raises job notifications. [`ConnectionNotifier`]
//! does the same for connection-level transitions. The two never feed
//! into each other: a dropped connection is not a failed job.

use std::sync::Arc;

use briefing_core::{JobStatus, Outcome, Timestamp};
use briefing_events::{Notification, NotificationBus};

use crate::messages::InboundEvent;
use crate::store::JobStore;

/// Maps inbound events to state transitions and job notifications.
pub struct EventClassifier {
    store: JobStore,
    bus: Arc<NotificationBus>,
    /// Terminal occurrence already announced, keyed by run start time.
    notified: Option<(JobStatus, Option<Timestamp>)>,
}

impl EventClassifier {
    pub fn new(store: JobStore, bus: Arc<NotificationBus>) -> Self {
        Self {
            store,
            bus,
            notified: None,
        }
    }

    /// Apply one event. Updates never notify; `processing_complete` and
    /// `processing_error` notify once per run.
    pub fn handle(&mut self, event: &InboundEvent) -> Outcome {
        match event {
            InboundEvent::StatusUpdate(delta) | InboundEvent::ProcessingUpdate(delta) => {
                let outcome = self.store.apply_update(delta);
                if outcome.is_ignored() {
                    tracing::debug!(kind = ?event.kind(), "Late update for a finished run dropped");
                }
                outcome
            }
            InboundEvent::ProcessingComplete(delta) => {
                let outcome = self.store.complete(Some(delta));
                self.notify_terminal(JobStatus::Completed);
                outcome
            }
            InboundEvent::ProcessingError(payload) => {
                let outcome = self
                    .store
                    .fail(payload.state.as_ref(), payload.error.as_deref());
                self.notify_terminal(JobStatus::Error);
                outcome
            }
            InboundEvent::Pong => {
                tracing::trace!("Heartbeat answered");
                Outcome::Unchanged
            }
        }
    }

    /// Forget the announced occurrence. Called when a new run is started
    /// locally.
    pub fn clear(&mut self) {
        self.notified = None;
    }

    fn notify_terminal(&mut self, expected: JobStatus) {
        let state = self.store.state();
        if state.status != expected {
            return;
        }
        let key = (state.status, state.start_time);
        if self.notified == Some(key) {
            return;
        }
        self.notified = Some(key);

        let notification = match expected {
            JobStatus::Error => Notification::job_failed(
                state
                    .error_message
                    .as_deref()
                    .unwrap_or(briefing_core::job::GENERIC_FAILURE_MESSAGE),
            ),
            _ => Notification::job_completed(),
        };
        self.bus.publish(notification);
    }
}

/// Raises connection notifications: degraded once per outage, restored
/// when it ends, unavailable once retries run out.
#[derive(Debug, Default)]
pub struct ConnectionNotifier {
    degraded: bool,
    unavailable: bool,
}

impl ConnectionNotifier {
    pub fn on_connected(&mut self, bus: &NotificationBus) {
        if self.degraded || self.unavailable {
            bus.publish(Notification::connection_restored());
        }
        self.degraded = false;
        self.unavailable = false;
    }

    /// The connection dropped or an attempt failed without an explicit
    /// disconnect.
    pub fn on_lost(&mut self, bus: &NotificationBus) {
        if !self.degraded {
            self.degraded = true;
            bus.publish(Notification::connection_degraded());
        }
    }

    pub fn on_exhausted(&mut self, bus: &NotificationBus, attempts: u32) {
        if !self.unavailable {
            self.unavailable = true;
            bus.publish(Notification::realtime_unavailable(attempts));
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}
