//! Published job state.
//!
//! [`JobStore`] owns the single [`JobState`] of the session and publishes
//! every change through a `tokio::sync::watch` channel. All writes go
//! through the transition methods of [`JobState`]; consumers only read.

use std::sync::Arc;

use briefing_core::{CoreError, JobDelta, JobState, JobStatus, Outcome, Timestamp};
use chrono::Utc;
use tokio::sync::watch;

/// Shared handle to the job state. Cloning is cheap; clones see the same
/// state.
#[derive(Clone)]
pub struct JobStore {
    tx: Arc<watch::Sender<JobState>>,
    log_window: usize,
}

impl JobStore {
    pub fn new(log_window: usize) -> Self {
        let (tx, _) = watch::channel(JobState::default());
        Self {
            tx: Arc::new(tx),
            log_window,
        }
    }

    /// Current state.
    pub fn state(&self) -> JobState {
        self.tx.borrow().clone()
    }

    /// Receiver notified on every change. Unchanged or ignored inputs do
    /// not wake it.
    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.tx.subscribe()
    }

    /// Optimistic local start. Returns the state it replaced, for
    /// [`rollback_start`](Self::rollback_start).
    pub fn begin_run(&self) -> Result<(Timestamp, JobState), CoreError> {
        let now = Utc::now();
        let mut result = Ok(JobState::default());
        self.tx.send_if_modified(|state| {
            let previous = state.clone();
            match state.begin_run(now) {
                Ok(outcome) => {
                    log_transition("start", &outcome);
                    result = Ok(previous);
                    true
                }
                Err(e) => {
                    result = Err(e);
                    false
                }
            }
        });
        result.map(|previous| (now, previous))
    }

    /// Undo an optimistic start whose request failed. Only rolls back if
    /// nothing has touched the state since; returns whether it did.
    pub fn rollback_start(&self, started_at: Timestamp, previous: JobState) -> bool {
        self.tx.send_if_modified(|state| {
            let untouched = *state
                == JobState {
                    status: JobStatus::Running,
                    start_time: Some(started_at),
                    ..JobState::default()
                };
            if untouched {
                tracing::info!(restored = %previous.status, "Rolling back optimistic start");
                *state = previous;
            }
            untouched
        })
    }

    pub fn apply_update(&self, delta: &JobDelta) -> Outcome {
        self.mutate("update", |state, now, window| {
            state.merge_update(delta, now, window)
        })
    }

    pub fn complete(&self, delta: Option<&JobDelta>) -> Outcome {
        self.mutate("complete", |state, now, window| {
            state.complete(delta, now, window)
        })
    }

    pub fn fail(&self, delta: Option<&JobDelta>, message: Option<&str>) -> Outcome {
        self.mutate("fail", |state, now, window| {
            state.fail(delta, message, now, window)
        })
    }

    pub fn load_snapshot(&self, snapshot: JobState) -> Outcome {
        self.mutate("snapshot", move |state, now, window| {
            state.load_snapshot(snapshot, now, window)
        })
    }

    pub fn reset(&self) -> Outcome {
        self.mutate("reset", |state, _, _| state.reset())
    }

    fn mutate<F>(&self, action: &'static str, apply: F) -> Outcome
    where
        F: FnOnce(&mut JobState, Timestamp, usize) -> Outcome,
    {
        let now = Utc::now();
        let window = self.log_window;
        let mut outcome = Outcome::Unchanged;
        self.tx.send_if_modified(|state| {
            outcome = apply(state, now, window);
            matches!(outcome, Outcome::Changed { .. })
        });
        log_transition(action, &outcome);
        outcome
    }
}

fn log_transition(action: &'static str, outcome: &Outcome) {
    match *outcome {
        Outcome::Changed { from, to } if from != to => {
            tracing::info!(action, %from, %to, "Job status changed");
        }
        Outcome::Changed { .. } | Outcome::Unchanged => {
            tracing::trace!(action, ?outcome, "Job state updated");
        }
        Outcome::Ignored => {
            tracing::debug!(action, "Job event ignored");
        }
    }
}
