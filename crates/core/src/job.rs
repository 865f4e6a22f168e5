//! The processing-run record and its state machine.
//!
//! [`JobState`] is the full view of one processing run. The backend
//! sends two shapes of it: complete snapshots (request/response) and
//! partial [`JobDelta`]s (streamed). The transition methods on
//! [`JobState`] are the only way either shape is folded in, and each of
//! them leaves the record satisfying:
//!
//! - `progress <= total_steps` whenever `total_steps > 0`;
//! - `end_time` is set iff the status is terminal;
//! - `error_message` is set iff the status is [`JobStatus::Error`];
//! - `logs` holds at most the configured window of entries.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::timestamp::{self, Timestamp};

/// Message used when a run fails without the backend saying why.
pub const GENERIC_FAILURE_MESSAGE: &str = "Processing failed";

/// Default number of log entries kept per run.
pub const DEFAULT_LOG_WINDOW: usize = 50;

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a processing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Error,
}

impl JobStatus {
    /// `completed` and `error` end a run; only a new start leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// LogEntry
// ---------------------------------------------------------------------------

/// Severity of a [`LogEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    #[serde(alias = "warn")]
    Warning,
    Error,
}

/// One line of the run's activity log. Never modified after it is
/// appended to a [`JobState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(with = "timestamp::lenient")]
    pub timestamp: Timestamp,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u32>,
    /// Any other fields the backend attached (`error`, `duration`, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl LogEntry {
    pub fn new(timestamp: Timestamp, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            level,
            message: message.into(),
            step: None,
            progress: None,
            extra: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// JobState / JobDelta
// ---------------------------------------------------------------------------

/// Full view of the current processing run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobState {
    pub status: JobStatus,
    pub current_step: String,
    pub progress: u32,
    pub total_steps: u32,
    #[serde(with = "timestamp::lenient_option")]
    pub start_time: Option<Timestamp>,
    #[serde(with = "timestamp::lenient_option")]
    pub end_time: Option<Timestamp>,
    pub error_message: Option<String>,
    /// Named counters (`summaries_generated`, ...). A few entries are
    /// flags rather than counts, so values stay as JSON.
    pub results: BTreeMap<String, serde_json::Value>,
    pub logs: Vec<LogEntry>,
}

/// Partial [`JobState`]: only the fields that changed. Absent fields
/// never clear what is already known.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<u32>,
    #[serde(
        with = "timestamp::lenient_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_time: Option<Timestamp>,
    #[serde(
        with = "timestamp::lenient_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_time: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<LogEntry>>,
}

/// What a transition did to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// At least one field changed.
    Changed { from: JobStatus, to: JobStatus },
    /// The input was accepted but matched what was already known.
    Unchanged,
    /// The input was discarded, e.g. a late delta for a finished run.
    Ignored,
}

impl Outcome {
    /// `true` if this transition moved the run into `status` from
    /// some other status.
    pub fn entered(&self, status: JobStatus) -> bool {
        matches!(*self, Self::Changed { from, to } if to == status && from != status)
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored)
    }
}

impl JobState {
    /// `idle|completed|error --start--> running`.
    ///
    /// Clears everything left over from the previous run, including the
    /// log buffer.
    pub fn begin_run(&mut self, now: Timestamp) -> Result<Outcome, CoreError> {
        if self.status == JobStatus::Running {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                action: "start",
            });
        }
        let from = self.status;
        *self = Self {
            status: JobStatus::Running,
            start_time: Some(now),
            ..Self::default()
        };
        Ok(Outcome::Changed {
            from,
            to: JobStatus::Running,
        })
    }

    /// Explicit reset back to `idle`.
    pub fn reset(&mut self) -> Outcome {
        let before = self.clone();
        *self = Self::default();
        self.outcome_since(&before)
    }

    /// Fold a `status_update` / `processing_update` delta in.
    ///
    /// On a terminal run the delta is ignored unless it reports a new
    /// run (status `running` with a different `start_time`), which counts
    /// as a start. Within one run `progress` never moves backwards.
    pub fn merge_update(&mut self, delta: &JobDelta, now: Timestamp, window: usize) -> Outcome {
        if *delta == JobDelta::default() {
            return Outcome::Unchanged;
        }
        let before = self.clone();

        let mut monotonic = self.status == JobStatus::Running;
        if delta.status == Some(JobStatus::Running) && self.is_new_run(delta) {
            if self.status.is_terminal() || self.start_time.is_some() {
                *self = Self::default();
                monotonic = false;
            }
        } else if self.status.is_terminal() {
            return Outcome::Ignored;
        }

        let target = match delta.status {
            // Only an explicit reset or a snapshot leads back to idle.
            Some(JobStatus::Idle) if self.status != JobStatus::Idle => self.status,
            Some(status) => status,
            None => JobStatus::Running,
        };

        self.apply_fields(delta, monotonic, window);
        self.status = target;
        self.normalize(now);
        self.outcome_since(&before)
    }

    /// `running --complete--> completed`.
    ///
    /// A second completion of the same run is ignored, so applying the
    /// same event twice leaves the state as applying it once.
    pub fn complete(&mut self, delta: Option<&JobDelta>, now: Timestamp, window: usize) -> Outcome {
        if !self.prepare_terminal(delta) {
            return Outcome::Ignored;
        }
        let before = self.clone();
        let monotonic = self.status == JobStatus::Running;
        if let Some(delta) = delta {
            self.apply_fields(delta, monotonic, window);
        }
        self.status = JobStatus::Completed;
        self.error_message = None;
        self.normalize(now);
        self.outcome_since(&before)
    }

    /// `running --fail--> error`.
    ///
    /// `message` wins over any `error_message` inside `delta`; with
    /// neither, [`GENERIC_FAILURE_MESSAGE`] is used.
    pub fn fail(
        &mut self,
        delta: Option<&JobDelta>,
        message: Option<&str>,
        now: Timestamp,
        window: usize,
    ) -> Outcome {
        if !self.prepare_terminal(delta) {
            return Outcome::Ignored;
        }
        let before = self.clone();
        let monotonic = self.status == JobStatus::Running;
        if let Some(delta) = delta {
            self.apply_fields(delta, monotonic, window);
        }
        self.status = JobStatus::Error;
        self.error_message = message
            .map(str::to_owned)
            .or_else(|| delta.and_then(|d| d.error_message.clone()))
            .or_else(|| Some(GENERIC_FAILURE_MESSAGE.to_owned()));
        self.normalize(now);
        self.outcome_since(&before)
    }

    /// Replace the state with an authoritative snapshot.
    ///
    /// The snapshot wins with two exceptions for the same run:
    /// a `running` snapshot never lowers local `progress`, and a
    /// `running` snapshot arriving after the run already finished locally
    /// is stale and ignored.
    pub fn load_snapshot(&mut self, snapshot: JobState, now: Timestamp, window: usize) -> Outcome {
        let before = self.clone();
        let mut next = snapshot;
        let same_run = !is_different_run(self.start_time, next.start_time);

        if next.status == JobStatus::Running && same_run {
            if self.status.is_terminal() {
                return Outcome::Ignored;
            }
            if self.status == JobStatus::Running && self.progress > next.progress {
                next.progress = self.progress;
            }
        }

        trim_logs(&mut next.logs, window);
        *self = next;
        self.normalize(now);
        self.outcome_since(&before)
    }

    // ---- private helpers ----

    /// Shared guard for `complete` / `fail`. Returns `false` when the
    /// event must be ignored; resets the record when it opens a new run.
    fn prepare_terminal(&mut self, delta: Option<&JobDelta>) -> bool {
        if !self.status.is_terminal() {
            return true;
        }
        match delta {
            Some(delta) if self.is_new_run(delta) => {
                *self = Self::default();
                true
            }
            _ => false,
        }
    }

    fn is_new_run(&self, delta: &JobDelta) -> bool {
        match (self.start_time, delta.start_time) {
            (Some(current), Some(incoming)) => current != incoming,
            (None, Some(_)) => true,
            (_, None) => false,
        }
    }

    fn apply_fields(&mut self, delta: &JobDelta, monotonic: bool, window: usize) {
        if let Some(step) = &delta.current_step {
            self.current_step.clone_from(step);
        }
        if let Some(total) = delta.total_steps {
            self.total_steps = total;
        }
        if let Some(progress) = delta.progress {
            self.progress = if monotonic {
                self.progress.max(progress)
            } else {
                progress
            };
        }
        if let Some(start) = delta.start_time {
            self.start_time = Some(start);
        }
        if let Some(end) = delta.end_time {
            self.end_time = Some(end);
        }
        if let Some(message) = &delta.error_message {
            self.error_message = Some(message.clone());
        }
        if let Some(results) = &delta.results {
            for (name, value) in results {
                self.results.insert(name.clone(), value.clone());
            }
        }
        if let Some(logs) = &delta.logs {
            merge_log_tail(&mut self.logs, logs);
        }
        trim_logs(&mut self.logs, window);
    }

    fn normalize(&mut self, now: Timestamp) {
        if self.total_steps > 0 && self.progress > self.total_steps {
            self.progress = self.total_steps;
        }
        match self.status {
            JobStatus::Idle | JobStatus::Running => {
                self.end_time = None;
                self.error_message = None;
            }
            JobStatus::Completed => {
                self.end_time.get_or_insert(now);
                self.error_message = None;
            }
            JobStatus::Error => {
                self.end_time.get_or_insert(now);
                self.error_message
                    .get_or_insert_with(|| GENERIC_FAILURE_MESSAGE.to_owned());
            }
        }
    }

    fn outcome_since(&self, before: &JobState) -> Outcome {
        if self == before {
            Outcome::Unchanged
        } else {
            Outcome::Changed {
                from: before.status,
                to: self.status,
            }
        }
    }
}

/// Two runs are known to differ only when both carry a start time.
fn is_different_run(a: Option<Timestamp>, b: Option<Timestamp>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a != b)
}

/// `incoming` is the backend's most recent entries, oldest first. Only the
/// entries after the newest one already held are appended; without any
/// overlap the incoming tail replaces the buffer.
fn merge_log_tail(logs: &mut Vec<LogEntry>, incoming: &[LogEntry]) {
    let overlap = logs
        .last()
        .and_then(|newest| incoming.iter().rposition(|entry| entry == newest));
    match overlap {
        Some(pos) => logs.extend_from_slice(&incoming[pos + 1..]),
        None => *logs = incoming.to_vec(),
    }
}

fn trim_logs(logs: &mut Vec<LogEntry>, window: usize) {
    if logs.len() > window {
        let excess = logs.len() - window;
        logs.drain(..excess);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
