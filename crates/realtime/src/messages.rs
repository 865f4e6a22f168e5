//! Wire messages exchanged over the processing-status stream.
//!
//! Outbound frames are bare text tokens ([`HEARTBEAT`], [`STATUS_REQUEST`]).
//! Inbound frames are JSON objects of the shape
//! `{"type": "<kind>", "data": {...}}`, parsed into [`InboundEvent`].

use briefing_core::JobDelta;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Liveness probe sent on every heartbeat tick. Answered with `pong`.
pub const HEARTBEAT: &str = "ping";

/// Asks the backend for an immediate `status_update`.
pub const STATUS_REQUEST: &str = "status";

/// Discriminant of an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StatusUpdate,
    ProcessingUpdate,
    ProcessingComplete,
    ProcessingError,
    Pong,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Full or partial state pushed on connect, on request, or periodically.
    StatusUpdate(JobDelta),
    /// Progress pushed by the running job.
    ProcessingUpdate(JobDelta),
    /// The run finished; carries the final state.
    ProcessingComplete(JobDelta),
    /// The run failed.
    ProcessingError(ErrorPayload),
    /// Heartbeat answer.
    Pong,
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::StatusUpdate(_) => EventKind::StatusUpdate,
            Self::ProcessingUpdate(_) => EventKind::ProcessingUpdate,
            Self::ProcessingComplete(_) => EventKind::ProcessingComplete,
            Self::ProcessingError(_) => EventKind::ProcessingError,
            Self::Pong => EventKind::Pong,
        }
    }
}

/// Payload of `processing_error`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorPayload {
    /// State of the run at the time of failure, when decodable.
    pub state: Option<JobDelta>,
    /// Backend's error text.
    pub error: Option<String>,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: EventKind,
    #[serde(default)]
    data: Option<Value>,
}

/// Parse one inbound text frame.
///
/// Returns `Err` for malformed JSON, unknown `type` values, or a delta
/// payload that does not decode. Callers log and drop such frames. A
/// `processing_error` frame always decodes: whatever part of its payload
/// is unreadable is left empty.
pub fn parse_event(text: &str) -> Result<InboundEvent, MessageError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(MessageError::Envelope)?;
    let kind = envelope.kind;
    let data = envelope.data;

    let event = match kind {
        EventKind::StatusUpdate => InboundEvent::StatusUpdate(decode_delta(kind, data)?),
        EventKind::ProcessingUpdate => InboundEvent::ProcessingUpdate(decode_delta(kind, data)?),
        EventKind::ProcessingComplete => {
            InboundEvent::ProcessingComplete(decode_delta(kind, data)?)
        }
        EventKind::ProcessingError => InboundEvent::ProcessingError(decode_error(data)),
        EventKind::Pong => InboundEvent::Pong,
    };
    Ok(event)
}

fn decode_delta(kind: EventKind, data: Option<Value>) -> Result<JobDelta, MessageError> {
    match data {
        None | Some(Value::Null) => Ok(JobDelta::default()),
        Some(value) => {
            serde_json::from_value(value).map_err(|source| MessageError::Payload { kind, source })
        }
    }
}

fn decode_error(data: Option<Value>) -> ErrorPayload {
    let Some(value) = data else {
        return ErrorPayload::default();
    };
    if let Value::String(error) = value {
        return ErrorPayload {
            state: None,
            error: Some(error),
        };
    }

    let error = value
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let state = value.get("state").and_then(|raw| {
        serde_json::from_value::<JobDelta>(raw.clone())
            .map_err(|e| {
                tracing::warn!(error = %e, "Undecodable state in processing_error payload");
            })
            .ok()
    });
    ErrorPayload { state, error }
}

/// Reasons an inbound frame is dropped.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Malformed frame: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("Undecodable {kind:?} payload: {source}")]
    Payload {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
}
