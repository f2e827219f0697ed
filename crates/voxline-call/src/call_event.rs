//! Normalization of raw webhook payloads into typed call events.
//!
//! Parsing is pure: no I/O, no clock reads. The receipt timestamp is passed
//! in so the caller decides what "now" means.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Rejection reasons for an inbound payload. Both map to synchronous
/// 4xx-style responses at the boundary and are never retried internally.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("malformed webhook payload: {reason}")]
    MalformedPayload { reason: String },
    #[error("webhook payload carries no resolvable call id")]
    MissingCallId,
}

/// Enumerates the recognized inbound event kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallEventKind {
    Started,
    StatusUpdate,
    TranscriptChunk,
    Ended,
    Unknown,
}

impl CallEventKind {
    /// Returns the stable snake_case wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::StatusUpdate => "status_update",
            Self::TranscriptChunk => "transcript_chunk",
            Self::Ended => "ended",
            Self::Unknown => "unknown",
        }
    }

    fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "call-started" | "call.started" | "started" => Self::Started,
            "status-update" | "call.status-update" | "status_update" => Self::StatusUpdate,
            "transcript" | "transcript-chunk" | "transcript_chunk" => Self::TranscriptChunk,
            "call-ended" | "call.ended" | "ended" => Self::Ended,
            _ => Self::Unknown,
        }
    }
}

/// One inbound delivery, normalized. `raw` keeps the original payload
/// verbatim for audit; the optional fields are extracted only when the
/// payload actually carries them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallEvent {
    pub kind: CallEventKind,
    pub call_id: String,
    pub occurred_at_unix_ms: u64,
    pub raw: Value,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub transcript_fragment: Option<String>,
    #[serde(default)]
    pub customer_number: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
}

/// Parses a raw delivery into a [`CallEvent`].
///
/// Unrecognized event kinds degrade to [`CallEventKind::Unknown`] rather than
/// failing, so deliveries ahead of the local taxonomy still carry their call
/// id through the pipeline and lose no information. Only structurally broken
/// payloads and payloads with no resolvable call id are rejected.
pub fn normalize_call_event(
    raw: &[u8],
    received_unix_ms: u64,
) -> Result<CallEvent, NormalizeError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|error| NormalizeError::MalformedPayload {
            reason: error.to_string(),
        })?;
    let Some(object) = value.as_object() else {
        return Err(NormalizeError::MalformedPayload {
            reason: "top-level JSON value is not an object".to_string(),
        });
    };

    let call = object.get("call").and_then(Value::as_object);

    // Upstream payloads are inconsistent about where the identifier lives.
    let call_id = call
        .and_then(|call| call.get("id"))
        .or_else(|| object.get("callId"))
        .or_else(|| object.get("call_id"))
        .or_else(|| object.get("id"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or(NormalizeError::MissingCallId)?
        .to_string();

    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .map(CallEventKind::from_wire)
        .unwrap_or(CallEventKind::Unknown);

    let occurred_at_unix_ms = object
        .get("timestamp")
        .and_then(parse_event_timestamp)
        .unwrap_or(received_unix_ms);

    let status = call
        .and_then(|call| call.get("status"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|status| !status.is_empty())
        .map(str::to_string);
    let transcript_fragment = object
        .get("transcript")
        .and_then(Value::as_str)
        .filter(|fragment| !fragment.is_empty())
        .map(str::to_string);
    let customer_number = call
        .and_then(|call| call.get("customer"))
        .and_then(Value::as_object)
        .and_then(|customer| customer.get("number"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|number| !number.is_empty())
        .map(str::to_string);
    let agent_id = call
        .and_then(|call| call.get("assistantId").or_else(|| call.get("assistant_id")))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|agent| !agent.is_empty())
        .map(str::to_string);

    Ok(CallEvent {
        kind,
        call_id,
        occurred_at_unix_ms,
        raw: value,
        status,
        transcript_fragment,
        customer_number,
        agent_id,
    })
}

fn parse_event_timestamp(value: &Value) -> Option<u64> {
    if let Some(unix_ms) = value.as_u64() {
        return Some(unix_ms);
    }
    let text = value.as_str()?.trim();
    let parsed = chrono::DateTime::parse_from_rfc3339(text).ok()?;
    u64::try_from(parsed.timestamp_millis()).ok()
}
