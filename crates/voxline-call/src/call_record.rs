//! Durable per-call record and the forward-only lifecycle ordering.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CALL_RECORD_SCHEMA_VERSION: u32 = 1;

fn call_record_schema_version() -> u32 {
    CALL_RECORD_SCHEMA_VERSION
}

/// Lifecycle status of a call. The ordering
/// `unknown < initiated < in_progress < ended/failed` is authoritative:
/// the reconciler never moves a record backwards along it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    #[default]
    Unknown,
    Initiated,
    InProgress,
    Ended,
    Failed,
}

impl CallStatus {
    /// Returns the stable snake_case wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Initiated => "initiated",
            Self::InProgress => "in_progress",
            Self::Ended => "ended",
            Self::Failed => "failed",
        }
    }

    /// Position in the forward-only ordering. The two terminal states share
    /// a rank: neither ever replaces the other through a status update.
    pub fn rank(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Initiated => 1,
            Self::InProgress => 2,
            Self::Ended | Self::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Failed)
    }

    /// Maps an upstream-reported status string into the local enum.
    /// Unmapped strings yield `None` and leave the status field untouched.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "unknown" => Some(Self::Unknown),
            "queued" | "scheduled" | "initiated" => Some(Self::Initiated),
            "ringing" | "forwarding" | "answered" | "in-progress" | "in_progress" => {
                Some(Self::InProgress)
            }
            "ended" | "completed" => Some(Self::Ended),
            "failed" | "error" | "busy" | "no-answer" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Authoritative state for one call, keyed by the platform-assigned call id.
///
/// Created on the first event observed for the id, whatever kind that event
/// is, and never deleted by the core. `version` increments on every
/// successful apply and backs the store's compare-and-swap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallRecord {
    #[serde(default = "call_record_schema_version")]
    pub schema_version: u32,
    pub call_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub status: CallStatus,
    #[serde(default)]
    pub started_at_unix_ms: Option<u64>,
    #[serde(default)]
    pub ended_at_unix_ms: Option<u64>,
    #[serde(default)]
    pub duration_seconds: Option<u64>,
    /// Transcript fragments in sequencer admission order. A log, not a
    /// snapshot: fragments are appended, never rewritten.
    #[serde(default)]
    pub transcript: Vec<String>,
    /// Most recently applied raw payload, kept for debugging.
    #[serde(default)]
    pub last_raw_event: Value,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub created_unix_ms: u64,
    #[serde(default)]
    pub updated_unix_ms: u64,
}

impl CallRecord {
    /// Fresh record for a call id first observed at `now_unix_ms`.
    pub fn new(call_id: impl Into<String>, now_unix_ms: u64) -> Self {
        Self {
            schema_version: CALL_RECORD_SCHEMA_VERSION,
            call_id: call_id.into(),
            agent_id: None,
            phone_number: None,
            status: CallStatus::Unknown,
            started_at_unix_ms: None,
            ended_at_unix_ms: None,
            duration_seconds: None,
            transcript: Vec::new(),
            last_raw_event: Value::Null,
            version: 0,
            created_unix_ms: now_unix_ms,
            updated_unix_ms: now_unix_ms,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Joined transcript fragments in admission order.
    pub fn transcript_text(&self) -> String {
        self.transcript.join("\n")
    }
}
