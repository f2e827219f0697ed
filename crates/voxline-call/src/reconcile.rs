//! Pure fold of one inbound event into the authoritative call record.

use crate::call_event::{CallEvent, CallEventKind};
use crate::call_record::{CallRecord, CallStatus};

/// Applies one event to a record, returning the updated record.
///
/// Deterministic and side-effect free: identical `(record, event)` inputs
/// always produce identical outputs, so a retried delivery replayed against
/// the same base yields the same result, and replayed against an
/// already-advanced base degrades to a safe no-op on every guarded field.
///
/// Field rules, independent of event kind:
/// - `agent_id` / `phone_number` are first-write-wins and never cleared;
/// - any transcript fragment the payload carries extends the transcript,
///   whatever the event kind and however stale the event is;
/// - `last_raw_event` always tracks the latest applied payload;
/// - `version` increments on every apply;
/// - `status` only moves forward along [`CallStatus::rank`].
pub fn apply_call_event(record: &CallRecord, event: &CallEvent) -> CallRecord {
    let mut next = record.clone();
    merge_identity_fields(&mut next, event);

    // The transcript is a log: chunks append even when the call has already
    // ended from this record's point of view, and a fragment riding on any
    // other event kind is still data to keep.
    if let Some(fragment) = event.transcript_fragment.as_deref() {
        next.transcript.push(fragment.to_string());
    }

    match event.kind {
        CallEventKind::Started => {
            if matches!(next.status, CallStatus::Unknown | CallStatus::Initiated) {
                next.status = CallStatus::InProgress;
            }
            // A stale `started` after a terminal event still backfills the
            // start time so the duration can be computed; it never resets one
            // already recorded.
            if next.started_at_unix_ms.is_none() {
                next.started_at_unix_ms = Some(event.occurred_at_unix_ms);
            }
            recompute_duration(&mut next);
        }
        CallEventKind::StatusUpdate => {
            if let Some(reported) = event.status.as_deref().and_then(CallStatus::parse) {
                if reported.rank() > next.status.rank() {
                    next.status = reported;
                }
            }
        }
        CallEventKind::Ended => {
            if next.status != CallStatus::Failed {
                next.status = CallStatus::Ended;
            }
            if next.ended_at_unix_ms.is_none() {
                next.ended_at_unix_ms = Some(event.occurred_at_unix_ms);
            }
            recompute_duration(&mut next);
        }
        // Fragment and identity merges above are the whole effect; neither
        // kind touches the status field.
        CallEventKind::TranscriptChunk | CallEventKind::Unknown => {}
    }

    next.last_raw_event = event.raw.clone();
    next.version = next.version.saturating_add(1);
    next.updated_unix_ms = event.occurred_at_unix_ms;
    next
}

fn merge_identity_fields(record: &mut CallRecord, event: &CallEvent) {
    if record.agent_id.is_none() {
        record.agent_id = event.agent_id.clone();
    }
    if record.phone_number.is_none() {
        record.phone_number = event.customer_number.clone();
    }
}

/// Duration settles once both endpoints are known; saturating subtraction
/// clamps clock-skewed negative spans to zero.
fn recompute_duration(record: &mut CallRecord) {
    if let (Some(started), Some(ended)) = (record.started_at_unix_ms, record.ended_at_unix_ms) {
        record.duration_seconds = Some(ended.saturating_sub(started) / 1_000);
    }
}
