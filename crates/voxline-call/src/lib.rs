//! Call-event reconciliation core for the Voxline voice-call backend.
//!
//! Webhook deliveries from the upstream voice platform arrive out of band,
//! possibly duplicated and reordered. This crate folds them into one durable
//! record per call: payload normalization, a pure lifecycle reconciler, a
//! versioned store with per-call compare-and-swap, and a sequencer that
//! serializes event application per call id.

pub mod call_event;
pub mod call_record;
pub mod call_store;
pub mod reconcile;
pub mod sequencer;

pub use call_event::{normalize_call_event, CallEvent, CallEventKind, NormalizeError};
pub use call_record::{CallRecord, CallStatus};
pub use call_store::{CallRecordFilter, CallStore, CallStoreError};
pub use reconcile::apply_call_event;
pub use sequencer::{CallSequencer, IngestOutcome, SequencerConfig, SequencerStats};

/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
