//! Per-call serialization of event application against the durable store.
//!
//! Events for different call ids proceed fully in parallel; events for the
//! same call id are applied one at a time, in the order they acquire the
//! call's admission lock. That admission order is the authoritative ordering
//! for the call, whatever order the deliveries hit the network boundary in.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use crate::call_event::CallEvent;
use crate::call_record::CallRecord;
use crate::call_store::{CallRecordFilter, CallStore, CallStoreError};
use crate::reconcile::apply_call_event;

#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Store-write attempts before an event is dropped (minimum 1).
    pub store_retry_max_attempts: usize,
    /// Base delay for the exponential backoff between attempts.
    pub store_retry_base_delay_ms: u64,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            store_retry_max_attempts: 3,
            store_retry_base_delay_ms: 50,
        }
    }
}

/// Distinguishes first-event record creation from an apply against an
/// existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Created,
    Applied,
}

#[derive(Debug, Default)]
struct SequencerCounters {
    created: AtomicU64,
    applied: AtomicU64,
    conflict_retries: AtomicU64,
    store_retries: AtomicU64,
    dropped_events: AtomicU64,
}

/// Point-in-time snapshot of the sequencer counters.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct SequencerStats {
    pub created: u64,
    pub applied: u64,
    pub conflict_retries: u64,
    pub store_retries: u64,
    pub dropped_events: u64,
}

/// Cheaply cloneable handle; clones share the store, the per-call locks,
/// and the counters.
#[derive(Clone)]
pub struct CallSequencer {
    inner: Arc<SequencerInner>,
}

struct SequencerInner {
    store: CallStore,
    config: SequencerConfig,
    call_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    counters: SequencerCounters,
}

impl CallSequencer {
    pub fn new(store: CallStore, config: SequencerConfig) -> Self {
        Self {
            inner: Arc::new(SequencerInner {
                store,
                config,
                call_locks: Mutex::new(HashMap::new()),
                counters: SequencerCounters::default(),
            }),
        }
    }

    /// Admits one event and applies it to its call's record.
    ///
    /// Holds the call's admission lock across the whole read-modify-write so
    /// no two applies for the same call id ever run concurrently. A version
    /// conflict from the store is recovered locally by re-reading and
    /// re-applying from the fresh base; an unavailable store is retried with
    /// bounded exponential backoff, after which the event is dropped loudly
    /// with its full raw payload in the log for manual replay.
    pub async fn ingest(&self, event: CallEvent) -> Result<IngestOutcome, CallStoreError> {
        let call_lock = self.call_lock(&event.call_id);
        let _admitted = call_lock.lock().await;
        self.apply_with_retry(&event).await
    }

    /// Fire-and-forget variant for the ack-first ingestion endpoint: the
    /// caller is released immediately and any later failure is logged at the
    /// drop site, never surfaced.
    pub fn ingest_detached(&self, event: CallEvent) {
        let sequencer = self.clone();
        tokio::spawn(async move {
            let _ = sequencer.ingest(event).await;
        });
    }

    /// Pass-through read for the CRUD surface; `None` means the call was
    /// never reconciled, distinct from an existing record with sparse data.
    pub fn get_call(&self, call_id: &str) -> Option<CallRecord> {
        self.inner.store.get(call_id)
    }

    /// Pass-through filtered listing for the CRUD surface.
    pub fn list_calls(&self, filter: CallRecordFilter) -> Vec<CallRecord> {
        self.inner.store.list(filter)
    }

    pub fn stats(&self) -> SequencerStats {
        let counters = &self.inner.counters;
        SequencerStats {
            created: counters.created.load(Ordering::Relaxed),
            applied: counters.applied.load(Ordering::Relaxed),
            conflict_retries: counters.conflict_retries.load(Ordering::Relaxed),
            store_retries: counters.store_retries.load(Ordering::Relaxed),
            dropped_events: counters.dropped_events.load(Ordering::Relaxed),
        }
    }

    async fn apply_with_retry(&self, event: &CallEvent) -> Result<IngestOutcome, CallStoreError> {
        let max_attempts = self.inner.config.store_retry_max_attempts.max(1);
        let mut attempt = 0_usize;
        loop {
            match self.apply_once(event) {
                Ok(outcome) => {
                    let counter = match outcome {
                        IngestOutcome::Created => &self.inner.counters.created,
                        IngestOutcome::Applied => &self.inner.counters.applied,
                    };
                    counter.fetch_add(1, Ordering::Relaxed);
                    return Ok(outcome);
                }
                Err(CallStoreError::Unavailable(error)) => {
                    attempt = attempt.saturating_add(1);
                    if attempt >= max_attempts {
                        self.inner
                            .counters
                            .dropped_events
                            .fetch_add(1, Ordering::Relaxed);
                        tracing::error!(
                            call_id = %event.call_id,
                            kind = event.kind.as_str(),
                            attempts = attempt,
                            error = %error,
                            raw = %event.raw,
                            "call event dropped after exhausting store retries"
                        );
                        return Err(CallStoreError::Unavailable(error));
                    }
                    self.inner
                        .counters
                        .store_retries
                        .fetch_add(1, Ordering::Relaxed);
                    let delay_ms = self
                        .inner
                        .config
                        .store_retry_base_delay_ms
                        .saturating_mul(1_u64 << (attempt.min(16) - 1));
                    tracing::warn!(
                        call_id = %event.call_id,
                        attempt,
                        delay_ms,
                        error = %error,
                        "store unavailable, retrying call event"
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// One read-modify-write pass. Loops internally on the benign races
    /// (stale version, lost create race); only store unavailability escapes
    /// to the backoff layer above.
    fn apply_once(&self, event: &CallEvent) -> Result<IngestOutcome, CallStoreError> {
        loop {
            match self.inner.store.get(&event.call_id) {
                Some(current) => {
                    let next = apply_call_event(&current, event);
                    match self.inner.store.compare_and_swap(current.version, &next) {
                        Ok(()) => return Ok(IngestOutcome::Applied),
                        Err(CallStoreError::VersionConflict { .. })
                        | Err(CallStoreError::NotFound(_)) => {
                            self.inner
                                .counters
                                .conflict_retries
                                .fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                        Err(error) => return Err(error),
                    }
                }
                None => {
                    let base = CallRecord::new(&event.call_id, event.occurred_at_unix_ms);
                    let next = apply_call_event(&base, event);
                    match self.inner.store.create_if_absent(&next) {
                        Ok(()) => return Ok(IngestOutcome::Created),
                        Err(CallStoreError::AlreadyExists(_)) => {
                            self.inner
                                .counters
                                .conflict_retries
                                .fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                        Err(error) => return Err(error),
                    }
                }
            }
        }
    }

    /// One lock entry per call id, never evicted; growth matches the store's
    /// own record index, which likewise retains every call seen.
    fn call_lock(&self, call_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .inner
            .call_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(call_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}
