//! Durable versioned call-record store with per-call compare-and-swap.
//!
//! One JSON document per call under `<root>/calls/`, written with a temp
//! file + rename so readers never observe partial data, plus an in-memory
//! index hydrated from disk at open. The store never interprets record
//! contents: it is a versioned map, nothing more.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::call_record::CallRecord;

const CALL_STORE_DIR: &str = "calls";

#[derive(Debug, Error)]
pub enum CallStoreError {
    #[error("call '{0}' not found")]
    NotFound(String),
    #[error("call '{0}' already exists")]
    AlreadyExists(String),
    #[error("version conflict for call '{call_id}': expected {expected}, found {found}")]
    VersionConflict {
        call_id: String,
        expected: u64,
        found: u64,
    },
    #[error("call store unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),
}

/// List filter over record activity; a call is active while its status is
/// non-terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CallRecordFilter {
    #[default]
    All,
    Active,
    Inactive,
}

impl CallRecordFilter {
    /// Parses a filter token used by the list query APIs.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "all" => Some(Self::All),
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }

    pub fn matches(self, record: &CallRecord) -> bool {
        match self {
            Self::All => true,
            Self::Active => record.is_active(),
            Self::Inactive => !record.is_active(),
        }
    }
}

#[derive(Debug)]
pub struct CallStore {
    calls_dir: PathBuf,
    records: Mutex<HashMap<String, CallRecord>>,
}

impl CallStore {
    /// Opens the store rooted at `root`, hydrating the index from any
    /// records already on disk. Unparseable files are skipped with a
    /// warning rather than failing the open; the durable copy stays in
    /// place for manual inspection.
    pub fn open(root: &Path) -> Result<Self> {
        let calls_dir = root.join(CALL_STORE_DIR);
        std::fs::create_dir_all(&calls_dir)
            .with_context(|| format!("failed to create {}", calls_dir.display()))?;

        let mut records = HashMap::new();
        for entry in std::fs::read_dir(&calls_dir)
            .with_context(|| format!("failed to read {}", calls_dir.display()))?
        {
            let entry = entry
                .with_context(|| format!("failed to read entry in {}", calls_dir.display()))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let raw = match std::fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(error) => {
                    tracing::warn!(path = %path.display(), error = %error, "skipping unreadable call record");
                    continue;
                }
            };
            match serde_json::from_str::<CallRecord>(&raw) {
                Ok(record) => {
                    records.insert(record.call_id.clone(), record);
                }
                Err(error) => {
                    tracing::warn!(path = %path.display(), error = %error, "skipping malformed call record");
                }
            }
        }

        Ok(Self {
            calls_dir,
            records: Mutex::new(records),
        })
    }

    /// Snapshot of the record for `call_id`, if one exists.
    pub fn get(&self, call_id: &str) -> Option<CallRecord> {
        self.lock_records().get(call_id).cloned()
    }

    /// Inserts the first record for a call id. Atomic per call id: a
    /// concurrent insert for the same id loses with `AlreadyExists`.
    pub fn create_if_absent(&self, record: &CallRecord) -> Result<(), CallStoreError> {
        let mut records = self.lock_records();
        if records.contains_key(&record.call_id) {
            return Err(CallStoreError::AlreadyExists(record.call_id.clone()));
        }
        self.persist_record(record)?;
        records.insert(record.call_id.clone(), record.clone());
        Ok(())
    }

    /// Replaces the record for `record.call_id` only when the stored version
    /// still equals `expected_version`. The lock is held across the durable
    /// write, so a successful swap is atomic end to end: no reader ever sees
    /// the index and the disk copy disagree.
    pub fn compare_and_swap(
        &self,
        expected_version: u64,
        record: &CallRecord,
    ) -> Result<(), CallStoreError> {
        let mut records = self.lock_records();
        let current = records
            .get(&record.call_id)
            .ok_or_else(|| CallStoreError::NotFound(record.call_id.clone()))?;
        if current.version != expected_version {
            return Err(CallStoreError::VersionConflict {
                call_id: record.call_id.clone(),
                expected: expected_version,
                found: current.version,
            });
        }
        self.persist_record(record)?;
        records.insert(record.call_id.clone(), record.clone());
        Ok(())
    }

    /// Records matching `filter`, ordered by creation time then call id.
    pub fn list(&self, filter: CallRecordFilter) -> Vec<CallRecord> {
        let records = self.lock_records();
        let mut matching: Vec<CallRecord> = records
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        matching.sort_by(|left, right| {
            left.created_unix_ms
                .cmp(&right.created_unix_ms)
                .then_with(|| left.call_id.cmp(&right.call_id))
        });
        matching
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, HashMap<String, CallRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist_record(&self, record: &CallRecord) -> Result<(), CallStoreError> {
        let path = self
            .calls_dir
            .join(format!("{}.json", sanitize_call_id_for_path(&record.call_id)));
        let mut payload = serde_json::to_string_pretty(record)
            .map_err(|error| CallStoreError::Unavailable(error.into()))?;
        payload.push('\n');
        write_text_atomic(&path, &payload).map_err(CallStoreError::Unavailable)
    }
}

/// Writes text using a temp file + rename so readers never observe partial
/// data.
fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent_dir)
        .with_context(|| format!("failed to create {}", parent_dir.display()))?;

    let temp_name = format!(
        ".{}.tmp-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("call-record"),
        std::process::id()
    );
    let temp_path = parent_dir.join(temp_name);
    std::fs::write(&temp_path, content)
        .with_context(|| format!("failed to write temporary file {}", temp_path.display()))?;
    std::fs::rename(&temp_path, path).with_context(|| {
        format!(
            "failed to rename {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}

fn sanitize_call_id_for_path(raw: &str) -> String {
    let sanitized = raw
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
                ch
            } else {
                '_'
            }
        })
        .collect::<String>();
    let trimmed = sanitized.trim_matches('_');
    if trimmed.is_empty() {
        "call".to_string()
    } else {
        trimmed.to_string()
    }
}
