// SPDX-License-Identifier: MIT OR Apache-2.0
//! reach-receipt-store
//!
//! Durable storage and querying for [`ExecutionReceipt`]s, keyed by run id.
//! Receipts within a run are kept in insertion order (timestamp-sorted) so
//! [`ReceiptStore::verify_chain_for_run`] can hand the ordered slice
//! straight to `reach_receipt::verify_receipt_chain`.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use reach_error::{ErrorCode, ReachError};
use reach_receipt::{verify_receipt_chain, ExecutionReceipt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Storage and query operations over execution receipts.
pub trait ReceiptStore: Send + Sync {
    /// Append a receipt under its `run_id`.
    ///
    /// # Errors
    /// Propagates any backing-store I/O failure.
    fn put(&self, receipt: ExecutionReceipt) -> Result<(), ReachError>;

    /// Look up one receipt by run id and its own `receipt_hash`.
    fn get(&self, run_id: &str, receipt_hash: &str) -> Option<ExecutionReceipt>;

    /// All receipts recorded for `run_id`, in timestamp order.
    fn list_for_run(&self, run_id: &str) -> Vec<ExecutionReceipt>;

    /// Verify every receipt for `run_id` and that their timestamps are
    /// non-decreasing.
    ///
    /// # Errors
    /// [`ErrorCode::InvalidArgument`] if no receipts are recorded for
    /// `run_id`; otherwise propagates [`verify_receipt_chain`]'s errors.
    fn verify_chain_for_run(&self, run_id: &str, secret: &[u8]) -> Result<(), ReachError> {
        let receipts = self.list_for_run(run_id);
        if receipts.is_empty() {
            return Err(ReachError::new(ErrorCode::InvalidArgument, format!("no receipts recorded for run {run_id}")));
        }
        verify_receipt_chain(&receipts, secret)
    }
}

#[derive(Debug, Default)]
struct Inner {
    by_run: HashMap<String, Vec<ExecutionReceipt>>,
}

impl Inner {
    fn insert(&mut self, receipt: ExecutionReceipt) {
        let run = self.by_run.entry(receipt.run_id.clone()).or_default();
        run.push(receipt);
        run.sort_by_key(|r| r.timestamp);
    }
}

/// In-memory receipt store. Useful for tests and for nodes that only need
/// receipts for the lifetime of one run.
#[derive(Debug, Default)]
pub struct InMemoryReceiptStore {
    inner: RwLock<Inner>,
}

impl InMemoryReceiptStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReceiptStore for InMemoryReceiptStore {
    fn put(&self, receipt: ExecutionReceipt) -> Result<(), ReachError> {
        self.inner.write().expect("receipt store lock poisoned").insert(receipt);
        Ok(())
    }

    fn get(&self, run_id: &str, receipt_hash: &str) -> Option<ExecutionReceipt> {
        self.inner
            .read()
            .expect("receipt store lock poisoned")
            .by_run
            .get(run_id)
            .and_then(|receipts| receipts.iter().find(|r| r.receipt_hash == receipt_hash))
            .cloned()
    }

    fn list_for_run(&self, run_id: &str) -> Vec<ExecutionReceipt> {
        self.inner.read().expect("receipt store lock poisoned").by_run.get(run_id).cloned().unwrap_or_default()
    }
}

/// JSON-file-backed receipt store: one `{run_id: [receipts]}` document,
/// persisted via temp-file + rename at mode 0644.
pub struct JsonFileReceiptStore {
    path: PathBuf,
    inner: RwLock<Inner>,
}

impl JsonFileReceiptStore {
    /// Load a store from `path`, or start empty if the file doesn't exist
    /// yet.
    ///
    /// # Errors
    /// [`ErrorCode::StorageReadFailed`] if the file exists but can't be read
    /// or parsed.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ReachError> {
        let path = path.into();
        let by_run = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                ReachError::new(ErrorCode::StorageReadFailed, format!("failed to parse {}", path.display())).with_source(e)
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(ReachError::new(ErrorCode::StorageReadFailed, format!("failed to read {}", path.display())).with_source(e))
            }
        };
        Ok(Self { path, inner: RwLock::new(Inner { by_run }) })
    }

    /// Atomically persist the current state to the backing file, via
    /// temp-file + rename at mode 0644.
    ///
    /// # Errors
    /// [`ErrorCode::StorageWriteFailed`] on any I/O failure.
    pub fn save(&self) -> Result<(), ReachError> {
        let inner = self.inner.read().expect("receipt store lock poisoned");
        let json = serde_json::to_string_pretty(&inner.by_run)
            .map_err(|e| ReachError::new(ErrorCode::StorageWriteFailed, "failed to serialize receipt store").with_source(e))?;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| ReachError::new(ErrorCode::StorageWriteFailed, "failed to create temp file").with_source(e))?;
        use std::io::Write;
        tmp.write_all(json.as_bytes())
            .map_err(|e| ReachError::new(ErrorCode::StorageWriteFailed, "failed to write temp file").with_source(e))?;

        #[cfg(unix)]
        {
            let mut perms = tmp
                .as_file()
                .metadata()
                .map_err(|e| ReachError::new(ErrorCode::StorageWriteFailed, "failed to stat temp file").with_source(e))?
                .permissions();
            perms.set_mode(0o644);
            tmp.as_file()
                .set_permissions(perms)
                .map_err(|e| ReachError::new(ErrorCode::StorageWriteFailed, "failed to chmod temp file").with_source(e))?;
        }

        tmp.persist(&self.path)
            .map_err(|e| ReachError::new(ErrorCode::StorageWriteFailed, "failed to persist receipt store").with_source(e))?;
        Ok(())
    }
}

impl ReceiptStore for JsonFileReceiptStore {
    fn put(&self, receipt: ExecutionReceipt) -> Result<(), ReachError> {
        self.inner.write().expect("receipt store lock poisoned").insert(receipt);
        Ok(())
    }

    fn get(&self, run_id: &str, receipt_hash: &str) -> Option<ExecutionReceipt> {
        self.inner
            .read()
            .expect("receipt store lock poisoned")
            .by_run
            .get(run_id)
            .and_then(|receipts| receipts.iter().find(|r| r.receipt_hash == receipt_hash))
            .cloned()
    }

    fn list_for_run(&self, run_id: &str) -> Vec<ExecutionReceipt> {
        self.inner.read().expect("receipt store lock poisoned").by_run.get(run_id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reach_receipt::generate_receipt;

    fn t(offset_secs: i64) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp(1_700_000_000 + offset_secs, 0).unwrap()
    }

    #[test]
    fn in_memory_store_round_trips_and_verifies_chain() {
        let store = InMemoryReceiptStore::new();
        let r1 = generate_receipt("run-1", "pack-cid", &serde_json::json!({}), &serde_json::json!({}), b"secret", t(0)).unwrap();
        let r2 = generate_receipt("run-1", "pack-cid", &serde_json::json!({}), &serde_json::json!({}), b"secret", t(5)).unwrap();
        store.put(r1.clone()).unwrap();
        store.put(r2).unwrap();

        assert_eq!(store.list_for_run("run-1").len(), 2);
        assert!(store.get("run-1", &r1.receipt_hash).is_some());
        store.verify_chain_for_run("run-1", b"secret").unwrap();
    }

    #[test]
    fn verify_chain_for_unknown_run_errors() {
        let store = InMemoryReceiptStore::new();
        let err = store.verify_chain_for_run("missing-run", b"secret").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
    }

    #[test]
    fn json_file_store_persists_across_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("receipts.json");

        let store = JsonFileReceiptStore::load(&path).unwrap();
        let r1 = generate_receipt("run-1", "pack-cid", &serde_json::json!({}), &serde_json::json!({}), b"secret", t(0)).unwrap();
        store.put(r1.clone()).unwrap();
        store.save().unwrap();

        let reloaded = JsonFileReceiptStore::load(&path).unwrap();
        assert_eq!(reloaded.list_for_run("run-1"), vec![r1]);
    }
}
