//! Persistence collaborator contract.
//!
//! The client never owns record storage; it only applies status patches and
//! maintains the pending list through this injected interface.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use fe_core::models::{Authorization, RecordStatus};
use fe_core::ClientResult;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordPatch {
    pub status: RecordStatus,
    pub authorization: Option<Authorization>,
    pub error: Option<String>,
}

impl RecordPatch {
    pub fn approved(authorization: Authorization) -> Self {
        Self {
            status: RecordStatus::Approved,
            authorization: Some(authorization),
            error: None,
        }
    }

    pub fn errored(detail: String) -> Self {
        Self {
            status: RecordStatus::Error,
            authorization: None,
            error: Some(detail),
        }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_config(&self, key: &str) -> ClientResult<Option<String>>;
    async fn save_config(&self, key: &str, value: &str) -> ClientResult<()>;
    /// Apply a submission outcome to a record. Transitions only ever go
    /// Pending to Approved or Pending to Error.
    async fn update_record(&self, id: u64, patch: RecordPatch) -> ClientResult<()>;
    async fn pending_ids(&self) -> ClientResult<Vec<u64>>;
    async fn set_pending(&self, ids: &[u64]) -> ClientResult<()>;
}

/// In-memory store, used by tests and by embedders that keep records in
/// their own database and just want the client to run.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    config: HashMap<String, String>,
    patches: HashMap<u64, RecordPatch>,
    pending: Vec<u64>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Last patch applied to a record, if any.
    pub fn patch_for(&self, id: u64) -> Option<RecordPatch> {
        self.inner.lock().unwrap().patches.get(&id).cloned()
    }

    /// Pending list without going through the async trait; test helper.
    pub fn pending_ids_sync(&self) -> Vec<u64> {
        self.inner.lock().unwrap().pending.clone()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_config(&self, key: &str) -> ClientResult<Option<String>> {
        Ok(self.inner.lock().unwrap().config.get(key).cloned())
    }

    async fn save_config(&self, key: &str, value: &str) -> ClientResult<()> {
        self.inner
            .lock()
            .unwrap()
            .config
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn update_record(&self, id: u64, patch: RecordPatch) -> ClientResult<()> {
        self.inner.lock().unwrap().patches.insert(id, patch);
        Ok(())
    }

    async fn pending_ids(&self) -> ClientResult<Vec<u64>> {
        Ok(self.inner.lock().unwrap().pending.clone())
    }

    async fn set_pending(&self, ids: &[u64]) -> ClientResult<()> {
        self.inner.lock().unwrap().pending = ids.to_vec();
        Ok(())
    }
}
