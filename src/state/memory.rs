//! In-process [`ClusterState`] for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::core::errors::{EraserError, Result};
use crate::state::ClusterState;
use crate::state::document::{ImageJob, StateSection, merge_patch};

/// Raw JSON documents keyed by run id, with a patch counter.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    documents: Mutex<HashMap<String, Value>>,
    patches: Mutex<Vec<(String, StateSection, Value)>>,
    fail_writes: Mutex<bool>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record.
    pub fn insert(&self, run_id: &str, job: &ImageJob) -> Result<()> {
        let value = serde_json::to_value(job)?;
        self.documents.lock().insert(run_id.to_string(), value);
        Ok(())
    }

    /// Every patch applied so far, in order.
    pub fn patches(&self) -> Vec<(String, StateSection, Value)> {
        self.patches.lock().clone()
    }

    /// Make every subsequent patch fail.
    pub fn fail_writes(&self) {
        *self.fail_writes.lock() = true;
    }

    /// Current record, if any.
    pub fn snapshot(&self, run_id: &str) -> Option<ImageJob> {
        self.documents
            .lock()
            .get(run_id)
            .and_then(|doc| serde_json::from_value(doc.clone()).ok())
    }
}

#[async_trait]
impl ClusterState for MemoryStateStore {
    async fn get(&self, run_id: &str) -> Result<ImageJob> {
        let doc = self
            .documents
            .lock()
            .get(run_id)
            .cloned()
            .ok_or_else(|| EraserError::state_io("get", run_id, "record does not exist"))?;
        Ok(serde_json::from_value(doc)?)
    }

    async fn patch_merge(&self, run_id: &str, section: StateSection, patch: &Value) -> Result<()> {
        if *self.fail_writes.lock() {
            return Err(EraserError::state_io("patch", run_id, "injected write failure"));
        }
        let mut documents = self.documents.lock();
        if section == StateSection::Status && !documents.contains_key(run_id) {
            return Err(EraserError::state_io("patch", run_id, "record does not exist"));
        }
        let doc = documents
            .entry(run_id.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        merge_patch(doc, &section.wrap(patch));
        drop(documents);
        self.patches
            .lock()
            .push((run_id.to_string(), section, patch.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn get_missing_record_is_state_error() {
        let store = MemoryStateStore::new();
        let err = store.get("run-1").await.unwrap_err();
        assert_eq!(err.code(), "ERA-2201");
    }

    #[tokio::test]
    async fn spec_patch_creates_record_status_patch_does_not() {
        let store = MemoryStateStore::new();
        assert!(
            store
                .patch_merge("run-1", StateSection::Status, &json!({"vulnerable": []}))
                .await
                .is_err()
        );
        store
            .patch_merge(
                "run-1",
                StateSection::Spec,
                &json!({"nodes": {"n1": [{"digest": "sha256:aaa"}]}}),
            )
            .await
            .unwrap();
        store
            .patch_merge(
                "run-1",
                StateSection::Status,
                &json!({"vulnerable": [{"digest": "sha256:aaa"}]}),
            )
            .await
            .unwrap();
        let job = store.get("run-1").await.unwrap();
        assert_eq!(job.status.vulnerable.len(), 1);
        assert_eq!(store.patches().len(), 2);
    }
}
