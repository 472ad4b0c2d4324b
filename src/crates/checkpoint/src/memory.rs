//! In-memory checkpoint backend.
//!
//! Keeps every checkpoint in a process-local map. Used by the test suite
//! and by embedders that do not need durability; the SQLite backend is
//! the production default.

use crate::error::Result;
use crate::store::CheckpointStore;
use crate::types::{CheckpointInfo, CheckpointSnapshot, CheckpointStatus};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Clone)]
struct StoredCheckpoint {
    info: CheckpointInfo,
    state: Value,
}

/// Non-durable checkpoint store backed by a `HashMap`.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<HashMap<String, StoredCheckpoint>>,
}

impl MemoryCheckpointStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored checkpoints.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, snapshot: &CheckpointSnapshot) -> Result<String> {
        let now = Utc::now().to_rfc3339();
        let mut entries = self.entries.lock();

        let entry = entries
            .entry(snapshot.session_id.clone())
            .and_modify(|existing| {
                existing.info.query = snapshot.query.clone();
                existing.info.phase = snapshot.phase.clone();
                existing.info.iteration = snapshot.iteration;
                existing.info.status = CheckpointStatus::Running;
                existing.info.updated_at = now.clone();
                existing.state = snapshot.state.clone();
            })
            .or_insert_with(|| StoredCheckpoint {
                info: CheckpointInfo {
                    id: Uuid::new_v4().to_string(),
                    session_id: snapshot.session_id.clone(),
                    user_id: snapshot.user_id.clone(),
                    query: snapshot.query.clone(),
                    phase: snapshot.phase.clone(),
                    iteration: snapshot.iteration,
                    status: CheckpointStatus::Running,
                    error_message: None,
                    created_at: now.clone(),
                    updated_at: now.clone(),
                },
                state: snapshot.state.clone(),
            });

        Ok(entry.info.id.clone())
    }

    async fn load(&self, session_id: &str) -> Result<Option<Value>> {
        Ok(self
            .entries
            .lock()
            .get(session_id)
            .map(|entry| entry.state.clone()))
    }

    async fn get_info(&self, session_id: &str) -> Result<Option<CheckpointInfo>> {
        Ok(self
            .entries
            .lock()
            .get(session_id)
            .map(|entry| entry.info.clone()))
    }

    async fn list(
        &self,
        user_id: Option<&str>,
        status: Option<CheckpointStatus>,
        limit: usize,
    ) -> Result<Vec<CheckpointInfo>> {
        let entries = self.entries.lock();
        let mut infos: Vec<CheckpointInfo> = entries
            .values()
            .filter(|entry| user_id.map_or(true, |u| entry.info.user_id.as_deref() == Some(u)))
            .filter(|entry| status.map_or(true, |s| entry.info.status == s))
            .map(|entry| entry.info.clone())
            .collect();

        infos.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        infos.truncate(limit);
        Ok(infos)
    }

    async fn update_status(
        &self,
        session_id: &str,
        status: CheckpointStatus,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let mut entries = self.entries.lock();
        match entries.get_mut(session_id) {
            Some(entry) => {
                entry.info.status = status;
                if let Some(message) = error_message {
                    entry.info.error_message = Some(message.to_string());
                }
                entry.info.updated_at = Utc::now().to_rfc3339();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        Ok(self.entries.lock().remove(session_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(session_id: &str, phase: &str, iteration: u32) -> CheckpointSnapshot {
        CheckpointSnapshot {
            session_id: session_id.to_string(),
            user_id: Some("user-1".to_string()),
            query: "EV market study".to_string(),
            phase: phase.to_string(),
            iteration,
            state: json!({"phase": phase, "facts": []}),
        }
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let store = MemoryCheckpointStore::new();
        store.save(&snapshot("s1", "planning", 0)).await.unwrap();

        let state = store.load("s1").await.unwrap().unwrap();
        assert_eq!(state["phase"], "planning");

        let info = store.get_info("s1").await.unwrap().unwrap();
        assert_eq!(info.phase, "planning");
        assert_eq!(info.status, CheckpointStatus::Running);
    }

    #[tokio::test]
    async fn test_save_is_an_upsert() {
        let store = MemoryCheckpointStore::new();
        let first_id = store.save(&snapshot("s1", "planning", 0)).await.unwrap();
        let second_id = store.save(&snapshot("s1", "writing", 1)).await.unwrap();

        assert_eq!(first_id, second_id);
        assert_eq!(store.len(), 1);

        let info = store.get_info("s1").await.unwrap().unwrap();
        assert_eq!(info.phase, "writing");
        assert_eq!(info.iteration, 1);
    }

    #[tokio::test]
    async fn test_save_twice_same_blob() {
        let store = MemoryCheckpointStore::new();
        let snap = snapshot("s1", "researching", 0);
        store.save(&snap).await.unwrap();
        let first = store.load("s1").await.unwrap().unwrap();
        store.save(&snap).await.unwrap();
        let second = store.load("s1").await.unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_update_status() {
        let store = MemoryCheckpointStore::new();
        store.save(&snapshot("s1", "reviewing", 1)).await.unwrap();

        let updated = store
            .update_status("s1", CheckpointStatus::Failed, Some("cancelled"))
            .await
            .unwrap();
        assert!(updated);

        let info = store.get_info("s1").await.unwrap().unwrap();
        assert_eq!(info.status, CheckpointStatus::Failed);
        assert_eq!(info.error_message.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_update_status_missing_session() {
        let store = MemoryCheckpointStore::new();
        let updated = store
            .update_status("ghost", CheckpointStatus::Completed, None)
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_an_error() {
        let store = MemoryCheckpointStore::new();
        assert!(!store.delete("ghost").await.unwrap());

        store.save(&snapshot("s1", "planning", 0)).await.unwrap();
        assert!(store.delete("s1").await.unwrap());
        assert!(!store.delete("s1").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_filters() {
        let store = MemoryCheckpointStore::new();
        store.save(&snapshot("s1", "planning", 0)).await.unwrap();
        store.save(&snapshot("s2", "writing", 0)).await.unwrap();
        store
            .update_status("s2", CheckpointStatus::Completed, None)
            .await
            .unwrap();

        let all = store.list(None, None, 10).await.unwrap();
        assert_eq!(all.len(), 2);

        let completed = store
            .list(None, Some(CheckpointStatus::Completed), 10)
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].session_id, "s2");

        let other_user = store.list(Some("user-2"), None, 10).await.unwrap();
        assert!(other_user.is_empty());

        let limited = store.list(None, None, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }
}
