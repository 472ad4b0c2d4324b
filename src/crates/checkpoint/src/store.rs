//! The checkpoint storage trait.
//!
//! Backends persist a serializable snapshot of research state keyed by
//! session id, so long-running sessions can be paused, cancelled, and
//! resumed. One row per session: [`CheckpointStore::save`] is an upsert.

use crate::error::Result;
use crate::types::{CheckpointInfo, CheckpointSnapshot, CheckpointStatus};
use async_trait::async_trait;
use serde_json::Value;

/// Checkpoint persistence backend.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Upsert the checkpoint for a session, returning the checkpoint id.
    /// Saving resets the status to `running`.
    async fn save(&self, snapshot: &CheckpointSnapshot) -> Result<String>;

    /// Load the saved state blob for a session.
    async fn load(&self, session_id: &str) -> Result<Option<Value>>;

    /// Fetch checkpoint metadata (no state blob).
    async fn get_info(&self, session_id: &str) -> Result<Option<CheckpointInfo>>;

    /// List checkpoints, newest first, optionally filtered by user and
    /// status.
    async fn list(
        &self,
        user_id: Option<&str>,
        status: Option<CheckpointStatus>,
        limit: usize,
    ) -> Result<Vec<CheckpointInfo>>;

    /// Update the lifecycle status (and error message) of a session's
    /// checkpoint. Returns `false` when no checkpoint exists.
    async fn update_status(
        &self,
        session_id: &str,
        status: CheckpointStatus,
        error_message: Option<&str>,
    ) -> Result<bool>;

    /// Delete a session's checkpoint. Returns `false` when nothing was
    /// deleted; a missing checkpoint is not an error.
    async fn delete(&self, session_id: &str) -> Result<bool>;
}
