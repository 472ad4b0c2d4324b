//! Checkpoint record types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a checkpointed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

impl CheckpointStatus {
    /// Stable string form used in the database column.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointStatus::Running => "running",
            CheckpointStatus::Paused => "paused",
            CheckpointStatus::Completed => "completed",
            CheckpointStatus::Failed => "failed",
        }
    }

    /// Parse from the database column.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(CheckpointStatus::Running),
            "paused" => Some(CheckpointStatus::Paused),
            "completed" => Some(CheckpointStatus::Completed),
            "failed" => Some(CheckpointStatus::Failed),
            _ => None,
        }
    }
}

/// Everything needed to persist one checkpoint.
///
/// The engine fills this from its typed research state; the store never
/// inspects `state` beyond treating it as a JSON blob, so the snapshot
/// round-trips even when state gains fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSnapshot {
    /// Session the checkpoint belongs to (upsert key).
    pub session_id: String,

    /// Owning user, when known.
    pub user_id: Option<String>,

    /// Original research question.
    pub query: String,

    /// Phase the session had reached.
    pub phase: String,

    /// Completed review cycles.
    pub iteration: u32,

    /// JSON projection of the research state.
    pub state: Value,
}

/// Checkpoint metadata without the state blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub id: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub query: String,
    pub phase: String,
    pub iteration: u32,
    pub status: CheckpointStatus,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            CheckpointStatus::Running,
            CheckpointStatus::Paused,
            CheckpointStatus::Completed,
            CheckpointStatus::Failed,
        ] {
            assert_eq!(CheckpointStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CheckpointStatus::parse("bogus"), None);
    }

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&CheckpointStatus::Failed).unwrap();
        assert_eq!(json, "\"failed\"");
    }
}
