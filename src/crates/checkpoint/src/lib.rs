//! Checkpoint persistence for deepcurrent research sessions.
//!
//! A checkpoint is a serializable snapshot of research state keyed by
//! session id, saved at every phase boundary so sessions survive pauses,
//! cancellations, and process restarts. The [`CheckpointStore`] trait is
//! the seam; [`SqliteCheckpointStore`] is the durable default and
//! [`MemoryCheckpointStore`] backs the test suite.
//!
//! Saving is always an upsert: one row per session, status reset to
//! `running`. Deleting a checkpoint that does not exist reports `false`
//! rather than failing — callers surface it as `{"success": false}`.

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;
pub mod types;

pub use error::{CheckpointError, Result};
pub use memory::MemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;
pub use store::CheckpointStore;
pub use types::{CheckpointInfo, CheckpointSnapshot, CheckpointStatus};
