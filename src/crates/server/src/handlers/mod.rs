//! HTTP endpoint handlers.

pub mod checkpoints;
pub mod health;
pub mod research;

pub use checkpoints::{delete_checkpoint, get_checkpoint, list_checkpoints};
pub use health::health;
pub use research::{cancel_research, resume_research, stream_research_get, stream_research_post};
