//! Error types for the research engine.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the orchestrating engine and its agents.
///
/// Most failures inside a research run are deliberately *not* errors:
/// flaky searches, unparseable model replies, and broken generated code
/// degrade into empty results and `state.errors` entries so the run
/// always produces a report. `EngineError` is reserved for failures of
/// the machinery itself.
#[derive(Debug, Error)]
pub enum EngineError {
    /// LLM adapter failed beyond retry.
    #[error("LLM error: {0}")]
    Llm(#[from] llm::LlmError),

    /// Search adapter failed at the configuration level.
    #[error("Search error: {0}")]
    Search(#[from] websearch::SearchError),

    /// Checkpoint backend failed.
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] checkpoint::CheckpointError),

    /// State snapshot could not be serialized or restored.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Sandbox process could not be launched.
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    /// A spawned agent task failed to join.
    #[error("Agent task error: {0}")]
    TaskJoin(String),
}
