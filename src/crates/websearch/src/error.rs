//! Error types for the web-search adapter.

use thiserror::Error;

/// Result type for search operations.
pub type Result<T> = std::result::Result<T, SearchError>;

/// Errors that can occur when constructing or using a search client.
///
/// Transient network failures are deliberately *not* represented here:
/// the adapter collapses them into empty result sets so a flaky provider
/// can never abort a research run.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Client construction failed.
    #[error("Failed to build search client: {0}")]
    ClientError(String),

    /// The provider rejected the request outright (bad key, bad endpoint).
    #[error("Search provider rejected request: {0}")]
    ProviderError(String),
}
