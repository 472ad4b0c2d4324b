//! Web-search adapter for the deepcurrent research engine.
//!
//! One operation: [`SearchClient::search`] — query-level web search with a
//! response-time cache. The [`HttpSearchClient`] speaks the Bocha-style
//! wire format (`{query, count, summary, freshness}` in,
//! `data.webPages.value` out) and swallows transient provider failures
//! into empty result sets.

pub mod cache;
pub mod client;
pub mod error;
pub mod types;

pub use cache::SearchCache;
pub use client::{HttpSearchClient, SearchClient, SearchConfig};
pub use error::{Result, SearchError};
pub use types::SearchResult;
