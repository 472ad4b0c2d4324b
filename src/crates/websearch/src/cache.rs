//! In-memory response cache for search queries.
//!
//! Keyed by a hash of the lowercased query so trivially re-phrased
//! lookups ("EV sales 2024" vs "ev sales 2024") hit the same entry.
//! Entries expire after a configurable TTL (one hour by default, matching
//! the upstream provider's freshness window).

use crate::types::SearchResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Maximum number of cached queries before the oldest entry is evicted.
const MAX_ENTRIES: usize = 256;

struct CacheEntry {
    results: Vec<SearchResult>,
    inserted_at: Instant,
}

/// Thread-safe query cache.
pub struct SearchCache {
    ttl: Duration,
    entries: Mutex<HashMap<u64, CacheEntry>>,
}

impl SearchCache {
    /// Create a cache with the default TTL.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// Create a cache with a custom TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Look up cached results for a query.
    pub fn get(&self, query: &str) -> Option<Vec<SearchResult>> {
        let key = Self::key(query);
        let mut entries = self.entries.lock();
        match entries.get(&key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.results.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Store results for a query.
    pub fn put(&self, query: &str, results: Vec<SearchResult>) {
        let key = Self::key(query);
        let mut entries = self.entries.lock();

        if entries.len() >= MAX_ENTRIES {
            entries.retain(|_, e| e.inserted_at.elapsed() < self.ttl);
            if entries.len() >= MAX_ENTRIES {
                if let Some((&oldest, _)) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted_at)
                {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                results,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn key(query: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        query.trim().to_lowercase().hash(&mut hasher);
        hasher.finish()
    }
}

impl Default for SearchCache {
    fn default() -> Self {
        Self::new()
    }
}
