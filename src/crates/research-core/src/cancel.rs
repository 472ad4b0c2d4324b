//! Out-of-band cancellation signal.
//!
//! A keyed flag — "cancel research *session*" — set by the cancel
//! endpoint and polled by the engine at phase boundaries and inside the
//! event-drain loop. Entries expire after five minutes so a stale cancel
//! request can never kill a future run that reuses the session id.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Flag lifetime.
pub const CANCEL_TTL: Duration = Duration::from_secs(300);

/// Process-wide cancellation registry.
pub trait CancelSignal: Send + Sync {
    /// Request cancellation of a session. Idempotent.
    fn request_cancel(&self, session_id: &str);

    /// Whether cancellation was requested for a session.
    fn is_cancelled(&self, session_id: &str) -> bool;

    /// Clear the flag (called when a run starts).
    fn clear(&self, session_id: &str);
}

/// In-process cancel registry with TTL semantics.
///
/// The flag store is a seam: deployments that fan research out over
/// several processes can put the same trait over an external key/value
/// store without touching the engine.
pub struct MemoryCancelSignal {
    flags: DashMap<String, Instant>,
    ttl: Duration,
}

impl Default for MemoryCancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCancelSignal {
    /// Create a registry with the default TTL.
    pub fn new() -> Self {
        Self {
            flags: DashMap::new(),
            ttl: CANCEL_TTL,
        }
    }

    /// Create a registry with a custom TTL (used by tests).
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            flags: DashMap::new(),
            ttl,
        }
    }

    /// Shared handle.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl CancelSignal for MemoryCancelSignal {
    fn request_cancel(&self, session_id: &str) {
        info!(session_id, "cancellation requested");
        self.flags.insert(session_id.to_string(), Instant::now());
    }

    fn is_cancelled(&self, session_id: &str) -> bool {
        // The read guard must drop before the expired entry is removed.
        let expired = match self.flags.get(session_id) {
            Some(entry) => entry.elapsed() >= self.ttl,
            None => return false,
        };
        if expired {
            self.flags.remove(session_id);
            return false;
        }
        true
    }

    fn clear(&self, session_id: &str) {
        self.flags.remove(session_id);
    }
}
