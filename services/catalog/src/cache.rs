//! Process-wide response cache for the read API.
//!
//! Cluster writes change what the cached list endpoints return, so stores call
//! every registered [`InvalidationHook`] after a cluster is created or deleted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

/// Called by a store after a write that stales cached responses.
pub trait InvalidationHook: Send + Sync {
    fn invalidate(&self);
}

/// Hooks registered on a store.
#[derive(Clone, Default)]
pub struct Hooks {
    hooks: Arc<Mutex<Vec<Arc<dyn InvalidationHook>>>>,
}

impl Hooks {
    pub fn register(&self, hook: Arc<dyn InvalidationHook>) {
        recover(&self.hooks).push(hook);
    }

    pub fn fire(&self) {
        let hooks = recover(&self.hooks).clone();
        for hook in hooks {
            hook.invalidate();
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = recover(&self.hooks).len();
        f.debug_struct("Hooks").field("count", &count).finish()
    }
}

/// TTL cache of serialized responses keyed by request path and query.
#[derive(Debug)]
pub struct ResponseCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, serde_json::Value)>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let entries = recover(&self.entries);
        let (stored_at, value) = entries.get(key)?;
        if stored_at.elapsed() < self.ttl {
            Some(value.clone())
        } else {
            None
        }
    }

    pub fn put(&self, key: &str, value: serde_json::Value) {
        let mut entries = recover(&self.entries);
        entries.retain(|_, (stored_at, _)| stored_at.elapsed() < self.ttl);
        entries.insert(key.to_string(), (Instant::now(), value));
    }

    pub fn clear(&self) {
        let mut entries = recover(&self.entries);
        debug!(entries = entries.len(), "response cache cleared");
        entries.clear();
    }

    pub fn len(&self) -> usize {
        recover(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A panic while holding the lock leaves the data usable, so keep serving it.
fn recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InvalidationHook for ResponseCache {
    fn invalidate(&self) {
        self.clear();
    }
}
