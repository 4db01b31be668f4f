//! Result Cache Module
//!
//! Caches paginated view results under a content-derived signature.
//!
//! ## Design
//!
//! - The key is the MD5 of the pagination triple and the final rendered query,
//!   so any change to authorization, filters or paging yields a new key.
//! - The cache is advisory. Store failures and undecodable payloads are logged
//!   and read as misses; writes that fail are dropped.
//! - Only non-empty results are written back.
//!
//! `MemoryCacheStore` is the in-process store: TTL per entry, LRU eviction at
//! a fixed capacity.

use crate::error::{ViewError, ViewResult};
use crate::model::PaginateWithQueryColumns;
use md5::{Digest, Md5};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Key-value store with per-entry expiry.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> ViewResult<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> ViewResult<()>;
}

/// Signature of a rendered query and its pagination.
///
/// `md5("{page_no}-{limit}-{page_size}{query}")` as 32 lowercase hex chars.
pub fn signature(page_no: i64, limit: i64, page_size: i64, rendered_query: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(format!("{page_no}-{limit}-{page_size}").as_bytes());
    hasher.update(rendered_query.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Typed, best-effort view over a `CacheStore`.
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        ResultCache { store }
    }

    /// Cached result for `key`, or `None` on miss or any store problem.
    pub fn get(&self, key: &str) -> Option<PaginateWithQueryColumns> {
        let bytes = match self.store.get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(cache_key = key, error = %e, "get data by cache failed");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(result) => {
                tracing::debug!(cache_key = key, "cache hit");
                Some(result)
            }
            Err(e) => {
                tracing::warn!(cache_key = key, error = %e, "unreadable cache entry");
                None
            }
        }
    }

    /// Store a non-empty result for `ttl_secs` seconds. Returns whether it was written.
    pub fn put(&self, key: &str, result: &PaginateWithQueryColumns, ttl_secs: u64) -> bool {
        if result.is_empty() || ttl_secs == 0 {
            return false;
        }
        let written = serde_json::to_vec(result)
            .map_err(ViewError::from)
            .and_then(|bytes| self.store.set(key, bytes, Duration::from_secs(ttl_secs)));
        match written {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(cache_key = key, error = %e, "set data to cache failed");
                false
            }
        }
    }
}

// ── In-process store ────────────────────────────────────────────────────────

/// Cache entry with expiry bookkeeping
#[derive(Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub created_at: Instant,
    pub last_accessed: Instant,
    /// Time-to-live (None = no expiration)
    pub ttl: Option<Duration>,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        CacheEntry {
            value,
            created_at: now,
            last_accessed: now,
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.ttl.is_some_and(|ttl| self.created_at.elapsed() >= ttl)
    }

    pub fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub size: usize,
    pub evictions: usize,
    pub expirations: usize,
}

impl CacheStats {
    /// Hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct MemoryState {
    entries: HashMap<String, CacheEntry<Vec<u8>>>,
    stats: CacheStats,
}

/// Thread-safe in-memory `CacheStore` with TTL and LRU eviction.
pub struct MemoryCacheStore {
    state: Mutex<MemoryState>,
    max_entries: usize,
}

impl MemoryCacheStore {
    pub fn new(max_entries: usize) -> Self {
        MemoryCacheStore {
            state: Mutex::new(MemoryState {
                entries: HashMap::new(),
                stats: CacheStats::default(),
            }),
            max_entries: max_entries.max(1),
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            size: state.entries.len(),
            ..state.stats.clone()
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    fn evict(state: &mut MemoryState) {
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(k, _)| k.clone())
            .collect();
        if !expired.is_empty() {
            for key in expired {
                state.entries.remove(&key);
                state.stats.expirations += 1;
            }
            return;
        }

        let lru = state
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(k, _)| k.clone());
        if let Some(key) = lru {
            state.entries.remove(&key);
            state.stats.evictions += 1;
        }
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        MemoryCacheStore::new(1000)
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> ViewResult<Option<Vec<u8>>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let expired = match state.entries.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.touch();
                let value = entry.value.clone();
                state.stats.hits += 1;
                return Ok(Some(value));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            state.entries.remove(key);
            state.stats.expirations += 1;
        }
        state.stats.misses += 1;
        Ok(None)
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> ViewResult<()> {
        let mut state = self.state.lock();
        if !state.entries.contains_key(key) && state.entries.len() >= self.max_entries {
            Self::evict(&mut state);
        }
        state
            .entries
            .insert(key.to_string(), CacheEntry::new(value, Some(ttl)));
        Ok(())
    }
}
