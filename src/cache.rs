//! # Response Cache
//! In-memory TTL cache for upstream payloads.
//!
//! An entry is usable strictly before its expiry instant. Expired entries are
//! treated as absent and removed on the read that finds them; a `put` simply
//! overwrites. There is no other eviction, so memory is bounded by the number
//! of distinct keys (page number × query parameters in practice).
//!
//! Values are stored as complete snapshots and cloned out, so readers see
//! either the old or the new entry, never a partial write. Use a cheap-clone
//! value type (`Arc<..>`) for large payloads.
//!
//! Keys are striped over [`SHARDS`] independently locked maps; a write only
//! holds the lock of its own key's shard.

use std::{
    collections::{hash_map::RandomState, HashMap},
    hash::BuildHasher,
    sync::RwLock,
    time::{Duration, Instant},
};

use metrics::counter;

const SHARDS: usize = 16;

type Shard<V> = RwLock<HashMap<String, CacheEntry<V>>>;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Thread-safe TTL cache keyed by string (usually the full upstream URL).
#[derive(Debug)]
pub struct ResponseCache<V> {
    name: &'static str,
    hasher: RandomState,
    shards: Box<[Shard<V>]>,
}

impl<V: Clone> ResponseCache<V> {
    /// `name` labels the hit/miss metrics (e.g. "hive", "cubecraft").
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            hasher: RandomState::new(),
            shards: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &str) -> &Shard<V> {
        let idx = self.hasher.hash_one(key) as usize % self.shards.len();
        &self.shards[idx]
    }

    /// Look up `key`. Returns `None` when the key is absent or expired.
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// Same as [`get`](Self::get) with an explicit clock reading.
    pub fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let shard = self.shard(key);
        let expired = {
            let entries = shard.read().unwrap_or_else(|p| p.into_inner());
            match entries.get(key) {
                Some(e) if now < e.expires_at => {
                    counter!("cache_hits_total", "cache" => self.name).increment(1);
                    return Some(e.value.clone());
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            let mut entries = shard.write().unwrap_or_else(|p| p.into_inner());
            // Someone may have refreshed it between the two locks.
            if entries.get(key).is_some_and(|e| now >= e.expires_at) {
                entries.remove(key);
            }
        }
        counter!("cache_misses_total", "cache" => self.name).increment(1);
        None
    }

    /// Store `value` under `key` for `ttl`. A zero TTL stores nothing.
    pub fn put(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.put_at(key, value, ttl, Instant::now());
    }

    pub fn put_at(&self, key: impl Into<String>, value: V, ttl: Duration, now: Instant) {
        if ttl.is_zero() {
            return;
        }
        let Some(expires_at) = now.checked_add(ttl) else {
            return;
        };
        let key = key.into();
        let mut entries = self.shard(&key).write().unwrap_or_else(|p| p.into_inner());
        entries.insert(key, CacheEntry { value, expires_at });
    }

    /// Number of stored entries, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().unwrap_or_else(|p| p.into_inner()).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
