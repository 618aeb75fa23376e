//! Embedding cache keyed by a (text, model) fingerprint.
//!
//! Entries expire after `ttl`. When the cache holds more than `max_size`
//! entries, the ones with the highest
//! `(age since last access / ttl) * 1 / (1 + use count)` go first, so an
//! entry has to be both stale and rarely used to be evicted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use ragdb_core::config::CacheConfig;

pub type Fingerprint = blake3::Hash;

pub fn fingerprint(text: &str, model: &str) -> Fingerprint {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(text.len() as u64).to_le_bytes());
    hasher.update(text.as_bytes());
    hasher.update(model.as_bytes());
    hasher.finalize()
}

struct CachedEmbedding {
    embedding: Vec<f32>,
    created_at: Instant,
    /// Nanoseconds since the cache epoch.
    accessed_at: AtomicU64,
    use_count: AtomicU64,
}

struct CacheState {
    entries: HashMap<Fingerprint, CachedEmbedding>,
    last_cleanup: Instant,
}

pub struct EmbeddingCache {
    state: RwLock<CacheState>,
    max_size: usize,
    ttl: Duration,
    epoch: Instant,
}

impl EmbeddingCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            state: RwLock::new(CacheState { entries: HashMap::new(), last_cleanup: now }),
            max_size: max_size.max(1),
            ttl: ttl.max(Duration::from_millis(1)),
            epoch: now,
        }
    }

    pub fn from_config(cfg: &CacheConfig) -> Self {
        Self::new(cfg.max_size, Duration::from_secs(cfg.ttl_secs))
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn ticks(&self, at: Instant) -> u64 {
        u64::try_from(at.duration_since(self.epoch).as_nanos()).unwrap_or(u64::MAX)
    }

    /// Expired entries read as misses even before cleanup drops them.
    pub fn get(&self, text: &str, model: &str) -> Option<Vec<f32>> {
        let key = fingerprint(text, model);
        let now = Instant::now();
        let state = self.read();
        let entry = state.entries.get(&key)?;
        if now.duration_since(entry.created_at) > self.ttl {
            return None;
        }
        entry.accessed_at.store(self.ticks(now), Ordering::Relaxed);
        entry.use_count.fetch_add(1, Ordering::Relaxed);
        Some(entry.embedding.clone())
    }

    pub fn set(&self, text: &str, model: &str, embedding: Vec<f32>) {
        let key = fingerprint(text, model);
        let now = Instant::now();
        let mut state = self.write();
        if now.duration_since(state.last_cleanup) > self.ttl / 2 {
            self.cleanup_locked(&mut state, now);
        }
        state.entries.insert(
            key,
            CachedEmbedding {
                embedding,
                created_at: now,
                accessed_at: AtomicU64::new(self.ticks(now)),
                use_count: AtomicU64::new(0),
            },
        );
        if state.entries.len() > self.max_size {
            self.evict_locked(&mut state, now);
        }
    }

    /// Drop expired entries, then evict down to `max_size`.
    pub fn cleanup(&self) {
        let mut state = self.write();
        self.cleanup_locked(&mut state, Instant::now());
    }

    fn cleanup_locked(&self, state: &mut CacheState, now: Instant) {
        let before = state.entries.len();
        state.entries.retain(|_, e| now.duration_since(e.created_at) <= self.ttl);
        let expired = before - state.entries.len();
        let evicted = self.evict_locked(state, now);
        state.last_cleanup = now;
        if expired + evicted > 0 {
            tracing::debug!(expired, evicted, remaining = state.entries.len(), "embedding cache cleanup");
        }
    }

    fn eviction_score(&self, entry: &CachedEmbedding, now_ticks: u64) -> f64 {
        let accessed = entry.accessed_at.load(Ordering::Relaxed);
        #[allow(clippy::cast_precision_loss)]
        let age = now_ticks.saturating_sub(accessed) as f64;
        let ttl = self.ttl.as_nanos() as f64;
        #[allow(clippy::cast_precision_loss)]
        let uses = entry.use_count.load(Ordering::Relaxed) as f64;
        (age / ttl) * (1.0 / (1.0 + uses))
    }

    fn evict_locked(&self, state: &mut CacheState, now: Instant) -> usize {
        let excess = state.entries.len().saturating_sub(self.max_size);
        if excess == 0 {
            return 0;
        }
        let now_ticks = self.ticks(now);
        let mut scored: Vec<(Fingerprint, f64)> = state
            .entries
            .iter()
            .map(|(k, e)| (*k, self.eviction_score(e, now_ticks)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        for (key, _) in scored.into_iter().take(excess) {
            state.entries.remove(&key);
        }
        excess
    }

    /// Physically stored entries, including expired ones not yet cleaned.
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.write().entries.clear();
    }
}
