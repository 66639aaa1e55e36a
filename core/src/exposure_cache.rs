//! Bounded TTL cache for exposure results.
//!
//! Keyed by `(root, as_of, param_hash)`. Each entry remembers the closure of
//! entities its traversal touched; a change to any holding or role profile
//! naming one of them evicts the entry.
//!
//! RULE: Correctness over hit rate. When in doubt, invalidate.

use crate::{
    exposure::{ExposureParams, ExposureResult},
    types::EntityId,
};
use chrono::NaiveDate;
use dashmap::DashMap;
use log::debug;
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1_024,
            ttl_secs: 300,
        }
    }
}

/// Hash of the parameters that shape an exposure answer. The walk budget is
/// left out: it only matters for results that are never cached.
pub fn param_hash(params: &ExposureParams) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(params.max_depth as u64).to_le_bytes());
    hasher.update(&params.min_pct.to_bits().to_le_bytes());
    hasher.update(&(params.max_rows as u64).to_le_bytes());
    hasher.update(&[params.stop_on_no_bo_data as u8]);
    *hasher.finalize().as_bytes()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub root: EntityId,
    pub as_of: NaiveDate,
    pub param_hash: [u8; 32],
}

impl CacheKey {
    pub fn new(root: &str, as_of: NaiveDate, params: &ExposureParams) -> Self {
        Self {
            root: root.to_string(),
            as_of,
            param_hash: param_hash(params),
        }
    }
}

struct CacheEntry {
    result: Arc<ExposureResult>,
    inserted_at: Instant,
    seq: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub entries: usize,
}

/// Safe to share across threads. Two callers racing on the same key both
/// compute; the second insert simply replaces the first.
pub struct ExposureCache {
    config: CacheConfig,
    entries: DashMap<CacheKey, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    next_seq: AtomicU64,
}

impl ExposureCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && self.config.max_entries > 0
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.ttl_secs)
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<ExposureResult>> {
        if !self.is_enabled() {
            return None;
        }
        let fresh = self.entries.get(key).and_then(|entry| {
            (entry.inserted_at.elapsed() < self.ttl()).then(|| Arc::clone(&entry.result))
        });
        match fresh {
            Some(result) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(result)
            }
            None => {
                // Expired entries go on first touch.
                self.entries
                    .remove_if(key, |_, e| e.inserted_at.elapsed() >= self.ttl());
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores `result` unless caching is off or the result is not cacheable.
    /// Returns the shared handle either way.
    pub fn insert(&self, key: CacheKey, result: ExposureResult) -> Arc<ExposureResult> {
        let result = Arc::new(result);
        if !self.is_enabled() || !result.is_cacheable() {
            return result;
        }
        if self.entries.len() >= self.config.max_entries && !self.entries.contains_key(&key) {
            self.evict_oldest();
        }
        self.entries.insert(
            key,
            CacheEntry {
                result: Arc::clone(&result),
                inserted_at: Instant::now(),
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            },
        );
        result
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.seq)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }

    /// Evict every entry whose traversal closure contains `entity_id`.
    pub fn invalidate_entity(&self, entity_id: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| !e.result.closure.contains(entity_id));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.invalidations
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!("Exposure cache: {removed} entries invalidated by change to {entity_id}");
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}
