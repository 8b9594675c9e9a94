//! In-process TTL cache for ranked results.
//!
//! Payloads are stored serialized, so an entry is always written as one
//! value and a hit returns exactly the bytes that were stored. An entry that
//! no longer decodes is dropped and reported as a miss.
//!
//! Keys follow the pattern
//! `rec:{subject_id}:{top_k}:{context_digest}:{variant}:h{health_epoch}:w{weights_generation}`.

use crate::config::CacheConfig;
use crate::metrics;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Every input that can change a result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub subject_id: String,
    pub top_k: usize,
    pub context_digest: String,
    pub variant: String,
    /// Health registry epoch the result was computed under.
    pub health_epoch: u64,
    /// Fusion weights generation the result was computed under.
    pub weights_generation: u64,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rec:{}:{}:{}:{}:h{}:w{}",
            self.subject_id,
            self.top_k,
            self.context_digest,
            self.variant,
            self.health_epoch,
            self.weights_generation
        )
    }
}

#[derive(Debug)]
struct CacheEntry {
    payload: Vec<u8>,
    inserted_at: Instant,
    ttl: Duration,
    seq: u64,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) < self.ttl
    }
}

pub struct ResultCache<V> {
    entries: DashMap<CacheKey, CacheEntry>,
    default_ttl: Duration,
    capacity: usize,
    sweep_fraction: f32,
    seq: AtomicU64,
    sweeping: Mutex<()>,
    _payload: PhantomData<fn() -> V>,
}

impl<V> ResultCache<V>
where
    V: Serialize + DeserializeOwned,
{
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl: Duration::from_secs(config.ttl_seconds),
            capacity: config.capacity.max(1),
            sweep_fraction: config.sweep_fraction.clamp(0.01, 1.0),
            seq: AtomicU64::new(0),
            sweeping: Mutex::new(()),
            _payload: PhantomData,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Physically stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let now = Instant::now();
        let decoded = match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(serde_json::from_slice::<V>(&entry.payload)),
            Some(_) => None,
            None => {
                metrics::record_cache_event("miss", 1);
                return None;
            }
        };

        match decoded {
            Some(Ok(value)) => {
                metrics::record_cache_event("hit", 1);
                debug!(key = %key, "cache hit");
                Some(value)
            }
            Some(Err(e)) => {
                warn!(key = %key, error = %e, "dropping undecodable cache entry");
                self.entries.remove(key);
                metrics::record_cache_event("corrupt", 1);
                metrics::record_cache_event("miss", 1);
                None
            }
            None => {
                // expired: remove only if nobody replaced it meanwhile
                self.entries.remove_if(key, |_, entry| !entry.is_live(now));
                metrics::record_cache_event("evict", 1);
                metrics::record_cache_event("miss", 1);
                None
            }
        }
    }

    pub fn put(&self, key: CacheKey, payload: &V, ttl: Duration) {
        let payload = match serde_json::to_vec(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "cache payload not serializable, skipping");
                return;
            }
        };
        let entry = CacheEntry {
            payload,
            inserted_at: Instant::now(),
            ttl,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };
        self.entries.insert(key, entry);
        metrics::record_cache_event("store", 1);

        if self.entries.len() > self.capacity {
            self.sweep();
        }
    }

    /// Drop expired entries, then the oldest-inserted ones until the cache is
    /// `sweep_fraction` below capacity. Concurrent callers skip the sweep.
    pub fn sweep(&self) -> usize {
        let Some(_guard) = self.sweeping.try_lock() else {
            return 0;
        };

        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));

        let headroom = ((self.capacity as f32) * self.sweep_fraction).round().max(1.0) as usize;
        let target = self.capacity.saturating_sub(headroom);
        if self.entries.len() > target {
            let mut by_age: Vec<(u64, CacheKey)> = self
                .entries
                .iter()
                .map(|e| (e.value().seq, e.key().clone()))
                .collect();
            by_age.sort_unstable_by_key(|(seq, _)| *seq);

            let excess = self.entries.len() - target;
            for (seq, key) in by_age.into_iter().take(excess) {
                self.entries.remove_if(&key, |_, entry| entry.seq == seq);
            }
        }

        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            metrics::record_cache_event("evict", evicted as u64);
            debug!(evicted, remaining = self.entries.len(), "cache sweep");
        }
        evicted
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
