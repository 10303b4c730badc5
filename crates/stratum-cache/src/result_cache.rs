use dashmap::DashMap;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stratum_core::{CacheSettings, LayerResult};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: LayerResult,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

/// Cache performance counters.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}

/// Confidence-aware result cache keyed by request fingerprint.
///
/// Entries die by TTL or by LRU pressure, whichever comes first. Expired
/// entries are purged lazily on access and proactively by the sweeper task
/// so memory stays bounded between accesses.
pub struct ResultCache {
    entries: DashMap<String, CacheEntry>,
    /// Front = least recently used. May hold stale keys; eviction skips them.
    lru: Mutex<VecDeque<String>>,
    settings: CacheSettings,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResultCache {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            entries: DashMap::new(),
            lru: Mutex::new(VecDeque::new()),
            settings,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<LayerResult> {
        if !self.settings.enabled {
            return None;
        }
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                let value = entry.value.clone();
                drop(entry);
                self.touch(key);
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(key, "cache hit");
                Some(value)
            }
            Some(entry) => {
                drop(entry);
                // Lazy purge on access.
                self.entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert under the configured TTL, or a caller-provided one (warmed
    /// entries get longer lifetimes).
    pub fn insert(&self, key: impl Into<String>, value: LayerResult, ttl: Option<Duration>) {
        if !self.settings.enabled {
            return;
        }
        let key = key.into();
        self.evict_to_capacity();
        self.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                created_at: Instant::now(),
                ttl: ttl.unwrap_or_else(|| self.settings.ttl()),
            },
        );
        self.touch(&key);
    }

    pub fn get_many(&self, keys: &[String]) -> Vec<Option<LayerResult>> {
        keys.iter().map(|k| self.get(k)).collect()
    }

    pub fn set_many(&self, pairs: Vec<(String, LayerResult)>, ttl: Option<Duration>) {
        for (key, value) in pairs {
            self.insert(key, value, ttl);
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Linear scan + regex test. Acceptable because cache size is bounded.
    pub fn invalidate_pattern(&self, pattern: &Regex) -> usize {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|e| pattern.is_match(e.key()))
            .map(|e| e.key().clone())
            .collect();
        let count = doomed.len();
        for key in doomed {
            self.entries.remove(&key);
        }
        if count > 0 {
            debug!(count, pattern = %pattern, "invalidated cache entries");
        }
        count
    }

    /// Drop every TTL-expired entry. Returns how many were purged.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let purged = before - self.entries.len();
        if purged > 0 {
            debug!(purged, "swept expired cache entries");
        }
        purged
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.lru.lock().clear();
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
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    /// Background sweep purging expired entries on a fixed interval.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cache.purge_expired();
            }
        })
    }

    fn touch(&self, key: &str) {
        let mut lru = self.lru.lock();
        lru.retain(|k| k != key);
        lru.push_back(key.to_string());
    }

    fn evict_to_capacity(&self) {
        if self.entries.len() < self.settings.max_size {
            return;
        }
        let mut lru = self.lru.lock();
        while self.entries.len() >= self.settings.max_size {
            let Some(oldest) = lru.pop_front() else {
                break;
            };
            if self.entries.remove(&oldest).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                trace!(key = %oldest, "evicted by LRU pressure");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::{LayerKind, LayerPayload};

    fn settings(max_size: usize, ttl_seconds: u64) -> CacheSettings {
        CacheSettings {
            enabled: true,
            max_size,
            ttl_seconds,
            sweep_interval_seconds: 60,
        }
    }

    fn result(confidence: f64) -> LayerResult {
        LayerResult::step(
            LayerKind::FastSearch,
            LayerPayload::Empty,
            confidence,
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = ResultCache::new(settings(10, 300));
        cache.insert("k1", result(0.7), None);
        let got = cache.get("k1").expect("entry should be present");
        assert_eq!(got.confidence, 0.7);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let cache = ResultCache::new(settings(10, 300));
        cache.insert("k1", result(0.7), None);
        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(cache.get("k1").is_none());
        // Lazy purge removed the body too.
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn caller_ttl_overrides_default() {
        let cache = ResultCache::new(settings(10, 300));
        cache.insert("warm", result(0.9), Some(Duration::from_secs(3600)));
        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(cache.get("warm").is_some());
    }

    #[tokio::test]
    async fn lru_pressure_evicts_oldest_first() {
        let cache = ResultCache::new(settings(3, 300));
        cache.insert("a", result(0.1), None);
        cache.insert("b", result(0.2), None);
        cache.insert("c", result(0.3), None);
        // Refresh "a" so "b" is now the oldest.
        cache.get("a");
        cache.insert("d", result(0.4), None);

        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert!(cache.get("d").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_purges_expired_entries() {
        let cache = Arc::new(ResultCache::new(settings(10, 1)));
        cache.insert("k1", result(0.5), None);
        cache.insert("k2", result(0.5), None);
        let handle = cache.spawn_sweeper(Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(61)).await;
        // Give the sweeper a turn on the (paused) runtime.
        tokio::task::yield_now().await;

        assert_eq!(cache.len(), 0);
        handle.abort();
    }

    #[tokio::test]
    async fn invalidate_pattern_removes_matching_keys() {
        let cache = ResultCache::new(settings(10, 300));
        cache.insert("definition:foo", result(0.5), None);
        cache.insert("definition:bar", result(0.5), None);
        cache.insert("reference:foo", result(0.5), None);

        let removed = cache.invalidate_pattern(&Regex::new("^definition:").unwrap());
        assert_eq!(removed, 2);
        assert!(cache.get("definition:foo").is_none());
        assert!(cache.get("reference:foo").is_some());
    }

    #[tokio::test]
    async fn batch_get_and_set() {
        let cache = ResultCache::new(settings(10, 300));
        cache.set_many(
            vec![("a".to_string(), result(0.1)), ("b".to_string(), result(0.2))],
            None,
        );
        let got = cache.get_many(&["a".to_string(), "missing".to_string(), "b".to_string()]);
        assert!(got[0].is_some());
        assert!(got[1].is_none());
        assert!(got[2].is_some());
    }

    #[tokio::test]
    async fn disabled_cache_never_stores() {
        let mut s = settings(10, 300);
        s.enabled = false;
        let cache = ResultCache::new(s);
        cache.insert("k", result(0.5), None);
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }
}
