//! Filter-result cache
//!
//! Entries are keyed by the normalized filter list plus the endpoint, so any
//! permutation of the same filters lands on the same entry. Expiry is checked
//! lazily on read and by a periodic sweep.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use xf_core::{CacheInvalidator, CacheSettings, Filter};

/// Derive the cache key for a filter list and endpoint.
///
/// Filters are stably sorted by field, then operator, then rendered value.
pub fn cache_key(filters: &[Filter], endpoint: &str) -> String {
    let mut normalized: Vec<(&str, &str, String)> = filters
        .iter()
        .map(|f| (f.field.as_str(), f.operator.as_str(), f.value.to_string()))
        .collect();
    normalized.sort();

    format!("{}|{}", endpoint, json!(normalized))
}

/// Time-to-live lookup with per-endpoint overrides
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    default_ttl: Duration,
    endpoint_ttls: AHashMap<String, Duration>,
}

impl TtlPolicy {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            endpoint_ttls: AHashMap::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>, ttl: Duration) -> Self {
        self.endpoint_ttls.insert(endpoint.into(), ttl);
        self
    }

    pub fn ttl_for(&self, endpoint: &str) -> Duration {
        self.endpoint_ttls
            .get(endpoint)
            .copied()
            .unwrap_or(self.default_ttl)
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::from(&CacheSettings::default())
    }
}

impl From<&CacheSettings> for TtlPolicy {
    fn from(settings: &CacheSettings) -> Self {
        settings
            .endpoint_ttls
            .iter()
            .fold(Self::new(settings.default_ttl), |policy, (endpoint, ttl)| {
                policy.with_endpoint(endpoint.clone(), *ttl)
            })
    }
}

/// One cached result
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub inserted_at: Instant,
    pub ttl: Duration,
    endpoint: String,
}

impl<T> CacheEntry<T> {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) > self.ttl
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Counters exposed for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Cache of filtered query results shared by every page
pub struct FilterCache<T = Value> {
    entries: RwLock<AHashMap<String, CacheEntry<T>>>,
    policy: TtlPolicy,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<T: Clone> FilterCache<T> {
    pub fn new(policy: TtlPolicy) -> Self {
        Self {
            entries: RwLock::new(AHashMap::new()),
            policy,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    /// Look up a result; expired entries are evicted and reported as a miss
    pub fn get(&self, filters: &[Filter], endpoint: &str) -> Option<T> {
        let key = cache_key(filters, endpoint);
        let now = Instant::now();

        {
            let entries = self.entries.read();
            match entries.get(&key) {
                Some(entry) if !entry.is_expired(now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.data.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        let mut entries = self.entries.write();
        // Re-check under the write lock; a concurrent set may have refreshed it
        if entries.get(&key).map(|e| e.is_expired(now)).unwrap_or(false) {
            entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Evicted expired cache entry for {}", endpoint);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a result, using the endpoint's ttl unless overridden
    pub fn set(&self, filters: &[Filter], endpoint: &str, data: T, ttl: Option<Duration>) {
        let entry = CacheEntry {
            data,
            inserted_at: Instant::now(),
            ttl: ttl.unwrap_or_else(|| self.policy.ttl_for(endpoint)),
            endpoint: endpoint.to_string(),
        };
        self.entries.write().insert(cache_key(filters, endpoint), entry);
    }

    /// Remove entries for one endpoint, or everything when `None`
    pub fn invalidate(&self, endpoint: Option<&str>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        match endpoint {
            Some(endpoint) => entries.retain(|_, entry| entry.endpoint != endpoint),
            None => entries.clear(),
        }
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!("Invalidated {} cache entries ({})", removed, endpoint.unwrap_or("all"));
        }
        removed
    }

    /// Remove every expired entry
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> FilterCache<T> {
    /// Run `sweep_expired` every `every` until the cache is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(live) = cache.upgrade() else {
                    break;
                };
                let removed = live.sweep_expired();
                if removed > 0 {
                    tracing::debug!("Cache sweep removed {} expired entries", removed);
                }
            }
        })
    }
}

impl<T: Clone> Default for FilterCache<T> {
    fn default() -> Self {
        Self::new(TtlPolicy::default())
    }
}

impl<T: Clone + Send + Sync> CacheInvalidator for FilterCache<T> {
    fn invalidate(&self, keys: &[String]) -> xf_core::Result<()> {
        for key in keys {
            FilterCache::<T>::invalidate(self, Some(key.as_str()));
        }
        Ok(())
    }
}
