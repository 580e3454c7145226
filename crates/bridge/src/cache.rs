// crates/bridge/src/cache.rs
//! Per-model cache of classification results.
//!
//! Two staleness policies apply. Inside the throttle window (10 s by
//! default) a cached entry is returned without any live call at all —
//! this protects the backend from classify blocks placed inside tight
//! forever-loops. After the window the bridge still issues a live call, but
//! carries the cached `classifierTimestamp` so the service can answer
//! "not modified" and the entry can be reused with a refreshed fetch time.
//!
//! Results flagged `random` (no trained model behind them) are never
//! stored: memoizing a degenerate answer would hide a model that has since
//! finished training.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use blockml_types::Classification;

/// A cached classification plus the local time it was fetched.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub result: Classification,
    pub fetched_at: Instant,
}

pub struct ResultCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    throttle_window: Duration,
}

impl ResultCache {
    pub fn new(throttle_window: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            throttle_window,
        }
    }

    /// Look up the entry for a cache key, fresh or stale.
    pub fn lookup(&self, key: &str) -> Option<CacheEntry> {
        match self.entries.read() {
            Ok(entries) => entries.get(key).cloned(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading result cache: {e}");
                None
            }
        }
    }

    /// True while the entry is inside the throttle window.
    pub fn is_fresh(&self, entry: &CacheEntry) -> bool {
        entry.fetched_at.elapsed() < self.throttle_window
    }

    /// Store a result, overwriting any previous entry for the key.
    ///
    /// Random results are dropped: every later call for this key must
    /// re-check the service rather than trust a made-up label.
    pub fn store(&self, key: &str, result: Classification) {
        if result.random {
            debug!(key, "not caching randomly selected result");
            return;
        }
        let entry = CacheEntry {
            result,
            fetched_at: Instant::now(),
        };
        match self.entries.write() {
            Ok(mut entries) => {
                entries.insert(key.to_string(), entry);
            }
            Err(e) => tracing::error!("RwLock poisoned writing result cache: {e}"),
        }
    }

    /// Refresh the fetch time of an existing entry after the service
    /// confirmed it is still current. Returns the refreshed entry.
    pub fn refresh(&self, key: &str) -> Option<CacheEntry> {
        match self.entries.write() {
            Ok(mut entries) => entries.get_mut(key).map(|entry| {
                entry.fetched_at = Instant::now();
                entry.clone()
            }),
            Err(e) => {
                tracing::error!("RwLock poisoned refreshing result cache: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn cat() -> Classification {
        Classification {
            class_name: "cat".into(),
            confidence: 81.2,
            classifier_timestamp: Some(Utc::now()),
            random: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn entry_is_fresh_inside_the_throttle_window() {
        let cache = ResultCache::new(Duration::from_secs(10));
        cache.store("3 7", cat());

        let entry = cache.lookup("3 7").unwrap();
        assert!(cache.is_fresh(&entry));

        tokio::time::advance(Duration::from_secs(11)).await;
        let entry = cache.lookup("3 7").unwrap();
        assert!(!cache.is_fresh(&entry));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_renews_the_window_without_touching_the_result() {
        let cache = ResultCache::new(Duration::from_secs(10));
        cache.store("3 7", cat());
        tokio::time::advance(Duration::from_secs(20)).await;

        let refreshed = cache.refresh("3 7").unwrap();
        assert!(cache.is_fresh(&refreshed));
        assert_eq!(refreshed.result.class_name, "cat");
        assert_eq!(refreshed.result.confidence, 81.2);
    }

    #[tokio::test]
    async fn random_results_are_never_stored() {
        let cache = ResultCache::new(Duration::from_secs(10));
        let mut result = cat();
        result.random = true;
        cache.store("3 7", result);
        assert!(cache.lookup("3 7").is_none());
    }

    #[tokio::test]
    async fn store_overwrites_the_previous_entry() {
        let cache = ResultCache::new(Duration::from_secs(10));
        cache.store("k", cat());
        let mut dog = cat();
        dog.class_name = "dog".into();
        cache.store("k", dog);
        assert_eq!(cache.lookup("k").unwrap().result.class_name, "dog");
    }
}
