//! Model handle cache
//!
//! Loaded handles are kept per model identifier so repeated runs do not
//! pay the load cost again. Concurrent requests for the same identifier
//! share one in-flight load; a failed load is not cached and the next
//! request tries again.
//!
//! Author: hephaex@gmail.com

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ewa_core::{EwaError, Result, Task};
use moka::future::Cache;
use serde::Serialize;

// ============================================================================
// Handle Cache
// ============================================================================

/// Cache of loaded model handles for one task
pub struct HandleCache<H: ?Sized + Send + Sync + 'static> {
    /// `None` when handle reuse is disabled
    cache: Option<Cache<String, Arc<H>>>,
    stats: Arc<CacheStats>,
}

impl<H: ?Sized + Send + Sync + 'static> HandleCache<H> {
    /// Create a cache holding up to `max_capacity` handles
    pub fn new(task: Task, max_capacity: u64) -> Self {
        Self {
            cache: Some(Cache::builder().max_capacity(max_capacity).build()),
            stats: Arc::new(CacheStats::new(task)),
        }
    }

    /// A pass-through cache that loads on every request
    pub fn disabled(task: Task) -> Self {
        Self {
            cache: None,
            stats: Arc::new(CacheStats::new(task)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Return the cached handle for `model_id`, loading it on first use
    pub async fn get_or_load<F, Fut>(&self, model_id: &str, load: F) -> Result<Arc<H>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<H>>>,
    {
        self.stats.record_request();

        let Some(cache) = &self.cache else {
            self.stats.record_load();
            return load().await;
        };

        let init = async {
            self.stats.record_load();
            load().await
        };

        cache
            .try_get_with(model_id.to_string(), init)
            .await
            .map_err(unshare)
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.as_ref().map(Cache::entry_count).unwrap_or(0)
    }
}

/// Recover an owned error from one shared by concurrent waiters
fn unshare(err: Arc<EwaError>) -> EwaError {
    Arc::try_unwrap(err).unwrap_or_else(|shared| match shared.as_ref() {
        EwaError::Fetch { url, reason } => EwaError::fetch(url.clone(), reason.clone()),
        EwaError::Input(message) => EwaError::Input(message.clone()),
        EwaError::Configuration(message) => EwaError::Configuration(message.clone()),
        EwaError::ModelLoad {
            task,
            model_id,
            reason,
        } => EwaError::model_load(*task, model_id.clone(), reason.clone()),
        EwaError::Inference { task, reason } => EwaError::inference(*task, reason.clone()),
        EwaError::LanguageDetection(message) => EwaError::LanguageDetection(message.clone()),
        EwaError::Other(err) => EwaError::Other(anyhow::anyhow!("{err}")),
    })
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters for one handle cache
#[derive(Debug)]
pub struct CacheStats {
    task: Task,
    requests: AtomicU64,
    loads: AtomicU64,
}

impl CacheStats {
    fn new(task: Task) -> Self {
        Self {
            task,
            requests: AtomicU64::new(0),
            loads: AtomicU64::new(0),
        }
    }

    fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    fn record_load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task(&self) -> Task {
        self.task
    }

    /// Handle requests served
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Loads actually started, successful or not
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn hits(&self) -> u64 {
        self.requests().saturating_sub(self.loads())
    }

    pub fn report(&self) -> CacheStatsReport {
        let requests = self.requests();
        let hits = self.hits();
        CacheStatsReport {
            task: self.task,
            requests,
            loads: self.loads(),
            hits,
            hit_rate: if requests > 0 {
                hits as f64 / requests as f64
            } else {
                0.0
            },
        }
    }
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsReport {
    pub task: Task,
    pub requests: u64,
    pub loads: u64,
    pub hits: u64,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    type Handle = dyn Fn() -> String + Send + Sync;

    fn handle(name: &'static str) -> Arc<Handle> {
        Arc::new(move || name.to_string())
    }

    #[tokio::test]
    async fn test_second_request_is_a_hit() {
        let cache: HandleCache<Handle> = HandleCache::new(Task::Entity, 4);

        let first = cache.get_or_load("a", || async { Ok(handle("a")) }).await.unwrap();
        let second = cache
            .get_or_load("a", || async { Ok(handle("other")) })
            .await
            .unwrap();

        assert_eq!(first(), "a");
        assert_eq!(second(), "a");
        assert_eq!(cache.stats().loads(), 1);
        assert_eq!(cache.stats().hits(), 1);
    }

    #[tokio::test]
    async fn test_failed_load_not_cached() {
        let cache: HandleCache<Handle> = HandleCache::new(Task::Keyword, 4);

        let err = cache
            .get_or_load("m", || async {
                Err(EwaError::model_load(Task::Keyword, "m", "offline"))
            })
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EwaError::ModelLoad { task: Task::Keyword, .. }));

        let ok = cache.get_or_load("m", || async { Ok(handle("m")) }).await;
        assert!(ok.is_ok());
        assert_eq!(cache.stats().loads(), 2);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_loads() {
        let cache: HandleCache<Handle> = HandleCache::disabled(Task::Entity);

        for _ in 0..3 {
            cache.get_or_load("a", || async { Ok(handle("a")) }).await.unwrap();
        }
        assert!(!cache.is_enabled());
        assert_eq!(cache.stats().loads(), 3);
        assert_eq!(cache.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_load() {
        let cache: Arc<HandleCache<Handle>> = Arc::new(HandleCache::new(Task::Entity, 4));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    cache
                        .get_or_load("shared", || async {
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(handle("shared"))
                        })
                        .await
                        .map(|h| h())
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "shared");
        }
        assert_eq!(cache.stats().loads(), 1);
        assert_eq!(cache.stats().requests(), 8);
    }

    #[test]
    fn test_unshare_keeps_variant() {
        let shared = Arc::new(EwaError::model_load(Task::Entity, "x", "gone"));
        let _other = Arc::clone(&shared);

        let err = unshare(shared);
        assert!(matches!(err, EwaError::ModelLoad { ref model_id, .. } if model_id == "x"));
    }
}
