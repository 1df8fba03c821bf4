// ============================================================================
// PER-CYCLE RESULT CACHE
// ============================================================================
// Maps a series cache key to the single in-flight (or finished) extraction
// for that key. The first caller creates the extraction future; every later
// caller clones the same shared future and awaits it. Failures are stored
// like successes and are never retried within the cycle.
// ============================================================================

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};

use crate::error::ExtractError;
use crate::types::{CacheKey, MetricResponse};

/// Stored result of one extraction.
pub type ExtractOutcome = Result<Arc<MetricResponse>, ExtractError>;

type SharedExtraction = Shared<BoxFuture<'static, ExtractOutcome>>;

/// Cache lookups during one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups served by an existing entry
    pub hits: u64,
    /// Lookups that started an extraction
    pub misses: u64,
}

/// Result cache owned by one cycle and dropped with it.
#[derive(Default)]
pub struct ResultCache {
    entries: DashMap<CacheKey, SharedExtraction>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `key`, running `extract` only if no caller has done so yet.
    ///
    /// The extraction future is shared: if the caller that started it is
    /// dropped, the next waiter drives it to completion.
    pub async fn get_or_extract<F, Fut>(&self, key: &CacheKey, extract: F) -> ExtractOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ExtractOutcome> + Send + 'static,
    {
        let pending = match self.entries.entry(key.clone()) {
            Entry::Occupied(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let shared = extract().boxed().shared();
                entry.insert(shared.clone());
                shared
            }
        };
        pending.await
    }

    /// Finished outcome for `key`, if its extraction has completed.
    pub fn peek(&self, key: &CacheKey) -> Option<ExtractOutcome> {
        self.entries.get(key).and_then(|entry| entry.peek().cloned())
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
        }
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("entries", &self.entries.len())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MetricValue, SeriesId, Timestamp};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn response(series: &str, value: f64) -> Arc<MetricResponse> {
        Arc::new(MetricResponse::new(
            series.into(),
            MetricValue::Scalar(value),
            "test",
            Timestamp::EPOCH,
        ))
    }

    fn counting_extract(
        calls: &Arc<AtomicUsize>,
        series: &'static str,
    ) -> impl FnOnce() -> BoxFuture<'static, ExtractOutcome> {
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(response(series, 1.0))
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_first_access_extracts_once() {
        let cache = ResultCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = SeriesId::new("cpu.load");

        let (a, b, c) = tokio::join!(
            cache.get_or_extract(&key, counting_extract(&calls, "cpu.load")),
            cache.get_or_extract(&key, counting_extract(&calls, "cpu.load")),
            cache.get_or_extract(&key, counting_extract(&calls, "cpu.load")),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&b, &c));
        assert_eq!(cache.stats(), CacheStats { hits: 2, misses: 1 });
    }

    #[tokio::test]
    async fn test_failure_is_cached() {
        let cache = ResultCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = SeriesId::new("missing");

        for _ in 0..3 {
            let calls = calls.clone();
            let key_for_error = key.clone();
            let outcome = cache
                .get_or_extract(&key, move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Err(ExtractError::not_found("graphite", key_for_error)) }
                })
                .await;
            assert!(matches!(outcome, Err(ExtractError::SeriesNotFound { .. })));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.peek(&key).unwrap().is_err());
    }

    #[tokio::test]
    async fn test_distinct_keys_extract_independently() {
        let cache = ResultCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let a = cache
            .get_or_extract(&"a".into(), counting_extract(&calls, "a"))
            .await
            .unwrap();
        let b = cache
            .get_or_extract(&"b".into(), counting_extract(&calls, "b"))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(a.series().as_str(), "a");
        assert_eq!(b.series().as_str(), "b");
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_arrival_survives_cancelled_first_caller() {
        let cache = Arc::new(ResultCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let key = SeriesId::new("mem.used");

        let first = {
            let cache = cache.clone();
            let calls = calls.clone();
            let key = key.clone();
            tokio::spawn(async move {
                cache
                    .get_or_extract(&key, counting_extract(&calls, "mem.used"))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        first.abort();

        let outcome = cache
            .get_or_extract(&key, counting_extract(&calls, "mem.used"))
            .await;
        assert!(outcome.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
