use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::metrics::AppMetrics;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub resource_id: String,
    pub scope: String,
}

impl CacheKey {
    pub fn new(resource_id: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            scope: scope.into(),
        }
    }
}

/// Append-only memo of fetched collections.
///
/// Entries are never replaced or expired. The lock is not held while the
/// fetcher runs, so two concurrent misses on one key may both fetch; the
/// first stored value wins.
pub struct RequestCache<T> {
    name: &'static str,
    entries: RwLock<HashMap<CacheKey, Arc<Vec<T>>>>,
    metrics: Option<AppMetrics>,
}

impl<T> RequestCache<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: AppMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Return the stored collection for `(resource_id, scope)`, or run
    /// `fetcher` and store what it returns. Fetch errors are passed through
    /// and leave the cache untouched.
    pub async fn get<F, Fut>(&self, resource_id: &str, scope: &str, fetcher: F) -> Result<Arc<Vec<T>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        let key = CacheKey::new(resource_id, scope);

        if let Some(hit) = self.entries.read().await.get(&key).cloned() {
            debug!(cache = self.name, resource_id, scope, "cache hit");
            self.record("hit");
            return Ok(hit);
        }

        debug!(cache = self.name, resource_id, scope, "cache miss");
        self.record("miss");

        let fetched = match fetcher().await {
            Ok(items) => Arc::new(items),
            Err(err) => {
                self.record("rejected");
                return Err(err);
            }
        };

        let mut guard = self.entries.write().await;
        let stored = guard.entry(key).or_insert(fetched);
        Ok(Arc::clone(stored))
    }

    fn record(&self, result: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_lookup(self.name, result);
        }
    }
}
