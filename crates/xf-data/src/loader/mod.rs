//! Fetch-layer contract and the cache-first loader

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use xf_core::FilterSet;

use crate::cache::FilterCache;
use crate::DataError;

/// Options passed to the fetch layer
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Allow the fetch layer to answer from its own response cache
    pub use_data_store: bool,
    pub ttl: Option<Duration>,
    /// Value to return when the request fails
    pub fallback: Option<Value>,
    /// Active filters rendered as request parameters
    pub params: Vec<(String, String)>,
}

/// HTTP data-fetching layer
#[async_trait]
pub trait DataLoader: Send + Sync {
    async fn load(&self, endpoint: &str, options: &LoadOptions) -> anyhow::Result<Value>;

    /// Drop the fetch layer's own cached responses
    fn invalidate(&self, _keys: &[String]) {}
}

/// Loader that consults the Filter-Cache before fetching
pub struct FilteredLoader {
    loader: Arc<dyn DataLoader>,
    cache: Arc<FilterCache>,
}

impl FilteredLoader {
    pub fn new(loader: Arc<dyn DataLoader>, cache: Arc<FilterCache>) -> Self {
        Self { loader, cache }
    }

    pub fn cache(&self) -> &Arc<FilterCache> {
        &self.cache
    }

    /// Load `endpoint` under `filters`.
    ///
    /// A cached result is returned unless `force_refresh` is set; fresh
    /// results are stored with the endpoint's ttl.
    pub async fn load(
        &self,
        endpoint: &str,
        filters: &FilterSet,
        force_refresh: bool,
    ) -> Result<Value, DataError> {
        if !force_refresh {
            if let Some(hit) = self.cache.get(filters.filters(), endpoint) {
                tracing::debug!("Cache hit for {} ({} filters)", endpoint, filters.len());
                return Ok(hit);
            }
        } else {
            self.loader.invalidate(&[endpoint.to_string()]);
        }

        let ttl = self.cache.policy().ttl_for(endpoint);
        let options = LoadOptions {
            use_data_store: !force_refresh,
            ttl: Some(ttl),
            fallback: None,
            params: filters.query_params(),
        };

        let data = self
            .loader
            .load(endpoint, &options)
            .await
            .map_err(|e| DataError::Load {
                endpoint: endpoint.to_string(),
                message: format!("{:#}", e),
            })?;

        self.cache.set(filters.filters(), endpoint, data.clone(), Some(ttl));
        tracing::info!("Loaded {} with {} filters", endpoint, filters.len());
        Ok(data)
    }

    /// Like [`FilteredLoader::load`], returning `fallback` on failure
    pub async fn load_or(
        &self,
        endpoint: &str,
        filters: &FilterSet,
        force_refresh: bool,
        fallback: Value,
    ) -> Value {
        match self.load(endpoint, filters, force_refresh).await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("{}; using fallback", e);
                fallback
            }
        }
    }

    /// Load and deserialize into `T`
    pub async fn load_as<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        filters: &FilterSet,
        force_refresh: bool,
    ) -> Result<T, DataError> {
        let data = self.load(endpoint, filters, force_refresh).await?;
        serde_json::from_value(data).map_err(|e| DataError::Decode {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use parking_lot::Mutex;
    use serde::Deserialize;
    use serde_json::json;
    use xf_core::Filter;

    #[derive(Default)]
    struct ScriptedLoader {
        calls: Mutex<Vec<(String, LoadOptions)>>,
        invalidated: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl DataLoader for ScriptedLoader {
        async fn load(&self, endpoint: &str, options: &LoadOptions) -> anyhow::Result<Value> {
            self.calls.lock().push((endpoint.to_string(), options.clone()));
            if self.fail {
                return Err(anyhow!("503 Service Unavailable"));
            }
            Ok(json!({ "endpoint": endpoint, "total": self.calls.lock().len() }))
        }

        fn invalidate(&self, keys: &[String]) {
            self.invalidated.lock().extend(keys.iter().cloned());
        }
    }

    fn filters() -> FilterSet {
        FilterSet::from_filters(vec![Filter::new("Status", "Aberto"), Filter::new("Tema", "Saude")])
    }

    #[tokio::test]
    async fn test_second_load_is_served_from_cache() {
        let loader = Arc::new(ScriptedLoader::default());
        let filtered = FilteredLoader::new(loader.clone(), Arc::new(FilterCache::default()));

        let first = filtered.load("/api/requests", &filters(), false).await.unwrap();
        let permuted = FilterSet::from_filters(vec![Filter::new("Tema", "Saude"), Filter::new("Status", "Aberto")]);
        let second = filtered.load("/api/requests", &permuted, false).await.unwrap();

        assert_eq!(first, second);
        let calls = loader.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].1.params,
            vec![
                ("Status".to_string(), "Aberto".to_string()),
                ("Tema".to_string(), "Saude".to_string()),
            ]
        );
        assert!(calls[0].1.use_data_store);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_cache() {
        let loader = Arc::new(ScriptedLoader::default());
        let filtered = FilteredLoader::new(loader.clone(), Arc::new(FilterCache::default()));

        filtered.load("/api/requests", &filters(), false).await.unwrap();
        let refreshed = filtered.load("/api/requests", &filters(), true).await.unwrap();

        assert_eq!(refreshed["total"], 2);
        assert_eq!(*loader.invalidated.lock(), vec!["/api/requests".to_string()]);
        assert!(!loader.calls.lock()[1].1.use_data_store);
    }

    #[tokio::test]
    async fn test_failure_reports_error_or_fallback() {
        let loader = Arc::new(ScriptedLoader {
            fail: true,
            ..Default::default()
        });
        let cache = Arc::new(FilterCache::default());
        let filtered = FilteredLoader::new(loader, Arc::clone(&cache));

        let err = filtered.load("/api/requests", &filters(), false).await.unwrap_err();
        assert!(matches!(err, DataError::Load { .. }));

        let value = filtered
            .load_or("/api/requests", &filters(), false, json!({ "total": 0 }))
            .await;
        assert_eq!(value, json!({ "total": 0 }));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_load_as_typed() {
        #[derive(Deserialize)]
        struct Summary {
            total: u64,
        }

        let filtered = FilteredLoader::new(Arc::new(ScriptedLoader::default()), Arc::new(FilterCache::default()));
        let summary: Summary = filtered.load_as("/api/dashboard/summary", &filters(), false).await.unwrap();
        assert_eq!(summary.total, 1);

        let err = filtered
            .load_as::<Vec<String>>("/api/dashboard/summary", &filters(), false)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DataError::Decode { .. }));
    }
}
