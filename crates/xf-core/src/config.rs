//! Dashboard configuration
//!
//! Loaded from JSON; every field has a default so a partial file is valid.
//! Durations are written the humantime way (`"300ms"`, `"5m"`).

use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::registry::FieldMappingTable;

/// Default persistence key for the active filter set
pub const DEFAULT_STORAGE_KEY: &str = "dashboardFilters";

/// Complete configuration of the cross-filter core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub filters: FilterSettings,
    pub cache: CacheSettings,
    pub pages: PageSettings,
    /// Chart id -> logical field/operator
    pub charts: FieldMappingTable,
}

/// Filter-State Manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    #[serde(with = "humantime_duration")]
    pub debounce: Duration,

    /// Write the filter set to persistence after every transition
    pub persist: bool,

    pub storage_key: String,

    /// Restore persisted filters on `load()` instead of discarding them
    pub restore_on_load: bool,

    /// Cache keys invalidated on every committed transition
    pub dependent_cache_keys: Vec<String>,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            persist: false,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            restore_on_load: false,
            dependent_cache_keys: vec![
                "/api/dashboard/summary".to_string(),
                "/api/dashboard/charts".to_string(),
                "/api/requests".to_string(),
            ],
        }
    }
}

/// Filter-Cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    #[serde(with = "humantime_duration")]
    pub default_ttl: Duration,

    /// Endpoint -> ttl overriding the default
    #[serde(with = "humantime_duration_map")]
    pub endpoint_ttls: IndexMap<String, Duration>,

    #[serde(with = "humantime_duration")]
    pub sweep_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let mut endpoint_ttls = IndexMap::new();
        endpoint_ttls.insert("/api/dashboard/summary".to_string(), Duration::from_secs(60));
        endpoint_ttls.insert("/api/requests".to_string(), Duration::from_secs(120));

        Self {
            default_ttl: Duration::from_secs(5 * 60),
            endpoint_ttls,
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Page Auto-Connect settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PageSettings {
    #[serde(with = "humantime_duration")]
    pub debounce: Duration,
}

impl Default for PageSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
        }
    }
}

impl DashboardConfig {
    /// Parse a JSON document
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.filters.storage_key.trim().is_empty() {
            return Err(CoreError::Config("filters.storage_key must not be empty".to_string()));
        }
        if self.cache.sweep_interval.is_zero() {
            return Err(CoreError::Config("cache.sweep_interval must be positive".to_string()));
        }
        Ok(())
    }
}

mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

mod humantime_duration_map {
    use std::time::Duration;

    use indexmap::IndexMap;
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &IndexMap<String, Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(value.len()))?;
        for (key, ttl) in value {
            map.serialize_entry(key, &humantime::format_duration(*ttl).to_string())?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<IndexMap<String, Duration>, D::Error> {
        let raw = IndexMap::<String, String>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(key, ttl)| {
                humantime::parse_duration(&ttl)
                    .map(|ttl| (key, ttl))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DashboardConfig::default();
        assert_eq!(config.filters.debounce, Duration::from_millis(300));
        assert_eq!(config.filters.storage_key, "dashboardFilters");
        assert!(!config.filters.restore_on_load);
        assert_eq!(config.pages.debounce, Duration::from_millis(500));
        assert_eq!(config.cache.sweep_interval, Duration::from_secs(300));
        assert!(config.charts.get("slaChart").is_some());
    }

    #[test]
    fn test_partial_json_with_humantime_durations() {
        let config = DashboardConfig::from_json_str(
            r#"{
                "filters": { "debounce": "100ms", "persist": true },
                "cache": { "default_ttl": "2m", "endpoint_ttls": { "/api/heatmap": "30s" } },
                "charts": {
                    "statusChart": { "field": "Status", "operator": "eq" },
                    "slaChart": { "field": null }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.filters.debounce, Duration::from_millis(100));
        assert!(config.filters.persist);
        assert_eq!(config.filters.storage_key, DEFAULT_STORAGE_KEY);
        assert_eq!(config.cache.default_ttl, Duration::from_secs(120));
        assert_eq!(config.cache.endpoint_ttls["/api/heatmap"], Duration::from_secs(30));
        assert_eq!(config.pages.debounce, Duration::from_millis(500));
        assert_eq!(config.charts.len(), 2);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(DashboardConfig::from_json_str(r#"{ "filters": { "debounce": "soon" } }"#).is_err());
        assert!(matches!(
            DashboardConfig::from_json_str(r#"{ "filters": { "storage_key": " " } }"#),
            Err(CoreError::Config(_))
        ));
    }
}
