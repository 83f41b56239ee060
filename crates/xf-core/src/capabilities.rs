//! Soft dependencies injected into the core
//!
//! Each capability has a no-op implementation so a component can always be
//! constructed, even when the real collaborator is unavailable.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::error::Result;

/// Key/value persistence (a `localStorage`-like store)
pub trait PersistenceStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    fn remove_item(&self, key: &str) -> Result<()>;
}

/// Invalidation hook for cached query results
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, keys: &[String]) -> Result<()>;
}

/// Soft dependencies handed to the Filter-State Manager
#[derive(Clone)]
pub struct Capabilities {
    pub persistence: Arc<dyn PersistenceStore>,
    pub invalidator: Arc<dyn CacheInvalidator>,
}

impl Capabilities {
    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceStore>) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_invalidator(mut self, invalidator: Arc<dyn CacheInvalidator>) -> Self {
        self.invalidator = invalidator;
        self
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            persistence: Arc::new(NoopStore),
            invalidator: Arc::new(NoopInvalidator),
        }
    }
}

/// Persistence that stores nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStore;

impl PersistenceStore for NoopStore {
    fn get_item(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn set_item(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    fn remove_item(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// Invalidator with no cache behind it
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInvalidator;

impl CacheInvalidator for NoopInvalidator {
    fn invalidate(&self, _keys: &[String]) -> Result<()> {
        Ok(())
    }
}

/// In-process persistence, scoped to the session
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<AHashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl PersistenceStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.items.write().remove(key);
        Ok(())
    }
}
