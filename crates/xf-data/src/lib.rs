//! Data access for the dashboard: the filter-result cache and the
//! cache-first loader in front of the HTTP fetch layer

pub mod cache;
pub mod loader;

use thiserror::Error;

// Re-exports
pub use cache::{cache_key, CacheEntry, CacheStats, FilterCache, TtlPolicy};
pub use loader::{DataLoader, FilteredLoader, LoadOptions};

/// Errors that can occur in data operations
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Failed to load {endpoint}: {message}")]
    Load { endpoint: String, message: String },

    #[error("Unexpected payload from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
}
