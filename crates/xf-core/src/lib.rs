//! Cross-filter coordination core for the service-request dashboard
//!
//! This crate provides the event bus, the filter model, the debounced
//! Filter-State Manager and the chart registry shared by every page and
//! chart of a dashboard session.

pub mod capabilities;
pub mod config;
pub mod debounce;
pub mod error;
pub mod events;
pub mod filters;
pub mod registry;
pub mod state;

// Re-export commonly used types
pub use capabilities::{
    CacheInvalidator, Capabilities, MemoryStore, NoopInvalidator, NoopStore, PersistenceStore,
};
pub use config::{CacheSettings, DashboardConfig, FilterSettings, PageSettings};
pub use debounce::Debouncer;
pub use error::{CoreError, Result};
pub use events::{topics, EventBus, EventPayload, Subscription};
pub use filters::{
    CompositeDraft, CompositeFilter, CompositeFilterLibrary, CompositeOperator, Filter,
    FilterOperator, FilterSet, FilterValue, SubFilterDraft,
};
pub use registry::{
    ChartRegistration, ChartRegistry, FieldBinding, FieldHandler, FieldMapping, FieldMappingTable,
};
pub use state::{ApplyOptions, ApplyRequest, FilterStateManager, Transition};
