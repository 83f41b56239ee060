//! Composite (AND/OR) filters authored by the user

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Filter, FilterOperator, FilterValue};
use crate::capabilities::PersistenceStore;
use crate::error::{CoreError, Result};

/// Storage key for the saved composite filters
pub const COMPOSITE_STORAGE_KEY: &str = "dashboardCompositeFilters";

/// How the sub-filters of a composite combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompositeOperator {
    #[default]
    And,
    Or,
}

/// One row of the authoring form, before validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubFilterDraft {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub op: String,
    #[serde(default)]
    pub value: String,
}

impl SubFilterDraft {
    pub fn new(field: impl Into<String>, op: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            op: op.into(),
            value: value.into(),
        }
    }
}

/// Unvalidated composite filter as submitted by the authoring surface
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompositeDraft {
    #[serde(default)]
    pub operator: CompositeOperator,
    #[serde(default)]
    pub filters: Vec<SubFilterDraft>,
}

/// A validated, single-level group of filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeFilter {
    pub operator: CompositeOperator,
    pub filters: Vec<Filter>,
}

impl CompositeFilter {
    pub fn matches(&self, record: &Value) -> bool {
        match self.operator {
            CompositeOperator::And => self.filters.iter().all(|f| f.matches(record)),
            CompositeOperator::Or => self.filters.iter().any(|f| f.matches(record)),
        }
    }
}

impl TryFrom<CompositeDraft> for CompositeFilter {
    type Error = CoreError;

    fn try_from(draft: CompositeDraft) -> Result<Self> {
        if draft.filters.is_empty() {
            return Err(CoreError::InvalidComposite(
                "at least one condition is required".to_string(),
            ));
        }

        let mut filters = Vec::with_capacity(draft.filters.len());
        for (idx, sub) in draft.filters.into_iter().enumerate() {
            let field = sub.field.trim();
            let value = sub.value.trim();
            if field.is_empty() {
                return Err(CoreError::InvalidComposite(format!(
                    "condition {} has no field",
                    idx + 1
                )));
            }
            if value.is_empty() {
                return Err(CoreError::InvalidComposite(format!(
                    "condition {} has no value",
                    idx + 1
                )));
            }
            let operator: FilterOperator = sub.op.parse()?;
            filters.push(Filter::new(field, FilterValue::from(value)).with_operator(operator));
        }

        Ok(Self {
            operator: draft.operator,
            filters,
        })
    }
}

/// Named composite filters saved by the user
pub struct CompositeFilterLibrary {
    store: Arc<dyn PersistenceStore>,
    entries: RwLock<IndexMap<String, CompositeFilter>>,
}

impl CompositeFilterLibrary {
    /// Create a library backed by `store`, reading any previously saved entries
    pub fn new(store: Arc<dyn PersistenceStore>) -> Self {
        let entries = match store.get_item(COMPOSITE_STORAGE_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("Discarding unreadable composite filters: {}", e);
                IndexMap::new()
            }),
            Ok(None) => IndexMap::new(),
            Err(e) => {
                tracing::warn!("Could not read composite filters: {}", e);
                IndexMap::new()
            }
        };

        Self {
            store,
            entries: RwLock::new(entries),
        }
    }

    /// Validate and save a draft under `name`.
    ///
    /// Invalid drafts are rejected and nothing is stored.
    pub fn save(&self, name: &str, draft: CompositeDraft) -> Result<CompositeFilter> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::InvalidComposite("a name is required".to_string()));
        }
        let composite = CompositeFilter::try_from(draft)?;

        self.entries.write().insert(name.to_string(), composite.clone());
        self.persist();
        tracing::info!("Saved composite filter '{}'", name);
        Ok(composite)
    }

    pub fn get(&self, name: &str) -> Option<CompositeFilter> {
        self.entries.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn remove(&self, name: &str) -> Option<CompositeFilter> {
        let removed = self.entries.write().shift_remove(name);
        if removed.is_some() {
            self.persist();
        }
        removed
    }

    fn persist(&self) {
        let entries = self.entries.read();
        let result = if entries.is_empty() {
            self.store.remove_item(COMPOSITE_STORAGE_KEY)
        } else {
            serde_json::to_string(&*entries)
                .map_err(CoreError::from)
                .and_then(|raw| self.store.set_item(COMPOSITE_STORAGE_KEY, &raw))
        };
        if let Err(e) = result {
            tracing::warn!("Could not persist composite filters: {}", e);
        }
    }
}
