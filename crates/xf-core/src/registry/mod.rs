//! Chart registry and field-mapping table
//!
//! The field-mapping table is supplied from configuration and says which
//! logical field (and operator) a chart stands for. A chart missing from the
//! table, or mapped to `field: null`, is not filterable.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::{EventBus, EventPayload};
use crate::filters::{FilterOperator, FilterValue};

/// One row of the field-mapping table
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldMapping {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub operator: Option<FilterOperator>,
}

impl FieldMapping {
    pub fn new(field: impl Into<String>, operator: FilterOperator) -> Self {
        Self {
            field: Some(field.into()),
            operator: Some(operator),
        }
    }

    /// Explicitly non-filterable entry
    pub fn none() -> Self {
        Self::default()
    }
}

/// Chart id -> field mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMappingTable(IndexMap<String, FieldMapping>);

impl FieldMappingTable {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Builder-style insert
    pub fn with(mut self, chart_id: impl Into<String>, mapping: FieldMapping) -> Self {
        self.0.insert(chart_id.into(), mapping);
        self
    }

    pub fn insert(&mut self, chart_id: impl Into<String>, mapping: FieldMapping) {
        self.0.insert(chart_id.into(), mapping);
    }

    pub fn get(&self, chart_id: &str) -> Option<&FieldMapping> {
        self.0.get(chart_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldMapping)> {
        self.0.iter()
    }
}

impl Default for FieldMappingTable {
    /// Mapping for the service-request dashboard charts
    fn default() -> Self {
        Self::new()
            .with("statusChart", FieldMapping::new("Status", FilterOperator::Eq))
            .with("temaChart", FieldMapping::new("Tema", FilterOperator::Eq))
            .with("subtemaChart", FieldMapping::new("Subtema", FilterOperator::Eq))
            .with("orgaoChart", FieldMapping::new("Orgao", FilterOperator::Eq))
            .with("bairroChart", FieldMapping::new("Bairro", FilterOperator::Eq))
            .with("canalChart", FieldMapping::new("Canal", FilterOperator::Eq))
            .with("prazoChart", FieldMapping::new("Prazo", FilterOperator::Gte))
            .with("slaChart", FieldMapping::none())
    }
}

/// How a clicked label becomes a filter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldHandler {
    /// Discrete categories, compared for equality or membership
    Categorical,
    /// Ordered values (numbers or ISO dates)
    Range,
    /// Free text matched by substring
    Text,
}

impl FieldHandler {
    pub fn for_operator(operator: FilterOperator) -> Self {
        match operator {
            FilterOperator::Eq | FilterOperator::In => FieldHandler::Categorical,
            FilterOperator::Contains => FieldHandler::Text,
            FilterOperator::Gte | FilterOperator::Lte | FilterOperator::Gt | FilterOperator::Lt => {
                FieldHandler::Range
            }
        }
    }

    /// Convert a rendered label into a filter value
    pub fn value_for(&self, label: &str) -> Option<FilterValue> {
        let label = label.trim();
        if label.is_empty() {
            return None;
        }
        match self {
            FieldHandler::Range => Some(
                label
                    .parse::<f64>()
                    .map(FilterValue::Number)
                    .unwrap_or_else(|_| FilterValue::from(label)),
            ),
            FieldHandler::Categorical | FieldHandler::Text => Some(FilterValue::from(label)),
        }
    }
}

/// Field mapping resolved once at registration time
#[derive(Debug, Clone, PartialEq)]
pub struct FieldBinding {
    pub field: String,
    pub operator: FilterOperator,
    pub handler: FieldHandler,
}

impl FieldBinding {
    fn resolve(mapping: Option<&FieldMapping>) -> Option<Self> {
        let mapping = mapping?;
        let field = mapping.field.clone()?;
        let operator = mapping.operator.unwrap_or_default();
        Some(Self {
            field,
            operator,
            handler: FieldHandler::for_operator(operator),
        })
    }
}

/// A registered chart
#[derive(Debug, Clone)]
pub struct ChartRegistration {
    pub id: String,
    /// Opaque render configuration
    pub config: Value,
    pub created_at: DateTime<Utc>,
    /// `None` for non-filterable charts
    pub binding: Option<FieldBinding>,
}

impl ChartRegistration {
    pub fn is_filterable(&self) -> bool {
        self.binding.is_some()
    }
}

/// Registry of rendered charts
pub struct ChartRegistry {
    bus: Arc<EventBus>,
    mappings: FieldMappingTable,
    charts: RwLock<IndexMap<String, ChartRegistration>>,
}

impl ChartRegistry {
    pub fn new(bus: Arc<EventBus>, mappings: FieldMappingTable) -> Self {
        Self {
            bus,
            mappings,
            charts: RwLock::new(IndexMap::new()),
        }
    }

    /// Register (or replace) a chart and announce it
    pub fn register(&self, chart_id: impl Into<String>, config: Value) -> ChartRegistration {
        let chart_id = chart_id.into();
        let registration = ChartRegistration {
            id: chart_id.clone(),
            config: config.clone(),
            created_at: Utc::now(),
            binding: FieldBinding::resolve(self.mappings.get(&chart_id)),
        };

        if registration.binding.is_none() {
            tracing::debug!("Chart '{}' registered as non-filterable", chart_id);
        }
        self.charts.write().insert(chart_id.clone(), registration.clone());

        self.bus.publish(EventPayload::ChartRegistered {
            chart_id,
            config: Some(config),
        });
        registration
    }

    /// Remove a chart; returns whether it was registered
    pub fn unregister(&self, chart_id: &str) -> bool {
        let removed = self.charts.write().shift_remove(chart_id).is_some();
        if removed {
            self.bus.publish(EventPayload::ChartUnregistered {
                chart_id: chart_id.to_string(),
            });
        }
        removed
    }

    pub fn get(&self, chart_id: &str) -> Option<ChartRegistration> {
        self.charts.read().get(chart_id).cloned()
    }

    /// All registrations, in registration order
    pub fn get_all(&self) -> Vec<ChartRegistration> {
        self.charts.read().values().cloned().collect()
    }

    /// Registered charts whose mapping-table entry targets `field`
    pub fn get_by_field(&self, field: &str) -> Vec<ChartRegistration> {
        let charts = self.charts.read();
        self.mappings
            .iter()
            .filter(|(_, mapping)| mapping.field.as_deref() == Some(field))
            .filter_map(|(chart_id, _)| charts.get(chart_id).cloned())
            .collect()
    }

    /// Mapping-table entry for a filterable chart
    pub fn get_field_mapping(&self, chart_id: &str) -> Option<FieldMapping> {
        self.mappings
            .get(chart_id)
            .filter(|mapping| mapping.field.is_some())
            .cloned()
    }

    /// Resolved binding for a chart, registered or not
    pub fn binding_for(&self, chart_id: &str) -> Option<FieldBinding> {
        match self.charts.read().get(chart_id) {
            Some(registration) => registration.binding.clone(),
            None => FieldBinding::resolve(self.mappings.get(chart_id)),
        }
    }

    pub fn len(&self) -> usize {
        self.charts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.charts.read().is_empty()
    }
}
