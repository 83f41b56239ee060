//! Event payloads carried by the bus

use serde_json::{json, Value};

use super::topics;
use crate::filters::{Filter, FilterValue};

/// Payload of one emitted event.
///
/// Filter lists are owned snapshots; listeners can never reach the
/// manager's live state through them.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    FilterApplied {
        field: String,
        value: FilterValue,
        chart_id: Option<String>,
        filters: Vec<Filter>,
    },
    FilterRemoved {
        field: String,
        value: FilterValue,
        filters: Option<Vec<Filter>>,
    },
    FilterCleared,
    ChartsUpdateRequested {
        filters: Vec<Filter>,
        active_field: Option<String>,
        active_value: Option<FilterValue>,
    },
    ChartRegistered {
        chart_id: String,
        config: Option<Value>,
    },
    ChartUnregistered {
        chart_id: String,
    },
    /// Application-defined payload for custom topics
    Custom(Value),
}

impl EventPayload {
    /// Topic this payload is published on
    pub fn topic(&self) -> &'static str {
        match self {
            EventPayload::FilterApplied { .. } => topics::FILTER_APPLIED,
            EventPayload::FilterRemoved { .. } => topics::FILTER_REMOVED,
            EventPayload::FilterCleared => topics::FILTER_CLEARED,
            EventPayload::ChartsUpdateRequested { .. } => topics::CHARTS_UPDATE_REQUESTED,
            EventPayload::ChartRegistered { .. } => topics::CHART_REGISTERED,
            EventPayload::ChartUnregistered { .. } => topics::CHART_UNREGISTERED,
            EventPayload::Custom(_) => "custom",
        }
    }

    /// Filter snapshot carried by the event, if any
    pub fn filters(&self) -> Option<&[Filter]> {
        match self {
            EventPayload::FilterApplied { filters, .. }
            | EventPayload::ChartsUpdateRequested { filters, .. } => Some(filters.as_slice()),
            EventPayload::FilterRemoved { filters, .. } => filters.as_deref(),
            _ => None,
        }
    }

    /// Wire representation used by diagnostics and external consumers
    pub fn to_json(&self) -> Value {
        match self {
            EventPayload::FilterApplied { field, value, chart_id, filters } => json!({
                "field": field,
                "value": value,
                "chartId": chart_id,
                "filters": filters,
            }),
            EventPayload::FilterRemoved { field, value, filters } => {
                let mut obj = json!({ "field": field, "value": value });
                if let Some(filters) = filters {
                    obj["filters"] = json!(filters);
                }
                obj
            }
            EventPayload::FilterCleared => json!({}),
            EventPayload::ChartsUpdateRequested { filters, active_field, active_value } => json!({
                "filters": filters,
                "activeField": active_field,
                "activeValue": active_value,
            }),
            EventPayload::ChartRegistered { chart_id, config } => {
                let mut obj = json!({ "chartId": chart_id });
                if let Some(config) = config {
                    obj["config"] = config.clone();
                }
                obj
            }
            EventPayload::ChartUnregistered { chart_id } => json!({ "chartId": chart_id }),
            EventPayload::Custom(value) => value.clone(),
        }
    }
}
