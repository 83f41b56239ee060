//! Filter data model
//!
//! A [`Filter`] is one field/operator/value constraint. The [`FilterSet`] is
//! the ordered collection of active filters together with the most recently
//! toggled-on field/value pair used for highlighting.

mod composite;

pub use composite::{
    CompositeDraft, CompositeFilter, CompositeFilterLibrary, CompositeOperator, SubFilterDraft,
};

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// Value side of a filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Number(f64),
    Text(String),
}

impl FilterValue {
    /// Case-insensitive comparison used for filter identity
    pub fn eq_ignore_case(&self, other: &FilterValue) -> bool {
        self.to_string().to_lowercase() == other.to_string().to_lowercase()
    }

    /// Exact comparison of the rendered values
    pub fn eq_exact(&self, other: &FilterValue) -> bool {
        self.to_string() == other.to_string()
    }

    pub fn is_blank(&self) -> bool {
        match self {
            FilterValue::Text(s) => s.trim().is_empty(),
            FilterValue::Number(n) => n.is_nan(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FilterValue::Number(n) => Some(*n),
            FilterValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Text(s) => f.write_str(s),
            FilterValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            FilterValue::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::Text(s.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        FilterValue::Text(s)
    }
}

impl From<f64> for FilterValue {
    fn from(n: f64) -> Self {
        FilterValue::Number(n)
    }
}

impl From<i64> for FilterValue {
    fn from(n: i64) -> Self {
        FilterValue::Number(n as f64)
    }
}

/// Comparison applied between a record field and the filter value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    #[default]
    Eq,
    In,
    Contains,
    Gte,
    Lte,
    Gt,
    Lt,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::In => "in",
            FilterOperator::Contains => "contains",
            FilterOperator::Gte => "gte",
            FilterOperator::Lte => "lte",
            FilterOperator::Gt => "gt",
            FilterOperator::Lt => "lt",
        }
    }

    /// Whether the operator compares by ordering rather than equality
    pub fn is_range(&self) -> bool {
        matches!(
            self,
            FilterOperator::Gte | FilterOperator::Lte | FilterOperator::Gt | FilterOperator::Lt
        )
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOperator {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "eq" | "=" | "==" => Ok(FilterOperator::Eq),
            "in" => Ok(FilterOperator::In),
            "contains" => Ok(FilterOperator::Contains),
            "gte" | ">=" => Ok(FilterOperator::Gte),
            "lte" | "<=" => Ok(FilterOperator::Lte),
            "gt" | ">" => Ok(FilterOperator::Gt),
            "lt" | "<" => Ok(FilterOperator::Lt),
            other => Err(CoreError::UnknownOperator(other.to_string())),
        }
    }
}

/// A single active constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub field: String,
    pub value: FilterValue,
    #[serde(default)]
    pub operator: FilterOperator,
    #[serde(default)]
    pub chart_id: Option<String>,
}

impl Filter {
    /// Parameter name carrying this filter in a request
    pub fn param_name(&self) -> String {
        match self.operator {
            FilterOperator::Eq | FilterOperator::In => self.field.clone(),
            operator => format!("{}[{}]", self.field, operator.as_str()),
        }
    }

    /// Create an equality filter
    pub fn new(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            operator: FilterOperator::Eq,
            chart_id: None,
        }
    }

    pub fn with_operator(mut self, operator: FilterOperator) -> Self {
        self.operator = operator;
        self
    }

    pub fn with_chart(mut self, chart_id: impl Into<String>) -> Self {
        self.chart_id = Some(chart_id.into());
        self
    }

    /// Identity used for toggling: same field, case-insensitive value
    pub fn is_same(&self, field: &str, value: &FilterValue) -> bool {
        self.field == field && self.value.eq_ignore_case(value)
    }

    /// Evaluate this filter against one JSON record
    pub fn matches(&self, record: &Value) -> bool {
        let Some(actual) = record.get(self.field.as_str()).and_then(render_scalar) else {
            return false;
        };
        let expected = self.value.to_string();

        match self.operator {
            FilterOperator::Eq => actual.to_lowercase() == expected.to_lowercase(),
            FilterOperator::In => expected
                .split(',')
                .map(str::trim)
                .any(|candidate| candidate.to_lowercase() == actual.trim().to_lowercase()),
            FilterOperator::Contains => actual.to_lowercase().contains(&expected.to_lowercase()),
            op => {
                let ordering = match (actual.trim().parse::<f64>(), self.value.as_f64()) {
                    (Ok(a), Some(b)) => a.partial_cmp(&b),
                    // ISO dates and other text compare lexically
                    _ => Some(actual.as_str().cmp(expected.as_str())),
                };
                let Some(ordering) = ordering else {
                    return false;
                };
                match op {
                    FilterOperator::Gte => ordering.is_ge(),
                    FilterOperator::Lte => ordering.is_le(),
                    FilterOperator::Gt => ordering.is_gt(),
                    FilterOperator::Lt => ordering.is_lt(),
                    FilterOperator::Eq | FilterOperator::In | FilterOperator::Contains => false,
                }
            }
        }
    }
}

fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => n.as_f64().map(|n| FilterValue::Number(n).to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Ordered active filters plus the focused field/value.
///
/// `active_field`/`active_value` are `None` exactly when the list is empty,
/// otherwise they mirror the last filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSet {
    filters: Vec<Filter>,
    active_field: Option<String>,
    active_value: Option<FilterValue>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from a list, deriving the focused pair from the last entry
    pub fn from_filters(filters: Vec<Filter>) -> Self {
        let mut set = Self {
            filters,
            active_field: None,
            active_value: None,
        };
        set.sync_active();
        set
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn active_field(&self) -> Option<&str> {
        self.active_field.as_deref()
    }

    pub fn active_value(&self) -> Option<&FilterValue> {
        self.active_value.as_ref()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Index of the filter with the given identity
    pub fn position(&self, field: &str, value: &FilterValue) -> Option<usize> {
        self.filters.iter().position(|f| f.is_same(field, value))
    }

    /// Case-sensitive exact membership test
    pub fn contains_exact(&self, field: &str, value: &FilterValue) -> bool {
        self.filters
            .iter()
            .any(|f| f.field == field && f.value.eq_exact(value))
    }

    /// Active values for one field, in insertion order
    pub fn values_for(&self, field: &str) -> Vec<&FilterValue> {
        self.filters
            .iter()
            .filter(|f| f.field == field)
            .map(|f| &f.value)
            .collect()
    }

    /// Request parameters for the fetch layer.
    ///
    /// Equality and membership filters use the bare field name; other
    /// operators are qualified as `field[op]`. Values sharing a parameter
    /// are comma-joined.
    pub fn query_params(&self) -> Vec<(String, String)> {
        let mut grouped: IndexMap<String, Vec<String>> = IndexMap::new();
        for filter in &self.filters {
            grouped
                .entry(filter.param_name())
                .or_default()
                .push(filter.value.to_string());
        }
        grouped
            .into_iter()
            .map(|(name, values)| (name, values.join(",")))
            .collect()
    }

    /// Rebuild a set from [`FilterSet::query_params`] output; every
    /// comma-separated value becomes its own filter
    pub fn from_query_params(params: &[(String, String)]) -> Result<Self, CoreError> {
        let mut filters = Vec::new();
        for (name, joined) in params {
            let (field, operator) = match name.strip_suffix(']').and_then(|n| n.split_once('[')) {
                Some((field, op)) => (field, op.parse::<FilterOperator>()?),
                None => (name.as_str(), FilterOperator::Eq),
            };
            for value in joined.split(',').map(str::trim).filter(|v| !v.is_empty()) {
                let value = match operator.is_range() {
                    true => value
                        .parse::<f64>()
                        .map(FilterValue::Number)
                        .unwrap_or_else(|_| FilterValue::from(value)),
                    false => FilterValue::from(value),
                };
                filters.push(Filter::new(field, value).with_operator(operator));
            }
        }
        Ok(Self::from_filters(filters))
    }

    /// Whether a record passes the active filters.
    ///
    /// Fields are combined with AND. Within one field, categorical filters
    /// (a multi-selection) are combined with OR while range bounds must all
    /// hold.
    pub fn matches(&self, record: &Value) -> bool {
        let mut grouped: IndexMap<&str, Vec<&Filter>> = IndexMap::new();
        for filter in &self.filters {
            grouped.entry(filter.field.as_str()).or_default().push(filter);
        }
        grouped.values().all(|filters| {
            let (ranges, choices): (Vec<&&Filter>, Vec<&&Filter>) =
                filters.iter().partition(|f| f.operator.is_range());
            ranges.iter().all(|f| f.matches(record))
                && (choices.is_empty() || choices.iter().any(|f| f.matches(record)))
        })
    }

    pub(crate) fn push(&mut self, filter: Filter) {
        self.filters.push(filter);
        self.sync_active();
    }

    pub(crate) fn remove_at(&mut self, index: usize) -> Filter {
        let removed = self.filters.remove(index);
        self.sync_active();
        removed
    }

    pub(crate) fn clear(&mut self) {
        self.filters.clear();
        self.sync_active();
    }

    fn sync_active(&mut self) {
        match self.filters.last() {
            Some(last) => {
                self.active_field = Some(last.field.clone());
                self.active_value = Some(last.value.clone());
            }
            None => {
                self.active_field = None;
                self.active_value = None;
            }
        }
    }
}
