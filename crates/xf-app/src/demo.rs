//! Demo backend and rendering stand-ins
//! Serves synthetic service requests so the dashboard can run without a server

use std::sync::atomic::{AtomicBool, Ordering};

use ahash::AHashMap;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use xf_core::FilterSet;
use xf_data::{DataLoader, LoadOptions};
use xf_views::{ChartSurface, ElementState, PageHost};

pub const STATUS_LABELS: [&str; 3] = ["Aberto", "Em andamento", "Fechado"];
pub const TEMA_LABELS: [&str; 4] = ["Saude", "Obras", "Transporte", "Educacao"];
const CANAIS: [&str; 3] = ["Telefone", "Email", "Presencial"];
const BAIRROS: [&str; 5] = ["Centro", "Norte", "Sul", "Leste", "Oeste"];

/// In-memory stand-in for the dashboard API
pub struct DemoLoader {
    records: Vec<Value>,
}

impl DemoLoader {
    pub fn new(total: usize) -> Self {
        let records = (0..total)
            .map(|i| {
                json!({
                    "id": i + 1,
                    "Status": STATUS_LABELS[i % STATUS_LABELS.len()],
                    "Tema": TEMA_LABELS[(i / 2) % TEMA_LABELS.len()],
                    "Canal": CANAIS[(i / 3) % CANAIS.len()],
                    "Bairro": BAIRROS[(i * 7) % BAIRROS.len()],
                    "Prazo": (i * 5) % 45,
                })
            })
            .collect();
        Self { records }
    }

    pub fn records(&self) -> &[Value] {
        &self.records
    }

    fn filtered(&self, params: &[(String, String)]) -> Result<Vec<&Value>> {
        let set = FilterSet::from_query_params(params)?;
        Ok(self.records.iter().filter(|r| set.matches(r)).collect())
    }
}

fn count_by(records: &[&Value], field: &str) -> Value {
    let mut counts = Map::new();
    for record in records {
        let key = record
            .get(field)
            .and_then(Value::as_str)
            .unwrap_or("(vazio)")
            .to_string();
        let entry = counts.entry(key).or_insert(json!(0));
        *entry = json!(entry.as_u64().unwrap_or(0) + 1);
    }
    Value::Object(counts)
}

#[async_trait]
impl DataLoader for DemoLoader {
    async fn load(&self, endpoint: &str, options: &LoadOptions) -> Result<Value> {
        let rows = self.filtered(&options.params)?;
        match endpoint {
            "/api/dashboard/summary" => Ok(json!({
                "total": rows.len(),
                "byStatus": count_by(&rows, "Status"),
            })),
            "/api/dashboard/charts" => Ok(json!({
                "status": count_by(&rows, "Status"),
                "tema": count_by(&rows, "Tema"),
                "canal": count_by(&rows, "Canal"),
            })),
            "/api/requests" => Ok(json!({
                "total": rows.len(),
                "items": rows,
            })),
            _ => Err(anyhow!("404 Not Found: {}", endpoint)),
        }
    }
}

/// Chart stand-in that logs repaints
pub struct DemoSurface {
    id: String,
    labels: Vec<String>,
    attached: AtomicBool,
}

impl DemoSurface {
    pub fn new(id: &str, labels: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            attached: AtomicBool::new(true),
        }
    }

    pub fn detach(&self) {
        self.attached.store(false, Ordering::Relaxed);
    }
}

impl ChartSurface for DemoSurface {
    fn chart_id(&self) -> &str {
        &self.id
    }

    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Relaxed)
    }

    fn labels(&self) -> Vec<String> {
        self.labels.clone()
    }

    fn apply_opacity(&self, opacities: &[f32]) {
        let shown: Vec<String> = self
            .labels
            .iter()
            .zip(opacities)
            .map(|(label, opacity)| format!("{}={:.1}", label, opacity))
            .collect();
        tracing::info!("[{}] {}", self.id, shown.join(" "));
    }
}

/// Page host with switchable visibility
#[derive(Default)]
pub struct DemoHost {
    elements: Mutex<AHashMap<String, ElementState>>,
}

impl DemoHost {
    pub fn show(&self, page_id: &str) {
        self.elements.lock().insert(page_id.to_string(), ElementState::shown());
    }

    pub fn hide(&self, page_id: &str) {
        self.elements.lock().insert(page_id.to_string(), ElementState::hidden());
    }
}

impl PageHost for DemoHost {
    fn element_state(&self, page_id: &str) -> Option<ElementState> {
        self.elements.lock().get(page_id).copied()
    }
}
