//! Headless dashboard session
//!
//! Wires the filter state, cache, charts and pages together against the demo
//! backend and plays a short scripted interaction.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use xf_core::{
    Capabilities, ChartRegistry, CompositeDraft, CompositeFilterLibrary, CompositeOperator,
    DashboardConfig, EventBus, FilterStateManager, MemoryStore, SubFilterDraft,
};
use xf_data::{FilterCache, FilteredLoader, TtlPolicy};
use xf_views::{
    BindOptions, ChartSurface, ClickEvent, CrossfilterBinding, CrossfilterHelper, Modifiers,
    PageAutoConnect, PageOptions,
};

mod demo;

use demo::{DemoHost, DemoLoader, DemoSurface, STATUS_LABELS, TEMA_LABELS};

const SUMMARY_ENDPOINT: &str = "/api/dashboard/summary";
const CHARTS_ENDPOINT: &str = "/api/dashboard/charts";

fn load_config() -> Result<DashboardConfig> {
    let config = match std::env::args().nth(1) {
        Some(path) => DashboardConfig::from_file(&path)
            .with_context(|| format!("Failed to read dashboard config from {}", path))?,
        None => DashboardConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn click(binding: &CrossfilterBinding, index: usize) {
    let outcome = binding.on_click(ClickEvent {
        element_index: Some(index),
        modifiers: Modifiers::NONE,
    });
    info!("Click on '{}' #{}: {:?}", binding.chart_id(), index, outcome);
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config()?;
    info!("Starting dashboard session");

    let bus = Arc::new(EventBus::new());
    let store = Arc::new(MemoryStore::new());
    let cache: Arc<FilterCache> = Arc::new(FilterCache::new(TtlPolicy::from(&config.cache)));
    let sweeper = cache.spawn_sweeper(config.cache.sweep_interval);

    let manager = FilterStateManager::with_capabilities(
        Arc::clone(&bus),
        config.filters.clone(),
        Capabilities::default()
            .with_persistence(store.clone())
            .with_invalidator(cache.clone()),
    );
    manager.set_persistence_enabled(config.filters.persist);
    manager.load();

    let backend = Arc::new(DemoLoader::new(48));
    let loader = Arc::new(FilteredLoader::new(backend.clone(), Arc::clone(&cache)));

    // Pages
    let host = Arc::new(DemoHost::default());
    host.show("overview");
    host.hide("demografia");
    let pages = PageAutoConnect::new(Arc::clone(&bus), host.clone(), &config.pages).with_cache(Arc::clone(&cache));
    for (page_id, endpoint) in [("overview", SUMMARY_ENDPOINT), ("demografia", CHARTS_ENDPOINT)] {
        let loader = Arc::clone(&loader);
        let manager = manager.clone();
        pages.connect(
            page_id,
            move |force_refresh| {
                let loader = Arc::clone(&loader);
                let filters = manager.snapshot();
                tokio::spawn(async move {
                    let data = loader
                        .load_or(endpoint, &filters, force_refresh, json!({ "total": 0 }))
                        .await;
                    info!("Page data from {}: total = {}", endpoint, data["total"]);
                });
            },
            PageOptions {
                endpoints: vec![endpoint.to_string()],
                ..PageOptions::default()
            },
        );
    }

    // Charts
    let registry = Arc::new(ChartRegistry::new(Arc::clone(&bus), config.charts.clone()));
    let helper = CrossfilterHelper::new(Arc::clone(&bus), manager.clone(), Arc::clone(&registry));
    let status_surface = Arc::new(DemoSurface::new("statusChart", &STATUS_LABELS));
    let tema_surface = Arc::new(DemoSurface::new("temaChart", &TEMA_LABELS));
    let sla_surface = Arc::new(DemoSurface::new("slaChart", &["No prazo", "Atrasado"]));

    let mut bindings = Vec::new();
    for surface in [&status_surface, &tema_surface, &sla_surface] {
        registry.register(surface.chart_id(), json!({ "type": "bar" }));
        match helper.bind(surface.clone(), BindOptions::default()) {
            Some(binding) => bindings.push(binding),
            None => warn!("Chart '{}' could not be bound", surface.chart_id()),
        }
    }
    let [status, tema, sla] = match <[CrossfilterBinding; 3]>::try_from(bindings) {
        Ok(bindings) => bindings,
        Err(_) => anyhow::bail!("Not every chart was bound"),
    };

    let settle = config.filters.debounce + Duration::from_millis(50);
    let page_settle = config.pages.debounce + Duration::from_millis(50);

    // Single selection, then Ctrl-extend
    click(&status, 0);
    tokio::time::sleep(settle).await;
    status.on_pointer_down(Modifiers::ctrl());
    click(&status, 2);
    tokio::time::sleep(settle).await;
    info!("Active filters: {:?}", manager.snapshot().query_params());

    // A click on another chart replaces the selection
    click(&tema, 1);
    tokio::time::sleep(settle).await;
    info!("Active filters: {:?}", manager.snapshot().query_params());

    // Non-filterable chart
    click(&sla, 0);
    tokio::time::sleep(page_settle).await;

    // The same selection is now served from the cache
    let snapshot = manager.snapshot();
    loader.load(SUMMARY_ENDPOINT, &snapshot, false).await?;
    info!("Cache: {:?}", cache.stats());

    // Saved composite filter evaluated against the demo records
    let library = CompositeFilterLibrary::new(store.clone());
    let composite = library.save(
        "abertos-saude",
        CompositeDraft {
            operator: CompositeOperator::And,
            filters: vec![
                SubFilterDraft::new("Status", "eq", "Aberto"),
                SubFilterDraft::new("Tema", "eq", "Saude"),
            ],
        },
    )?;
    let matching = backend.records().iter().filter(|r| composite.matches(r)).count();
    info!("Composite 'abertos-saude' matches {} requests", matching);

    // Context menu clears everything; a detached chart drops its listeners
    tema_surface.detach();
    let response = status.on_context_menu();
    info!("Context menu: {:?}", response);
    tokio::time::sleep(page_settle).await;

    if manager.persistence_enabled() {
        manager.save()?;
    }
    for binding in [&status, &tema, &sla] {
        binding.destroy();
    }
    pages.disconnect("overview");
    pages.disconnect("demografia");
    sweeper.abort();

    info!("Session finished with {} cached results", cache.len());
    Ok(())
}
