//! Page auto-connect: reload visible pages when the filter set changes
//!
//! Each registered page listens for filter and chart-update events. Events
//! are ignored while the page is hidden; a visible page drops its cached
//! results and schedules a debounced reload with `force_refresh = true`.

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::Mutex;

use xf_core::{topics, Debouncer, EventBus, EventPayload, PageSettings, Subscription};
use xf_data::FilterCache;

/// Topics that trigger a page reload
pub const RELOAD_TOPICS: [&str; 4] = [
    topics::FILTER_APPLIED,
    topics::FILTER_REMOVED,
    topics::FILTER_CLEARED,
    topics::CHARTS_UPDATE_REQUESTED,
];

/// Layout facts about a page's root element
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ElementState {
    pub display_none: bool,
    pub has_layout_box: bool,
    pub computed_visible: bool,
}

impl ElementState {
    pub fn shown() -> Self {
        Self {
            display_none: false,
            has_layout_box: true,
            computed_visible: true,
        }
    }

    pub fn hidden() -> Self {
        Self {
            display_none: true,
            has_layout_box: false,
            computed_visible: false,
        }
    }
}

/// Host document queried for page elements
pub trait PageHost: Send + Sync {
    /// `None` when no element with this id exists
    fn element_state(&self, page_id: &str) -> Option<ElementState>;
}

/// A page is visible when its element exists, is not `display: none`, and
/// either has a layout box or computes as visible
pub fn is_visible(state: Option<ElementState>) -> bool {
    match state {
        None => false,
        Some(state) if state.display_none => false,
        Some(state) => state.has_layout_box || state.computed_visible,
    }
}

/// Reload callback; receives `force_refresh`
pub type ReloadFn = Arc<dyn Fn(bool) + Send + Sync>;

/// Per-page connection options
#[derive(Debug, Clone, Default)]
pub struct PageOptions {
    /// Overrides the default reload debounce
    pub debounce: Option<Duration>,
    /// Endpoints whose cached results are dropped before reloading
    pub endpoints: Vec<String>,
}

struct PageConnection {
    subscriptions: Vec<Subscription>,
    reload: Arc<Debouncer<bool>>,
}

impl PageConnection {
    fn release(&self) {
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
        self.reload.cancel();
    }
}

/// Registry of pages that reload themselves on filter changes
pub struct PageAutoConnect {
    bus: Arc<EventBus>,
    host: Arc<dyn PageHost>,
    cache: Option<Arc<FilterCache>>,
    default_debounce: Duration,
    pages: Mutex<AHashMap<String, PageConnection>>,
}

impl PageAutoConnect {
    pub fn new(bus: Arc<EventBus>, host: Arc<dyn PageHost>, settings: &PageSettings) -> Self {
        Self {
            bus,
            host,
            cache: None,
            default_debounce: settings.debounce,
            pages: Mutex::new(AHashMap::new()),
        }
    }

    /// Drop cached results of a page's endpoints before it reloads
    pub fn with_cache(mut self, cache: Arc<FilterCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Register `reload` for `page_id`. Re-connecting a page replaces its
    /// previous registration.
    pub fn connect<F>(&self, page_id: impl Into<String>, reload: F, options: PageOptions)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let page_id = page_id.into();
        let delay = options.debounce.unwrap_or(self.default_debounce);
        let reload: ReloadFn = Arc::new(reload);

        let debounced = {
            let page_id = page_id.clone();
            let reload = Arc::clone(&reload);
            Arc::new(Debouncer::new(delay, move |force_refresh: bool| {
                tracing::info!("Reloading page '{}' after filter change", page_id);
                reload(force_refresh);
            }))
        };

        let listener = {
            let page_id = page_id.clone();
            let host = Arc::clone(&self.host);
            let cache = self.cache.clone();
            let endpoints = options.endpoints;
            let debounced = Arc::clone(&debounced);
            move |event: &EventPayload| {
                if !is_visible(host.element_state(&page_id)) {
                    tracing::trace!("Page '{}' hidden, ignoring {}", page_id, event.topic());
                    return Ok(());
                }
                if let Some(cache) = &cache {
                    for endpoint in &endpoints {
                        cache.invalidate(Some(endpoint.as_str()));
                    }
                }
                debounced.schedule(true);
                Ok(())
            }
        };

        let connection = PageConnection {
            subscriptions: self.bus.subscribe_many(&RELOAD_TOPICS, listener),
            reload: debounced,
        };

        tracing::debug!("Page '{}' connected with {:?} debounce", page_id, delay);
        if let Some(previous) = self.pages.lock().insert(page_id, connection) {
            previous.release();
        }
    }

    /// Stop reloading `page_id`; returns whether it was connected
    pub fn disconnect(&self, page_id: &str) -> bool {
        match self.pages.lock().remove(page_id) {
            Some(connection) => {
                connection.release();
                true
            }
            None => false,
        }
    }

    pub fn is_connected(&self, page_id: &str) -> bool {
        self.pages.lock().contains_key(page_id)
    }

    pub fn connected_pages(&self) -> Vec<String> {
        let mut pages: Vec<String> = self.pages.lock().keys().cloned().collect();
        pages.sort();
        pages
    }

    pub fn is_page_visible(&self, page_id: &str) -> bool {
        is_visible(self.host.element_state(page_id))
    }

    /// Whether a reload is waiting for its debounce window
    pub fn has_pending_reload(&self, page_id: &str) -> bool {
        self.pages
            .lock()
            .get(page_id)
            .map(|connection| connection.reload.is_pending())
            .unwrap_or(false)
    }
}

impl Drop for PageAutoConnect {
    fn drop(&mut self) {
        for (_, connection) in self.pages.lock().drain() {
            connection.release();
        }
    }
}
