//! Filter-State Manager
//!
//! Owns the active [`FilterSet`]. `apply` is debounced: a burst of calls
//! within one window collapses into a single committed transition using the
//! latest call's arguments. `remove` and `clear` commit immediately.
//!
//! Every committed transition runs, in order: state mutation, persistence
//! (when enabled), cache invalidation, the `filter:*` event and finally
//! `charts:update-requested`. Persistence and invalidation are soft: their
//! failures are logged and never block the transition.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};

use crate::capabilities::Capabilities;
use crate::config::FilterSettings;
use crate::debounce::Debouncer;
use crate::error::Result;
use crate::events::{EventBus, EventPayload};
use crate::filters::{Filter, FilterOperator, FilterSet, FilterValue};

/// Options recognised by [`FilterStateManager::apply`]
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Remove an existing identical filter instead of adding it again
    pub toggle: bool,
    pub operator: FilterOperator,
    /// Drop every other filter first (single-select)
    pub clear_previous: bool,
    /// Overrides the manager's debounce window
    pub debounce: Option<Duration>,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            toggle: true,
            operator: FilterOperator::Eq,
            clear_previous: false,
            debounce: None,
        }
    }
}

impl ApplyOptions {
    pub fn toggle(mut self, toggle: bool) -> Self {
        self.toggle = toggle;
        self
    }

    pub fn operator(mut self, operator: FilterOperator) -> Self {
        self.operator = operator;
        self
    }

    pub fn clear_previous(mut self, clear_previous: bool) -> Self {
        self.clear_previous = clear_previous;
        self
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = Some(debounce);
        self
    }
}

/// Arguments of one `apply` call
#[derive(Debug, Clone)]
pub struct ApplyRequest {
    pub field: String,
    pub value: FilterValue,
    pub chart_id: Option<String>,
    pub options: ApplyOptions,
}

/// Outcome of a committed (or refused) operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    Removed,
    Cleared,
    /// Nothing matched; no events were emitted
    Unchanged,
    /// Requested by a listener while events were being dispatched
    Suppressed,
}

struct ManagerInner {
    bus: Arc<EventBus>,
    capabilities: Capabilities,
    settings: FilterSettings,
    persist: AtomicBool,
    state: RwLock<FilterSet>,
    debouncer: Debouncer<ApplyRequest>,
    /// Held for the whole commit-and-notify sequence. The flag is set while
    /// events are delivered; only the owning thread can observe it set.
    dispatch: ReentrantMutex<Cell<bool>>,
}

/// Clears the dispatching flag when the commit ends
struct Dispatching<'a>(ReentrantMutexGuard<'a, Cell<bool>>);

impl Drop for Dispatching<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Shared handle to the session's filter state
#[derive(Clone)]
pub struct FilterStateManager {
    inner: Arc<ManagerInner>,
}

impl FilterStateManager {
    /// Create a manager with no-op persistence and invalidation
    pub fn new(bus: Arc<EventBus>, settings: FilterSettings) -> Self {
        Self::with_capabilities(bus, settings, Capabilities::default())
    }

    pub fn with_capabilities(
        bus: Arc<EventBus>,
        settings: FilterSettings,
        capabilities: Capabilities,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<ManagerInner>| {
            let weak = weak.clone();
            ManagerInner {
                bus,
                capabilities,
                persist: AtomicBool::new(settings.persist),
                debouncer: Debouncer::new(settings.debounce, move |request: ApplyRequest| {
                    if let Some(inner) = weak.upgrade() {
                        inner.apply_immediate(request);
                    }
                }),
                settings,
                state: RwLock::new(FilterSet::new()),
                dispatch: ReentrantMutex::new(Cell::new(false)),
            }
        });
        Self { inner }
    }

    /// Schedule a debounced filter toggle.
    ///
    /// A later call within the window replaces this one entirely.
    pub fn apply(
        &self,
        field: impl Into<String>,
        value: impl Into<FilterValue>,
        chart_id: Option<&str>,
        options: ApplyOptions,
    ) {
        if self.inner.is_dispatching() {
            tracing::warn!("Ignoring filter apply requested while filter events are dispatched");
            return;
        }
        let delay = options.debounce.unwrap_or(self.inner.settings.debounce);
        let request = ApplyRequest {
            field: field.into(),
            value: value.into(),
            chart_id: chart_id.map(str::to_string),
            options,
        };
        if self.inner.debouncer.schedule_after(request, delay) {
            tracing::debug!("Superseded pending filter change");
        }
    }

    /// Commit an apply request without waiting for the debounce window
    pub fn apply_immediate(&self, request: ApplyRequest) -> Transition {
        self.inner.apply_immediate(request)
    }

    /// Remove a filter by identity. No-op when absent.
    pub fn remove(&self, field: &str, value: impl Into<FilterValue>) -> Transition {
        let value = value.into();
        self.inner.commit("remove", |state| {
            let idx = state.position(field, &value)?;
            let removed = state.remove_at(idx);
            Some(EventPayload::FilterRemoved {
                field: removed.field,
                value: removed.value,
                filters: Some(state.filters().to_vec()),
            })
        })
    }

    /// Remove every filter. Emits `filter:cleared` even when already empty.
    pub fn clear(&self) -> Transition {
        self.inner.commit("clear", |state| {
            state.clear();
            Some(EventPayload::FilterCleared)
        })
    }

    /// Case-sensitive exact membership test
    pub fn is_active(&self, field: &str, value: impl Into<FilterValue>) -> bool {
        self.inner.state.read().contains_exact(field, &value.into())
    }

    /// Copy of the current filter set
    pub fn snapshot(&self) -> FilterSet {
        self.inner.state.read().clone()
    }

    pub fn filters(&self) -> Vec<Filter> {
        self.inner.state.read().filters().to_vec()
    }

    /// Commit the pending debounced change now
    pub fn flush_pending(&self) -> bool {
        self.inner.debouncer.flush()
    }

    pub fn cancel_pending(&self) -> bool {
        self.inner.debouncer.cancel()
    }

    pub fn has_pending(&self) -> bool {
        self.inner.debouncer.is_pending()
    }

    pub fn set_persistence_enabled(&self, enabled: bool) {
        self.inner.persist.store(enabled, Ordering::Relaxed);
    }

    pub fn persistence_enabled(&self) -> bool {
        self.inner.persist.load(Ordering::Relaxed)
    }

    /// Write the current set to persistence; an empty set removes the key
    pub fn save(&self) -> Result<()> {
        let snapshot = self.snapshot();
        self.inner.save_snapshot(&snapshot)
    }

    /// Reset the in-memory state at session start.
    ///
    /// Filters are page-local: unless `restore_on_load` is configured, any
    /// persisted set is discarded and the manager starts empty.
    pub fn load(&self) -> FilterSet {
        let inner = &self.inner;
        let key = &inner.settings.storage_key;
        let persistence = &inner.capabilities.persistence;

        let loaded = if inner.settings.restore_on_load {
            match persistence.get_item(key) {
                Ok(Some(raw)) => match serde_json::from_str::<FilterSet>(&raw) {
                    Ok(set) => FilterSet::from_filters(set.filters().to_vec()),
                    Err(e) => {
                        tracing::warn!("Ignoring unreadable persisted filters: {}", e);
                        FilterSet::new()
                    }
                },
                Ok(None) => FilterSet::new(),
                Err(e) => {
                    tracing::warn!("Could not read persisted filters: {}", e);
                    FilterSet::new()
                }
            }
        } else {
            if let Err(e) = persistence.remove_item(key) {
                tracing::warn!("Could not discard persisted filters: {}", e);
            }
            FilterSet::new()
        };

        tracing::info!("Filter state loaded with {} filters", loaded.len());
        *inner.state.write() = loaded.clone();
        loaded
    }
}

impl ManagerInner {
    fn apply_immediate(&self, request: ApplyRequest) -> Transition {
        let ApplyRequest {
            field,
            value,
            chart_id,
            options,
        } = request;

        self.commit("apply", move |state| {
            if options.clear_previous && !state.is_empty() {
                state.clear();
            }

            match state.position(&field, &value) {
                Some(idx) if options.toggle => {
                    let removed = state.remove_at(idx);
                    if state.is_empty() {
                        Some(EventPayload::FilterCleared)
                    } else {
                        Some(EventPayload::FilterRemoved {
                            field: removed.field,
                            value: removed.value,
                            filters: Some(state.filters().to_vec()),
                        })
                    }
                }
                _ => {
                    state.push(Filter {
                        field: field.clone(),
                        value: value.clone(),
                        operator: options.operator,
                        chart_id: chart_id.clone(),
                    });
                    Some(EventPayload::FilterApplied {
                        field,
                        value,
                        chart_id,
                        filters: state.filters().to_vec(),
                    })
                }
            }
        })
    }

    fn commit<F>(&self, operation: &str, mutate: F) -> Transition
    where
        F: FnOnce(&mut FilterSet) -> Option<EventPayload>,
    {
        // Re-entry from a listener on this thread is refused; other threads wait
        let guard = self.dispatch.lock();
        if guard.get() {
            tracing::warn!("Ignoring filter {} requested while filter events are dispatched", operation);
            return Transition::Suppressed;
        }
        let dispatching = Dispatching(guard);

        let (event, snapshot) = {
            let mut state = self.state.write();
            let event = mutate(&mut state);
            (event, state.clone())
        };
        let Some(event) = event else {
            tracing::debug!("Filter {} matched nothing", operation);
            return Transition::Unchanged;
        };

        if self.persist.load(Ordering::Relaxed) {
            if let Err(e) = self.save_snapshot(&snapshot) {
                tracing::warn!("Could not persist filters: {}", e);
            }
        }
        if let Err(e) = self
            .capabilities
            .invalidator
            .invalidate(&self.settings.dependent_cache_keys)
        {
            tracing::warn!("Could not invalidate dependent caches: {}", e);
        }

        let transition = match &event {
            EventPayload::FilterApplied { .. } => Transition::Applied,
            EventPayload::FilterRemoved { .. } => Transition::Removed,
            _ => Transition::Cleared,
        };
        tracing::debug!("Filter {} committed as {:?} ({} active)", operation, transition, snapshot.len());

        dispatching.0.set(true);
        self.bus.publish(event);
        self.bus.publish(EventPayload::ChartsUpdateRequested {
            filters: snapshot.filters().to_vec(),
            active_field: snapshot.active_field().map(str::to_string),
            active_value: snapshot.active_value().cloned(),
        });
        transition
    }

    /// Whether this thread is inside a commit's event dispatch
    fn is_dispatching(&self) -> bool {
        self.dispatch
            .try_lock()
            .map(|guard| guard.get())
            .unwrap_or(false)
    }

    fn save_snapshot(&self, snapshot: &FilterSet) -> Result<()> {
        let key = &self.settings.storage_key;
        let persistence = &self.capabilities.persistence;
        if snapshot.is_empty() {
            persistence.remove_item(key)
        } else {
            let raw = serde_json::to_string(snapshot)?;
            persistence.set_item(key, &raw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{CacheInvalidator, MemoryStore, PersistenceStore};
    use crate::error::CoreError;
    use crate::events::topics;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    type EventLog = Arc<Mutex<Vec<(String, Value)>>>;

    fn settings(debounce_ms: u64) -> FilterSettings {
        FilterSettings {
            debounce: Duration::from_millis(debounce_ms),
            ..FilterSettings::default()
        }
    }

    fn record_all(bus: &EventBus) -> EventLog {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        for topic in [
            topics::FILTER_APPLIED,
            topics::FILTER_REMOVED,
            topics::FILTER_CLEARED,
            topics::CHARTS_UPDATE_REQUESTED,
        ] {
            let sink = Arc::clone(&log);
            bus.subscribe(topic, move |payload: &EventPayload| {
                sink.lock().push((payload.topic().to_string(), payload.to_json()));
                Ok(())
            });
        }
        log
    }

    fn topics_of(log: &EventLog) -> Vec<String> {
        log.lock().iter().map(|(t, _)| t.clone()).collect()
    }

    fn manager(debounce_ms: u64) -> (Arc<EventBus>, FilterStateManager, EventLog) {
        let bus = Arc::new(EventBus::new());
        let log = record_all(&bus);
        let manager = FilterStateManager::new(Arc::clone(&bus), settings(debounce_ms));
        (bus, manager, log)
    }

    /// Persistence that records every call
    #[derive(Default)]
    struct RecordingStore {
        calls: Mutex<Vec<String>>,
        inner: MemoryStore,
    }

    impl PersistenceStore for RecordingStore {
        fn get_item(&self, key: &str) -> crate::error::Result<Option<String>> {
            self.calls.lock().push(format!("get:{}", key));
            self.inner.get_item(key)
        }

        fn set_item(&self, key: &str, value: &str) -> crate::error::Result<()> {
            self.calls.lock().push(format!("set:{}", key));
            self.inner.set_item(key, value)
        }

        fn remove_item(&self, key: &str) -> crate::error::Result<()> {
            self.calls.lock().push(format!("remove:{}", key));
            self.inner.remove_item(key)
        }
    }

    struct FailingStore;

    impl PersistenceStore for FailingStore {
        fn get_item(&self, _key: &str) -> crate::error::Result<Option<String>> {
            Err(CoreError::Persistence("quota exceeded".to_string()))
        }

        fn set_item(&self, _key: &str, _value: &str) -> crate::error::Result<()> {
            Err(CoreError::Persistence("quota exceeded".to_string()))
        }

        fn remove_item(&self, _key: &str) -> crate::error::Result<()> {
            Err(CoreError::Persistence("quota exceeded".to_string()))
        }
    }

    struct SequencedInvalidator(EventLog);

    impl CacheInvalidator for SequencedInvalidator {
        fn invalidate(&self, keys: &[String]) -> crate::error::Result<()> {
            self.0.lock().push(("invalidate".to_string(), json!(keys)));
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_on_then_off() {
        let (_bus, manager, log) = manager(300);

        manager.apply("Status", "Aberto", None, ApplyOptions::default());
        tokio::time::sleep(Duration::from_millis(350)).await;
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.active_field(), Some("Status"));

        manager.apply("Status", "Aberto", None, ApplyOptions::default());
        tokio::time::sleep(Duration::from_millis(350)).await;
        let snapshot = manager.snapshot();
        assert!(snapshot.is_empty());
        assert!(snapshot.active_field().is_none());

        let log = log.lock();
        let cleared: Vec<_> = log.iter().filter(|(t, _)| t == topics::FILTER_CLEARED).collect();
        assert_eq!(cleared.len(), 1);
        assert_eq!(cleared[0].1, json!({}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_applies_coalesce_into_last_call() {
        let (_bus, manager, log) = manager(100);

        manager.apply("Status", "Aberto", None, ApplyOptions::default());
        manager.apply("Tema", "Saude", None, ApplyOptions::default());
        manager.apply("Bairro", "Centro", Some("bairroChart"), ApplyOptions::default());
        assert!(manager.has_pending());

        tokio::time::sleep(Duration::from_millis(100)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            topics_of(&log),
            vec![topics::FILTER_APPLIED, topics::CHARTS_UPDATE_REQUESTED]
        );
        let applied = log.lock()[0].1.clone();
        assert_eq!(applied["field"], "Bairro");
        assert_eq!(applied["value"], "Centro");
        assert_eq!(applied["chartId"], "bairroChart");
        assert_eq!(manager.filters(), vec![Filter::new("Bairro", "Centro").with_chart("bairroChart")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_symmetry_restores_previous_state() {
        let (_bus, manager, _log) = manager(50);
        manager.apply("Tema", "Saude", None, ApplyOptions::default());
        tokio::time::sleep(Duration::from_millis(60)).await;
        let before = manager.snapshot();

        manager.apply("Status", "Aberto", None, ApplyOptions::default());
        tokio::time::sleep(Duration::from_millis(60)).await;
        manager.apply("Status", "aberto", None, ApplyOptions::default());
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(manager.snapshot(), before);
    }

    #[test]
    fn test_remove_specific_filter() {
        let (_bus, manager, log) = manager(300);
        manager.apply_immediate(request("Status", "Aberto", ApplyOptions::default()));
        manager.apply_immediate(request("Tema", "Saude", ApplyOptions::default()));
        log.lock().clear();

        assert_eq!(manager.remove("Status", "Aberto"), Transition::Removed);
        assert_eq!(manager.filters(), vec![Filter::new("Tema", "Saude")]);

        let log = log.lock();
        assert_eq!(log[0].0, topics::FILTER_REMOVED);
        assert_eq!(log[0].1["field"], "Status");
        assert_eq!(log[0].1["value"], "Aberto");
        assert_eq!(log[1].0, topics::CHARTS_UPDATE_REQUESTED);
        assert_eq!(log[1].1["activeField"], "Tema");
    }

    #[test]
    fn test_remove_missing_filter_is_noop() {
        let (_bus, manager, log) = manager(300);
        assert_eq!(manager.remove("Status", "Aberto"), Transition::Unchanged);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_clear_on_empty_still_emits() {
        let (_bus, manager, log) = manager(300);
        assert_eq!(manager.clear(), Transition::Cleared);
        assert_eq!(manager.clear(), Transition::Cleared);

        assert!(manager.snapshot().is_empty());
        assert_eq!(
            topics_of(&log),
            vec![
                topics::FILTER_CLEARED,
                topics::CHARTS_UPDATE_REQUESTED,
                topics::FILTER_CLEARED,
                topics::CHARTS_UPDATE_REQUESTED,
            ]
        );
    }

    #[test]
    fn test_toggle_false_accumulates() {
        let (_bus, manager, _log) = manager(300);
        let options = ApplyOptions::default().toggle(false);
        manager.apply_immediate(request("Status", "Aberto", options.clone()));
        manager.apply_immediate(request("Status", "Aberto", options));
        assert_eq!(manager.snapshot().len(), 2);
    }

    #[test]
    fn test_clear_previous_keeps_only_latest() {
        let (_bus, manager, _log) = manager(300);
        manager.apply_immediate(request("Status", "Aberto", ApplyOptions::default()));
        manager.apply_immediate(request("Tema", "Saude", ApplyOptions::default()));

        let single = ApplyOptions::default().clear_previous(true);
        assert_eq!(manager.apply_immediate(request("Bairro", "Centro", single)), Transition::Applied);
        assert_eq!(manager.filters(), vec![Filter::new("Bairro", "Centro")]);
        assert_eq!(manager.snapshot().active_value(), Some(&FilterValue::from("Centro")));
    }

    #[test]
    fn test_is_active_is_case_sensitive() {
        let (_bus, manager, _log) = manager(300);
        manager.apply_immediate(request("Status", "Aberto", ApplyOptions::default()));
        assert!(manager.is_active("Status", "Aberto"));
        assert!(!manager.is_active("Status", "aberto"));
        assert!(!manager.is_active("status", "Aberto"));
    }

    #[test]
    fn test_save_empty_removes_key() {
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(RecordingStore::default());
        let manager = FilterStateManager::with_capabilities(
            bus,
            settings(300),
            Capabilities::default().with_persistence(store.clone()),
        );

        manager.save().unwrap();
        assert_eq!(*store.calls.lock(), vec!["remove:dashboardFilters".to_string()]);
    }

    #[test]
    fn test_persist_after_each_transition() {
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(RecordingStore::default());
        let manager = FilterStateManager::with_capabilities(
            bus,
            FilterSettings {
                persist: true,
                ..settings(300)
            },
            Capabilities::default().with_persistence(store.clone()),
        );

        manager.apply_immediate(request("Status", "Aberto", ApplyOptions::default()));
        let raw = store.inner.get_item("dashboardFilters").unwrap().unwrap();
        let persisted: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted["filters"][0]["field"], "Status");

        manager.clear();
        assert_eq!(
            *store.calls.lock(),
            vec!["set:dashboardFilters".to_string(), "remove:dashboardFilters".to_string()]
        );
    }

    #[test]
    fn test_load_discards_persisted_filters() {
        // Filters are page-local: a saved set is intentionally not restored
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(MemoryStore::new());
        let manager = FilterStateManager::with_capabilities(
            Arc::clone(&bus),
            settings(300),
            Capabilities::default().with_persistence(store.clone()),
        );
        manager.apply_immediate(request("Status", "Aberto", ApplyOptions::default()));
        manager.save().unwrap();
        assert!(store.get_item("dashboardFilters").unwrap().is_some());

        let next_session = FilterStateManager::with_capabilities(
            bus,
            settings(300),
            Capabilities::default().with_persistence(store.clone()),
        );
        assert!(next_session.load().is_empty());
        assert!(next_session.snapshot().is_empty());
        assert!(store.get_item("dashboardFilters").unwrap().is_none());
    }

    #[test]
    fn test_restore_on_load_when_configured() {
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(MemoryStore::new());
        let restoring = FilterSettings {
            restore_on_load: true,
            ..settings(300)
        };
        let manager = FilterStateManager::with_capabilities(
            bus,
            restoring,
            Capabilities::default().with_persistence(store.clone()),
        );
        let saved = FilterSet::from_filters(vec![Filter::new("Status", "Aberto"), Filter::new("Tema", "Saude")]);
        store
            .set_item("dashboardFilters", &serde_json::to_string(&saved).unwrap())
            .unwrap();

        let loaded = manager.load();
        assert_eq!(loaded.len(), 2);
        assert_eq!(manager.snapshot().active_field(), Some("Tema"));
    }

    #[test]
    fn test_failing_persistence_does_not_block_transition() {
        let bus = Arc::new(EventBus::new());
        let log = record_all(&bus);
        let manager = FilterStateManager::with_capabilities(
            bus,
            FilterSettings {
                persist: true,
                ..settings(300)
            },
            Capabilities::default().with_persistence(Arc::new(FailingStore)),
        );

        assert_eq!(
            manager.apply_immediate(request("Status", "Aberto", ApplyOptions::default())),
            Transition::Applied
        );
        assert_eq!(manager.snapshot().len(), 1);
        assert_eq!(
            topics_of(&log),
            vec![topics::FILTER_APPLIED, topics::CHARTS_UPDATE_REQUESTED]
        );
        assert!(manager.save().is_err());
    }

    #[test]
    fn test_invalidate_runs_before_events() {
        let bus = Arc::new(EventBus::new());
        let log = record_all(&bus);
        let manager = FilterStateManager::with_capabilities(
            bus,
            settings(300),
            Capabilities::default().with_invalidator(Arc::new(SequencedInvalidator(Arc::clone(&log)))),
        );

        manager.clear();
        assert_eq!(
            topics_of(&log),
            vec!["invalidate", topics::FILTER_CLEARED, topics::CHARTS_UPDATE_REQUESTED]
        );
        assert_eq!(log.lock()[0].1, json!(FilterSettings::default().dependent_cache_keys));
    }

    #[test]
    fn test_update_request_carries_snapshot() {
        let (_bus, manager, log) = manager(300);
        manager.apply_immediate(request("Status", "Aberto", ApplyOptions::default()));

        let log = log.lock();
        let update = &log[1].1;
        assert_eq!(update["activeField"], "Status");
        assert_eq!(update["activeValue"], "Aberto");
        assert_eq!(update["filters"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_listener_mutation_during_dispatch_is_suppressed() {
        let bus = Arc::new(EventBus::new());
        let manager = FilterStateManager::new(Arc::clone(&bus), settings(300));
        let outcome = Arc::new(Mutex::new(None));

        let echo = manager.clone();
        let sink = Arc::clone(&outcome);
        bus.subscribe(topics::FILTER_APPLIED, move |_: &EventPayload| {
            *sink.lock() = Some(echo.clear());
            Ok(())
        });

        assert_eq!(
            manager.apply_immediate(request("Status", "Aberto", ApplyOptions::default())),
            Transition::Applied
        );
        assert_eq!(*outcome.lock(), Some(Transition::Suppressed));
        assert_eq!(manager.snapshot().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_debounced_apply_does_not_loop() {
        let bus = Arc::new(EventBus::new());
        let manager = FilterStateManager::new(Arc::clone(&bus), settings(100));
        let commits = Arc::new(AtomicUsize::new(0));

        let echo = manager.clone();
        let counter = Arc::clone(&commits);
        bus.subscribe_many(&topics::FILTER_CHANGES, move |_: &EventPayload| {
            counter.fetch_add(1, Ordering::SeqCst);
            echo.apply("Tema", "Saude", None, ApplyOptions::default());
            Ok(())
        });

        manager.apply_immediate(request("Status", "Aberto", ApplyOptions::default()));
        assert!(!manager.has_pending());

        tokio::time::sleep(Duration::from_millis(1050)).await;
        assert_eq!(commits.load(Ordering::SeqCst), 1);
        assert_eq!(manager.filters(), vec![Filter::new("Status", "Aberto")]);
    }

    #[test]
    fn test_concurrent_clear_waits_for_dispatch() {
        let bus = Arc::new(EventBus::new());
        let manager = FilterStateManager::new(Arc::clone(&bus), settings(300));

        let (entered_tx, entered_rx) = mpsc::channel();
        let entered_tx = Mutex::new(entered_tx);
        bus.subscribe(topics::FILTER_APPLIED, move |_: &EventPayload| {
            let _ = entered_tx.lock().send(());
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        });

        let worker = {
            let manager = manager.clone();
            std::thread::spawn(move || manager.apply_immediate(request("Status", "Aberto", ApplyOptions::default())))
        };
        entered_rx.recv().unwrap();

        // Another thread's commit is in progress: wait for it, do not drop the call
        assert_eq!(manager.clear(), Transition::Cleared);
        assert_eq!(worker.join().unwrap(), Transition::Applied);
        assert!(manager.snapshot().is_empty());
    }

    #[test]
    fn test_toggle_off_with_remainder_emits_removed() {
        let (_bus, manager, log) = manager(300);
        manager.apply_immediate(request("Status", "Aberto", ApplyOptions::default()));
        manager.apply_immediate(request("Tema", "Saude", ApplyOptions::default()));
        log.lock().clear();

        assert_eq!(
            manager.apply_immediate(request("Status", "aberto", ApplyOptions::default())),
            Transition::Removed
        );

        let log = log.lock();
        assert_eq!(
            log.iter().map(|(t, _)| t.as_str()).collect::<Vec<_>>(),
            vec![topics::FILTER_REMOVED, topics::CHARTS_UPDATE_REQUESTED]
        );
        let removed = &log[0].1;
        assert_eq!(removed["field"], "Status");
        assert_eq!(removed["value"], "Aberto");
        assert_eq!(removed["filters"], json!([{ "field": "Tema", "value": "Saude", "operator": "eq", "chartId": null }]));
        assert_eq!(log[1].1["activeField"], "Tema");
        assert_eq!(log[1].1["activeValue"], "Saude");
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_call_debounce_overrides_default() {
        let (_bus, manager, log) = manager(300);
        let quick = ApplyOptions::default().debounce(Duration::from_millis(50));
        manager.apply("Status", "Aberto", None, quick);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(manager.snapshot().len(), 1);
        assert!(!manager.has_pending());
        assert_eq!(topics_of(&log), vec![topics::FILTER_APPLIED, topics::CHARTS_UPDATE_REQUESTED]);

        manager.apply("Tema", "Saude", None, ApplyOptions::default());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(manager.has_pending());
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(manager.snapshot().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_pending_commits_now() {
        let (_bus, manager, log) = manager(300);
        manager.apply("Status", "Aberto", None, ApplyOptions::default());
        assert!(manager.flush_pending());
        assert_eq!(manager.snapshot().len(), 1);
        assert_eq!(log.lock().len(), 2);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(log.lock().len(), 2);
    }

    fn request(field: &str, value: &str, options: ApplyOptions) -> ApplyRequest {
        ApplyRequest {
            field: field.to_string(),
            value: FilterValue::from(value),
            chart_id: None,
            options,
        }
    }
}
