//! Crossfilter binding between one rendered chart and the filter state
//!
//! A binding turns clicks on the chart into filter toggles, clears filters
//! on the context menu, and repaints the chart's own categories (dimming the
//! ones outside the active filter) whenever the filter set changes. It owns
//! no filter state itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use xf_core::{
    topics, ApplyOptions, ChartRegistry, EventBus, EventPayload, FieldBinding, FilterStateManager,
    FilterValue, Subscription, Transition,
};

/// Opacity of categories that match the active filter (or when none is active)
pub const FULL_OPACITY: f32 = 1.0;

/// Opacity of categories outside the active filter
pub const DIMMED_OPACITY: f32 = 0.3;

/// Rendering surface of one chart, as seen by the binding
pub trait ChartSurface: Send + Sync {
    fn chart_id(&self) -> &str;

    /// Whether the canvas still exists and is attached to the page
    fn is_attached(&self) -> bool;

    /// Category labels in render order
    fn labels(&self) -> Vec<String>;

    /// Repaint every category with the given opacity
    fn apply_opacity(&self, opacities: &[f32]);
}

/// Keyboard modifiers held during a pointer event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        ctrl: false,
        meta: false,
        shift: false,
    };

    pub fn ctrl() -> Self {
        Self {
            ctrl: true,
            ..Self::NONE
        }
    }

    /// Ctrl or Cmd extends the selection instead of replacing it
    pub fn is_multi_select(&self) -> bool {
        self.ctrl || self.meta
    }
}

/// Primary click on the chart
#[derive(Debug, Clone, Copy, Default)]
pub struct ClickEvent {
    /// Index of the data point under the pointer
    pub element_index: Option<usize>,
    pub modifiers: Modifiers,
}

/// Why a click produced no filter change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NonFilterable,
    Detached,
    NoElement,
    NoLabel,
}

/// Result of handling a click
#[derive(Debug, Clone, PartialEq)]
pub enum ClickOutcome {
    Scheduled {
        field: String,
        value: FilterValue,
        multi_select: bool,
    },
    Ignored(IgnoreReason),
}

/// Result of handling the context menu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextMenuResponse {
    /// The browser's own menu must not open
    pub prevent_default: bool,
    pub transition: Transition,
}

/// Per-binding options
#[derive(Debug, Clone, Default)]
pub struct BindOptions {
    /// Labels to resolve clicked indices against instead of the surface's
    pub lookup: Option<Vec<String>>,
    /// Field binding to use instead of the registry's
    pub binding: Option<FieldBinding>,
}

/// Factory for chart bindings
pub struct CrossfilterHelper {
    bus: Arc<EventBus>,
    manager: FilterStateManager,
    registry: Arc<ChartRegistry>,
}

impl CrossfilterHelper {
    pub fn new(bus: Arc<EventBus>, manager: FilterStateManager, registry: Arc<ChartRegistry>) -> Self {
        Self {
            bus,
            manager,
            registry,
        }
    }

    /// Bind a rendered chart.
    ///
    /// Returns `None` when the surface is already gone; that is expected
    /// when a chart is destroyed before binding and is not an error.
    pub fn bind(&self, surface: Arc<dyn ChartSurface>, options: BindOptions) -> Option<CrossfilterBinding> {
        let chart_id = surface.chart_id().to_string();
        if !surface.is_attached() {
            tracing::debug!("Skipping crossfilter binding for detached chart '{}'", chart_id);
            return None;
        }

        let binding = options
            .binding
            .or_else(|| self.registry.binding_for(&chart_id));

        let inner = Arc::new(BindingInner {
            surface,
            manager: self.manager.clone(),
            binding,
            lookup: options.lookup,
            multi_armed: AtomicBool::new(false),
            subscriptions: Mutex::new(Vec::new()),
        });

        if inner.binding.is_some() {
            let weak: Weak<BindingInner> = Arc::downgrade(&inner);
            let subscriptions = self.bus.subscribe_many(&topics::FILTER_CHANGES, move |_: &EventPayload| {
                if let Some(inner) = weak.upgrade() {
                    inner.refresh_highlight();
                }
                Ok(())
            });
            *inner.subscriptions.lock() = subscriptions;
            inner.refresh_highlight();
        } else {
            tracing::debug!("Chart '{}' is not filterable; clicks will be ignored", chart_id);
        }

        Some(CrossfilterBinding { inner })
    }
}

struct BindingInner {
    surface: Arc<dyn ChartSurface>,
    manager: FilterStateManager,
    binding: Option<FieldBinding>,
    lookup: Option<Vec<String>>,
    /// Multi-select modifier captured on pointer-down
    multi_armed: AtomicBool,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl BindingInner {
    fn label_at(&self, index: usize) -> Option<String> {
        match &self.lookup {
            Some(lookup) => lookup.get(index).cloned(),
            None => self.surface.labels().get(index).cloned(),
        }
    }

    fn refresh_highlight(&self) -> Option<Vec<f32>> {
        if !self.surface.is_attached() {
            tracing::debug!("Chart '{}' detached, releasing crossfilter listeners", self.surface.chart_id());
            self.release();
            return None;
        }
        let binding = self.binding.as_ref()?;

        let snapshot = self.manager.snapshot();
        let active = snapshot.values_for(&binding.field);
        let labels = match &self.lookup {
            Some(lookup) => lookup.clone(),
            None => self.surface.labels(),
        };
        let opacities = dimmed_opacities(binding, &labels, &active);
        self.surface.apply_opacity(&opacities);
        Some(opacities)
    }

    fn release(&self) {
        for subscription in self.subscriptions.lock().drain(..) {
            subscription.unsubscribe();
        }
    }
}

/// Opacity per label: full when no value of the field is active, otherwise
/// full only for active values
fn dimmed_opacities(binding: &FieldBinding, labels: &[String], active: &[&FilterValue]) -> Vec<f32> {
    labels
        .iter()
        .map(|label| {
            if active.is_empty() {
                return FULL_OPACITY;
            }
            let selected = binding
                .handler
                .value_for(label)
                .map(|value| active.iter().any(|a| a.eq_ignore_case(&value)))
                .unwrap_or(false);
            if selected {
                FULL_OPACITY
            } else {
                DIMMED_OPACITY
            }
        })
        .collect()
}

/// Live wiring of one chart; released on [`CrossfilterBinding::destroy`] or drop
pub struct CrossfilterBinding {
    inner: Arc<BindingInner>,
}

impl CrossfilterBinding {
    pub fn chart_id(&self) -> &str {
        self.inner.surface.chart_id()
    }

    pub fn is_filterable(&self) -> bool {
        self.inner.binding.is_some()
    }

    /// Whether bus listeners are still registered
    pub fn is_listening(&self) -> bool {
        self.inner.subscriptions.lock().iter().any(Subscription::is_active)
    }

    /// Record modifier state at pointer-down; some renderers lose it on click
    pub fn on_pointer_down(&self, modifiers: Modifiers) {
        self.inner
            .multi_armed
            .store(modifiers.is_multi_select(), Ordering::Relaxed);
    }

    /// Toggle the filter for the clicked data point
    pub fn on_click(&self, event: ClickEvent) -> ClickOutcome {
        let inner = &self.inner;
        let multi_select = inner.multi_armed.swap(false, Ordering::Relaxed) || event.modifiers.is_multi_select();

        let Some(binding) = inner.binding.as_ref() else {
            return ClickOutcome::Ignored(IgnoreReason::NonFilterable);
        };
        if !inner.surface.is_attached() {
            return ClickOutcome::Ignored(IgnoreReason::Detached);
        }
        let Some(index) = event.element_index else {
            return ClickOutcome::Ignored(IgnoreReason::NoElement);
        };
        let Some(value) = inner.label_at(index).and_then(|label| binding.handler.value_for(&label)) else {
            return ClickOutcome::Ignored(IgnoreReason::NoLabel);
        };

        tracing::debug!(
            "Chart '{}' clicked: {} = {} (multi-select: {})",
            inner.surface.chart_id(),
            binding.field,
            value,
            multi_select
        );
        inner.manager.apply(
            binding.field.clone(),
            value.clone(),
            Some(inner.surface.chart_id()),
            ApplyOptions::default()
                .toggle(true)
                .operator(binding.operator)
                .clear_previous(!multi_select),
        );

        ClickOutcome::Scheduled {
            field: binding.field.clone(),
            value,
            multi_select,
        }
    }

    /// Secondary click clears every filter
    pub fn on_context_menu(&self) -> ContextMenuResponse {
        ContextMenuResponse {
            prevent_default: true,
            transition: self.inner.manager.clear(),
        }
    }

    /// Recompute and paint the dimming for the current filter set
    pub fn refresh_highlight(&self) -> Option<Vec<f32>> {
        self.inner.refresh_highlight()
    }

    /// Release bus listeners; call when the chart is destroyed
    pub fn destroy(&self) {
        self.inner.release();
    }
}

impl Drop for CrossfilterBinding {
    fn drop(&mut self) {
        self.inner.release();
    }
}
