//! View-side wiring of the dashboard
//!
//! Charts are bound to the filter state through [`CrossfilterHelper`], and
//! pages reload themselves on filter changes through [`PageAutoConnect`].

pub mod crossfilter;
pub mod pages;

pub use crossfilter::{
    BindOptions, ChartSurface, ClickEvent, ClickOutcome, ContextMenuResponse, CrossfilterBinding,
    CrossfilterHelper, IgnoreReason, Modifiers, DIMMED_OPACITY, FULL_OPACITY,
};
pub use pages::{is_visible, ElementState, PageAutoConnect, PageHost, PageOptions, ReloadFn, RELOAD_TOPICS};
