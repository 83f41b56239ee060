//! Session-wide publish/subscribe bus
//!
//! Listeners are keyed by topic string and invoked synchronously, in
//! registration order. A failing listener (error or panic) is logged and
//! never stops delivery to the listeners registered after it.

mod payload;

pub use payload::EventPayload;

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use uuid::Uuid;

/// Well-known topic names
pub mod topics {
    pub const FILTER_APPLIED: &str = "filter:applied";
    pub const FILTER_REMOVED: &str = "filter:removed";
    pub const FILTER_CLEARED: &str = "filter:cleared";
    pub const CHARTS_UPDATE_REQUESTED: &str = "charts:update-requested";
    pub const CHART_REGISTERED: &str = "chart:registered";
    pub const CHART_UNREGISTERED: &str = "chart:unregistered";

    /// Topics that signal a change of the active filter set
    pub const FILTER_CHANGES: [&str; 3] = [FILTER_APPLIED, FILTER_REMOVED, FILTER_CLEARED];
}

/// Callback invoked for every event on a topic
pub type Callback = Arc<dyn Fn(&EventPayload) -> anyhow::Result<()> + Send + Sync>;

/// Identifier of one registered listener
pub type SubscriptionId = Uuid;

struct Listener {
    id: SubscriptionId,
    callback: Callback,
}

type ListenerTable = IndexMap<String, Vec<Listener>>;

/// Publish/subscribe registry shared by every component of a session
pub struct EventBus {
    listeners: Arc<Mutex<ListenerTable>>,
}

impl EventBus {
    /// Create a new, empty event bus
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(IndexMap::new())),
        }
    }

    /// Register `callback` at the end of `topic`'s listener list
    pub fn subscribe<F>(&self, topic: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&EventPayload) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_callback(topic.into(), Arc::new(callback))
    }

    /// Register one shared callback on several topics
    pub fn subscribe_many<F>(&self, topics: &[&str], callback: F) -> Vec<Subscription>
    where
        F: Fn(&EventPayload) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        topics
            .iter()
            .map(|topic| self.subscribe_callback((*topic).to_string(), Arc::clone(&callback)))
            .collect()
    }

    fn subscribe_callback(&self, topic: String, callback: Callback) -> Subscription {
        let id = Uuid::new_v4();
        self.listeners
            .lock()
            .entry(topic.clone())
            .or_default()
            .push(Listener { id, callback });

        Subscription {
            table: Arc::downgrade(&self.listeners),
            topic,
            id,
        }
    }

    /// Deliver `payload` to every listener currently registered for `topic`.
    ///
    /// Returns the number of listeners that handled the event successfully.
    pub fn emit(&self, topic: &str, payload: &EventPayload) -> usize {
        // Snapshot so listeners may subscribe, unsubscribe or emit re-entrantly
        let callbacks: Vec<(SubscriptionId, Callback)> = match self.listeners.lock().get(topic) {
            Some(list) => list.iter().map(|l| (l.id, Arc::clone(&l.callback))).collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for (id, callback) in callbacks {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::warn!("Listener {} on '{}' failed: {:#}", id, topic, e);
                }
                Err(_) => {
                    tracing::warn!("Listener {} on '{}' panicked", id, topic);
                }
            }
        }
        delivered
    }

    /// Emit `payload` on the topic it belongs to
    pub fn publish(&self, payload: EventPayload) -> usize {
        self.emit(payload.topic(), &payload)
    }

    /// Remove every listener registered for `topic`
    pub fn unsubscribe_topic(&self, topic: &str) {
        if let Some(removed) = self.listeners.lock().shift_remove(topic) {
            tracing::debug!("Removed {} listeners from '{}'", removed.len(), topic);
        }
    }

    /// Number of listeners registered for `topic`
    pub fn listener_count(&self, topic: &str) -> usize {
        self.listeners.lock().get(topic).map(Vec::len).unwrap_or(0)
    }

    /// Topics with at least one listener, in first-subscription order
    pub fn list_topics(&self) -> Vec<String> {
        self.listeners.lock().keys().cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.listeners.lock();
        f.debug_map()
            .entries(table.iter().map(|(topic, list)| (topic, list.len())))
            .finish()
    }
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
    table: Weak<Mutex<ListenerTable>>,
    topic: String,
    id: SubscriptionId,
}

impl Subscription {
    /// Remove exactly this listener. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        let mut table = table.lock();
        let now_empty = match table.get_mut(&self.topic) {
            Some(list) => {
                list.retain(|l| l.id != self.id);
                list.is_empty()
            }
            None => false,
        };
        if now_empty {
            table.shift_remove(&self.topic);
        }
    }

    /// Whether the listener is still registered
    pub fn is_active(&self) -> bool {
        self.table
            .upgrade()
            .map(|table| {
                table
                    .lock()
                    .get(&self.topic)
                    .map(|list| list.iter().any(|l| l.id == self.id))
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Callback) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = Arc::clone(&log);
            move |name: &str| -> Callback {
                let log = Arc::clone(&log);
                let name = name.to_string();
                Arc::new(move |_: &EventPayload| {
                    log.lock().push(name.clone());
                    Ok(())
                })
            }
        };
        (log, make)
    }

    #[test]
    fn test_delivery_in_registration_order() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        for name in ["a", "b", "c"] {
            let cb = make(name);
            bus.subscribe("topic", move |p: &EventPayload| cb(p));
        }

        let delivered = bus.emit("topic", &EventPayload::FilterCleared);
        assert_eq!(delivered, 3);
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let first = make("first");
        let second = make("second");
        let sub = bus.subscribe("topic", move |p: &EventPayload| first(p));
        bus.subscribe("topic", move |p: &EventPayload| second(p));

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert_eq!(bus.listener_count("topic"), 1);

        bus.emit("topic", &EventPayload::FilterCleared);
        assert_eq!(*log.lock(), vec!["second"]);
    }

    #[test]
    fn test_failing_listeners_do_not_stop_emit() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        bus.subscribe("topic", |_: &EventPayload| Err(anyhow!("boom")));
        bus.subscribe("topic", |_: &EventPayload| -> anyhow::Result<()> { panic!("listener panic") });
        let last = make("last");
        bus.subscribe("topic", move |p: &EventPayload| last(p));

        let delivered = bus.emit("topic", &EventPayload::FilterCleared);
        assert_eq!(delivered, 1);
        assert_eq!(*log.lock(), vec!["last"]);
    }

    #[test]
    fn test_unsubscribe_topic_and_introspection() {
        let bus = EventBus::new();
        bus.subscribe(topics::FILTER_APPLIED, |_: &EventPayload| Ok(()));
        bus.subscribe(topics::FILTER_APPLIED, |_: &EventPayload| Ok(()));
        bus.subscribe(topics::FILTER_CLEARED, |_: &EventPayload| Ok(()));

        assert_eq!(bus.listener_count(topics::FILTER_APPLIED), 2);
        assert_eq!(
            bus.list_topics(),
            vec![topics::FILTER_APPLIED.to_string(), topics::FILTER_CLEARED.to_string()]
        );

        bus.unsubscribe_topic(topics::FILTER_APPLIED);
        assert_eq!(bus.listener_count(topics::FILTER_APPLIED), 0);
        assert_eq!(bus.list_topics(), vec![topics::FILTER_CLEARED.to_string()]);
        assert_eq!(bus.emit(topics::FILTER_APPLIED, &EventPayload::FilterCleared), 0);
    }

    #[test]
    fn test_listener_can_subscribe_during_emit() {
        let bus = Arc::new(EventBus::new());
        let inner_bus = Arc::clone(&bus);
        bus.subscribe("topic", move |_: &EventPayload| {
            inner_bus.subscribe("topic", |_: &EventPayload| Ok(()));
            Ok(())
        });

        // The listener added mid-emit is not part of the running snapshot
        assert_eq!(bus.emit("topic", &EventPayload::FilterCleared), 1);
        assert_eq!(bus.listener_count("topic"), 2);
    }

    #[test]
    fn test_publish_routes_by_payload_topic() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let cb = make("cleared");
        bus.subscribe(topics::FILTER_CLEARED, move |p: &EventPayload| cb(p));

        assert_eq!(bus.publish(EventPayload::FilterCleared), 1);
        assert_eq!(*log.lock(), vec!["cleared"]);
    }
}
