//! The synchronous event bus (C8): the cross-service seam between the
//! MCP connection managers, the state update service, and anything else
//! that wants to observe domain changes without being wired in directly.
//!
//! Kept deliberately separate from the UI callback surface (see
//! `RuntimeCallbacks` at the adapter boundary) — subscribers here must
//! not assume ordering relative to callbacks, only relative to each other.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Connection status mirrored from the MCP lifecycle state machine, carried
/// on the bus so subscribers don't need a direct reference to the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum DomainEvent {
    ConnectionStatusChanged {
        server: String,
        status: ConnectionStatus,
    },
    ReconnectProgress {
        server: String,
        attempts: u32,
        max_attempts: u32,
        next_retry_delay_secs: f64,
    },
    ArtifactsFetched {
        server: String,
        changed: bool,
    },
    StateChanged {
        session_id: String,
        component: String,
        change_type: String,
        details: Value,
    },
}

/// A subscriber is a plain callable. The bus invokes it synchronously on
/// the publisher's thread; a panic inside `Subscriber::call` is the
/// subscriber's own problem to avoid (the bus does not catch unwinds), but
/// a returned `Err` never halts delivery to the remaining subscribers.
pub trait Subscriber: Send + Sync {
    fn on_event(&self, event: &DomainEvent);
}

impl<F> Subscriber for F
where
    F: Fn(&DomainEvent) + Send + Sync,
{
    fn on_event(&self, event: &DomainEvent) {
        self(event)
    }
}

/// Opaque handle returned from `subscribe`, usable to `unsubscribe` later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

struct Entry {
    id: SubscriptionId,
    subscriber: Arc<dyn Subscriber>,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry").field("id", &self.id).finish()
    }
}

/// A synchronous publish-subscribe hub. Subscribers are invoked in
/// registration order; one subscriber failing to run to completion does
/// not prevent the others from being invoked.
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<EventBusInner>,
}

#[derive(Default)]
struct EventBusInner {
    subscribers: Vec<Entry>,
    next_id: u64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("EventBus")
            .field("subscriber_count", &inner.subscribers.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber, returning a handle that can later be passed
    /// to `unsubscribe`. Registration order determines delivery order.
    pub fn subscribe(&self, subscriber: impl Subscriber + 'static) -> SubscriptionId {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        inner.subscribers.push(Entry {
            id,
            subscriber: Arc::new(subscriber),
        });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|e| e.id != id);
    }

    /// Deliver `event` to every current subscriber, in registration order.
    /// Subscribers are cloned out from under the lock before invocation so
    /// a subscriber calling back into `subscribe`/`unsubscribe` cannot
    /// deadlock against the publish in progress.
    pub fn publish(&self, event: DomainEvent) {
        let subscribers: Vec<Arc<dyn Subscriber>> = {
            let inner = self.inner.lock();
            inner.subscribers.iter().map(|e| e.subscriber.clone()).collect()
        };
        for subscriber in subscribers {
            subscriber.on_event(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_event(tag: &str) -> DomainEvent {
        DomainEvent::StateChanged {
            session_id: "s1".into(),
            component: "knowledge_base".into(),
            change_type: tag.into(),
            details: Value::Null,
        }
    }

    #[test]
    fn subscribers_called_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.subscribe(move |_: &DomainEvent| o1.lock().push(1));
        let o2 = order.clone();
        bus.subscribe(move |_: &DomainEvent| o2.lock().push(2));
        let o3 = order.clone();
        bus.subscribe(move |_: &DomainEvent| o3.lock().push(3));

        bus.publish(sample_event("x"));

        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn each_subscriber_invoked_exactly_once_per_publish() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.subscribe(move |_: &DomainEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(sample_event("a"));
        bus.publish(sample_event("b"));

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn a_failing_subscriber_never_blocks_the_others() {
        let bus = EventBus::new();
        let ran = Arc::new(AtomicUsize::new(0));

        bus.subscribe(|_: &DomainEvent| {
            // Simulates a subscriber that swallows its own error rather
            // than propagating — the bus has no channel for subscriber
            // failures by design.
            let _: Result<(), &str> = Err("boom");
        });
        let r = ran.clone();
        bus.subscribe(move |_: &DomainEvent| {
            r.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(sample_event("x"));

        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_further_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = bus.subscribe(move |_: &DomainEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(sample_event("a"));
        bus.unsubscribe(id);
        bus.publish(sample_event("b"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn connection_status_changed_serializes_with_event_tag() {
        let event = DomainEvent::ConnectionStatusChanged {
            server: "browser".into(),
            status: ConnectionStatus::Reconnecting,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "connection_status_changed");
        assert_eq!(json["status"], "reconnecting");
    }
}
