//! In-process fan-out of typed events between components (source spec
//! §4.1/§9 "Event bus typing"). Keyed by the closed [`EventKind`] enum
//! rather than a string, so there is exactly one place that enumerates the
//! set of things the mesh can tell a listener about.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use protocol::{InventoryItem, NetMessage, PlayerId};

/// The closed set of event names a listener can subscribe to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EventKind {
    PeerJoin,
    PeerLeave,
    HostChange,
    PlayerMove,
    InventoryUpdate,
    ObjectTransfer,
    StateSync,
    StateDelta,
    SharedPayload,
    NetMessage,
    Ping,
    MaxCapacityReached,
}

/// A typed event payload. One variant per [`EventKind`]; dispatch on these
/// is exhaustive by construction.
#[derive(Clone, Debug)]
pub enum Event {
    PeerJoin { peer: PlayerId },
    PeerLeave { peer: PlayerId },
    HostChange { host: PlayerId },
    PlayerMove { peer: PlayerId },
    InventoryUpdate { peer: PlayerId },
    ObjectTransfer {
        from: PlayerId,
        to: PlayerId,
        item: InventoryItem,
    },
    StateSync { tick: u64 },
    StateDelta { tick: u64 },
    SharedPayload {
        from: PlayerId,
        payload: serde_json::Value,
        channel: Option<String>,
    },
    NetMessage { message: NetMessage },
    Ping { peer: PlayerId, rtt_ms: f64 },
    MaxCapacityReached { max_players: u16 },
}

impl Event {
    /// The [`EventKind`] a given event dispatches under.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::PeerJoin { .. } => EventKind::PeerJoin,
            Event::PeerLeave { .. } => EventKind::PeerLeave,
            Event::HostChange { .. } => EventKind::HostChange,
            Event::PlayerMove { .. } => EventKind::PlayerMove,
            Event::InventoryUpdate { .. } => EventKind::InventoryUpdate,
            Event::ObjectTransfer { .. } => EventKind::ObjectTransfer,
            Event::StateSync { .. } => EventKind::StateSync,
            Event::StateDelta { .. } => EventKind::StateDelta,
            Event::SharedPayload { .. } => EventKind::SharedPayload,
            Event::NetMessage { .. } => EventKind::NetMessage,
            Event::Ping { .. } => EventKind::Ping,
            Event::MaxCapacityReached { .. } => EventKind::MaxCapacityReached,
        }
    }
}

/// A handle returned by [`EventBus::subscribe`]; pass it to
/// [`EventBus::unsubscribe`] to drop that one listener.
#[derive(Clone, Copy, Debug)]
pub struct SubscriptionHandle {
    kind: EventKind,
    id: u64,
}

struct Subscriber {
    id: u64,
    handler: Box<dyn Fn(&Event) + Send>,
}

/// The multicast registry itself.
#[derive(Default)]
pub struct EventBus {
    subscribers: HashMap<EventKind, Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `kind`, returning a handle that can later be
    /// passed to [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe(
        &mut self,
        kind: EventKind,
        handler: impl Fn(&Event) + Send + 'static,
    ) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.entry(kind).or_default().push(Subscriber {
            id,
            handler: Box::new(handler),
        });
        SubscriptionHandle { kind, id }
    }

    /// Drops the listener registered under `handle`. No-op if it was
    /// already removed.
    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) {
        if let Some(list) = self.subscribers.get_mut(&handle.kind) {
            list.retain(|s| s.id != handle.id);
        }
    }

    /// Delivers `event` synchronously, in subscription order, to every
    /// listener registered for its kind. A listener panicking does not
    /// prevent delivery to the remaining listeners.
    pub fn emit(&self, event: Event) {
        let Some(list) = self.subscribers.get(&event.kind()) else {
            return;
        };
        for subscriber in list {
            let handler = &subscriber.handler;
            let result = panic::catch_unwind(AssertUnwindSafe(|| handler(&event)));
            if result.is_err() {
                tracing::error!(kind = ?event.kind(), "event listener panicked");
            }
        }
    }

    /// Drops every subscriber across every kind. Called on disposal.
    pub fn clear(&mut self) {
        self.subscribers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn delivers_in_insertion_order() {
        let mut bus = EventBus::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.subscribe(EventKind::PeerJoin, move |_| o1.lock().unwrap().push(1));
        let o2 = order.clone();
        bus.subscribe(EventKind::PeerJoin, move |_| o2.lock().unwrap().push(2));

        bus.emit(Event::PeerJoin { peer: PlayerId::from("A") });
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn panicking_listener_does_not_block_siblings() {
        let mut bus = EventBus::new();
        let called = Arc::new(AtomicUsize::new(0));

        bus.subscribe(EventKind::PeerLeave, |_| panic!("boom"));
        let c = called.clone();
        bus.subscribe(EventKind::PeerLeave, move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });

        bus.emit(Event::PeerLeave { peer: PlayerId::from("A") });
        assert_eq!(called.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn unsubscribe_removes_only_that_listener() {
        let mut bus = EventBus::new();
        let called = Arc::new(AtomicUsize::new(0));
        let c = called.clone();
        let handle = bus.subscribe(EventKind::HostChange, move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });
        bus.unsubscribe(handle);
        bus.emit(Event::HostChange { host: PlayerId::from("A") });
        assert_eq!(called.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn clear_drops_every_subscriber() {
        let mut bus = EventBus::new();
        let called = Arc::new(AtomicUsize::new(0));
        let c = called.clone();
        bus.subscribe(EventKind::Ping, move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });
        bus.clear();
        bus.emit(Event::Ping { peer: PlayerId::from("A"), rtt_ms: 1.0 });
        assert_eq!(called.load(Ordering::Relaxed), 0);
    }
}
