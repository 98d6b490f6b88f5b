//! Event subscription registry.
//!
//! Clients opt into notify events with select-input; the registry keeps one
//! mask and delivery sink per client and a cached union of all masks so the
//! hot path can skip fanout entirely when nobody listens.

use std::collections::HashMap;
use std::fmt;

use crate::wire::{EventMask, NotifyEvent};

/// Identifies one connected client of the embedding server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u32);

impl ClientId {
    pub const fn from_raw(raw: u32) -> Self {
        ClientId(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Per-client event delivery, implemented by the embedder.
///
/// The registry hands over the typed event; filling in the client's sequence
/// number and serializing for its byte order is the sink's job.
pub trait EventSink: Send {
    fn deliver(&self, event: &NotifyEvent);
}

struct Subscriber {
    mask: EventMask,
    sink: Box<dyn EventSink>,
}

#[derive(Default)]
pub struct EventRegistry {
    subscribers: HashMap<ClientId, Subscriber>,
    global_mask: EventMask,
}

impl EventRegistry {
    pub fn new() -> Self {
        EventRegistry { subscribers: HashMap::new(), global_mask: EventMask::empty() }
    }

    /// Replaces the client's subscription. An empty mask removes it.
    pub fn select_input(&mut self, client: ClientId, mask: EventMask, sink: Box<dyn EventSink>) {
        if mask.is_empty() {
            self.subscribers.remove(&client);
        } else {
            self.subscribers.insert(client, Subscriber { mask, sink });
        }
        self.recompute();
    }

    /// Drops the client's subscription, if any. Called on disconnect.
    pub fn remove_client(&mut self, client: ClientId) {
        if self.subscribers.remove(&client).is_some() {
            self.recompute();
        }
    }

    /// Union of every subscriber's mask.
    pub fn global_mask(&self) -> EventMask {
        self.global_mask
    }

    /// Delivers the event to every client whose mask includes notify.
    pub fn fan_out(&self, event: &NotifyEvent) {
        if !self.global_mask.contains(EventMask::NOTIFY) {
            return;
        }
        for subscriber in self.subscribers.values() {
            if subscriber.mask.contains(EventMask::NOTIFY) {
                subscriber.sink.deliver(event);
            }
        }
    }

    pub fn clear(&mut self) {
        self.subscribers.clear();
        self.global_mask = EventMask::empty();
    }

    fn recompute(&mut self) {
        self.global_mask = self
            .subscribers
            .values()
            .fold(EventMask::empty(), |mask, subscriber| mask | subscriber.mask);
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistry")
            .field("subscribers", &self.subscribers.keys())
            .field("global_mask", &self.global_mask)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::wire::{ContextId, NotifyKind};

    #[derive(Clone, Default)]
    struct Inbox(Arc<Mutex<Vec<NotifyEvent>>>);

    impl EventSink for Inbox {
        fn deliver(&self, event: &NotifyEvent) {
            self.0.lock().unwrap().push(*event);
        }
    }

    fn notify() -> NotifyEvent {
        NotifyEvent {
            kind: NotifyKind::StartComposition,
            sequence: 0,
            context: ContextId::from_raw(1),
            time: 0,
            arg: 0,
        }
    }

    #[test]
    fn empty_mask_removes_the_subscription() {
        let mut registry = EventRegistry::new();
        let inbox = Inbox::default();
        let client = ClientId::from_raw(1);

        registry.select_input(client, EventMask::NOTIFY, Box::new(inbox.clone()));
        assert_eq!(registry.global_mask(), EventMask::NOTIFY);

        registry.select_input(client, EventMask::empty(), Box::new(inbox.clone()));
        assert_eq!(registry.global_mask(), EventMask::empty());

        registry.fan_out(&notify());
        assert!(inbox.0.lock().unwrap().is_empty());
    }

    #[test]
    fn fanout_reaches_every_subscriber_once() {
        let mut registry = EventRegistry::new();
        let first = Inbox::default();
        let second = Inbox::default();
        registry.select_input(ClientId::from_raw(1), EventMask::NOTIFY, Box::new(first.clone()));
        registry.select_input(ClientId::from_raw(2), EventMask::NOTIFY, Box::new(second.clone()));

        registry.fan_out(&notify());
        assert_eq!(first.0.lock().unwrap().len(), 1);
        assert_eq!(second.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn disconnect_updates_the_cached_mask() {
        let mut registry = EventRegistry::new();
        let client = ClientId::from_raw(7);
        registry.select_input(client, EventMask::NOTIFY, Box::new(Inbox::default()));
        registry.remove_client(client);
        assert_eq!(registry.global_mask(), EventMask::empty());
    }
}
