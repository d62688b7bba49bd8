//! Store lifecycle events.
//!
//! Every [`Store::add`](super::Store::add) emits [`StoreEvent::Added`] and
//! every [`Store::remove`](super::Store::remove) emits
//! [`StoreEvent::Removed`]. Reverse-relation collections watch the same
//! feed to keep their members current without querying again. Watchers get
//! weak handles, so a collection that is read rarely never keeps removed
//! entities alive.

use crate::entity::{Entity, EntityRef};
use parking_lot::RwLock;
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Weak};

/// A change in the set of entities a store knows about.
#[derive(Clone)]
pub enum StoreEvent {
    /// The entity was registered with the store.
    Added(EntityRef),
    /// The entity was removed from the store.
    Removed(EntityRef),
}

impl StoreEvent {
    /// The entity the event is about.
    #[must_use]
    pub fn entity(&self) -> &EntityRef {
        match self {
            Self::Added(entity) | Self::Removed(entity) => entity,
        }
    }
}

impl fmt::Debug for StoreEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added(entity) => f.debug_tuple("Added").field(entity).finish(),
            Self::Removed(entity) => f.debug_tuple("Removed").field(entity).finish(),
        }
    }
}

/// A [`StoreEvent`] that does not own its entity.
#[derive(Clone)]
pub(crate) enum WeakEvent {
    Added(Weak<Entity>),
    Removed(Weak<Entity>),
}

impl From<&StoreEvent> for WeakEvent {
    fn from(event: &StoreEvent) -> Self {
        match event {
            StoreEvent::Added(entity) => Self::Added(Arc::downgrade(entity)),
            StoreEvent::Removed(entity) => Self::Removed(Arc::downgrade(entity)),
        }
    }
}

/// Fan-out of store events to any number of subscribers.
///
/// Subscribers whose receiver was dropped are pruned on the next emit.
#[derive(Default)]
pub(crate) struct EventFeed {
    subscribers: RwLock<Vec<Sender<StoreEvent>>>,
    watchers: RwLock<Vec<Sender<WeakEvent>>>,
}

impl EventFeed {
    pub(crate) fn subscribe(&self) -> Receiver<StoreEvent> {
        let (sender, receiver) = mpsc::channel();
        self.subscribers.write().push(sender);
        receiver
    }

    pub(crate) fn watch(&self) -> Receiver<WeakEvent> {
        let (sender, receiver) = mpsc::channel();
        self.watchers.write().push(sender);
        receiver
    }

    pub(crate) fn emit(&self, event: &StoreEvent) {
        self.subscribers
            .write()
            .retain(|sender| sender.send(event.clone()).is_ok());
        let weak = WeakEvent::from(event);
        self.watchers
            .write()
            .retain(|sender| sender.send(weak.clone()).is_ok());
    }

    /// Disconnects every subscriber and watcher.
    pub(crate) fn reset(&self) {
        self.subscribers.write().clear();
        self.watchers.write().clear();
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.read().len() + self.watchers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::test_support::node_schema;

    #[test]
    fn events_reach_every_subscriber() {
        let feed = EventFeed::default();
        let first = feed.subscribe();
        let second = feed.subscribe();
        let node = Entity::new(node_schema());

        feed.emit(&StoreEvent::Added(node.clone()));
        assert!(matches!(first.try_recv(), Ok(StoreEvent::Added(_))));
        assert!(matches!(second.try_recv(), Ok(StoreEvent::Added(_))));
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let feed = EventFeed::default();
        let kept = feed.subscribe();
        drop(feed.subscribe());
        feed.emit(&StoreEvent::Removed(Entity::new(node_schema())));
        assert_eq!(feed.subscriber_count(), 1);
        assert!(kept.try_recv().is_ok());
    }

    #[test]
    fn watchers_do_not_own_entities() {
        let feed = EventFeed::default();
        let watcher = feed.watch();
        let node = Entity::new(node_schema());
        feed.emit(&StoreEvent::Added(node.clone()));
        drop(node);

        match watcher.try_recv() {
            Ok(WeakEvent::Added(weak)) => assert!(weak.upgrade().is_none()),
            _ => panic!("expected an Added event"),
        }
    }

    #[test]
    fn reset_disconnects_everyone() {
        let feed = EventFeed::default();
        let subscriber = feed.subscribe();
        let watcher = feed.watch();
        feed.reset();

        assert_eq!(feed.subscriber_count(), 0);
        assert!(subscriber.recv().is_err());
        assert!(watcher.recv().is_err());
    }
}
