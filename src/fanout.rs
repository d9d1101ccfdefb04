//! Broadcast of filesystem change events to per-connection mailboxes.
//!
//! Every registered connection owns a [`Mailbox`] together with its
//! subscription set. [`Fanout::publish`] queues one copy of an event in
//! each mailbox whose subscriptions match, so draining one mailbox never
//! affects another.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Change,
    Create,
    Delete,
    Move,
}

/// A change below the served root. Paths are root-relative wire paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub kind: EventKind,
    pub path: String,
    /// Only set for [`EventKind::Move`].
    pub dest_path: Option<String>,
    pub is_dir: bool,
}

impl NotificationEvent {
    pub fn new(kind: EventKind, path: impl Into<String>, is_dir: bool) -> Self {
        Self {
            kind,
            path: path.into(),
            dest_path: None,
            is_dir,
        }
    }

    pub fn moved(src: impl Into<String>, dest: impl Into<String>, is_dir: bool) -> Self {
        Self {
            kind: EventKind::Move,
            path: src.into(),
            dest_path: Some(dest.into()),
            is_dir,
        }
    }

    fn paths(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.path.as_str()).chain(self.dest_path.as_deref())
    }
}

/// Parent of a wire path; top-level entries have the root `.` as parent.
pub fn parent_path(path: &str) -> &str {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some((parent, _)) if !parent.is_empty() => parent,
        _ => ".",
    }
}

/// Paths one connection asked to be notified about.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionSet {
    paths: HashSet<String>,
}

impl SubscriptionSet {
    pub fn insert(&mut self, path: impl Into<String>) -> bool {
        self.paths.insert(path.into())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Matches the path itself or its direct parent directory.
    pub fn is_interested_in(&self, path: &str) -> bool {
        self.contains(path) || self.contains(parent_path(path))
    }

    /// A move is interesting if either end of it is.
    pub fn is_interested(&self, event: &NotificationEvent) -> bool {
        event.paths().any(|path| self.is_interested_in(path))
    }
}

type ConnectionId = u64;

struct Registration {
    subscriptions: SubscriptionSet,
    tx: mpsc::UnboundedSender<NotificationEvent>,
}

#[derive(Default)]
struct Registry {
    next_id: ConnectionId,
    entries: HashMap<ConnectionId, Registration>,
}

/// Process-wide hub; cheap to clone.
#[derive(Clone, Default)]
pub struct Fanout {
    registry: Arc<Mutex<Registry>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        // Registry updates are single inserts/removes, so a panicking
        // holder cannot leave it half-modified.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attaches a new, empty mailbox. It is detached when dropped.
    pub fn register(&self) -> Mailbox {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.insert(
            id,
            Registration {
                subscriptions: SubscriptionSet::default(),
                tx,
            },
        );
        Mailbox {
            id,
            fanout: self.clone(),
            rx,
        }
    }

    fn unregister(&self, id: ConnectionId) {
        self.lock().entries.remove(&id);
    }

    /// Queues a copy of `event` for every interested connection and returns
    /// how many received it.
    pub fn publish(&self, event: &NotificationEvent) -> usize {
        let registry = self.lock();
        registry
            .entries
            .values()
            .filter(|entry| entry.subscriptions.is_interested(event))
            .filter(|entry| entry.tx.send(event.clone()).is_ok())
            .count()
    }

    pub fn connection_count(&self) -> usize {
        self.lock().entries.len()
    }
}

/// One connection's private queue of pending events, in publish order.
pub struct Mailbox {
    id: ConnectionId,
    fanout: Fanout,
    rx: mpsc::UnboundedReceiver<NotificationEvent>,
}

impl Mailbox {
    /// Adds `path` to this connection's subscription set.
    pub fn subscribe(&self, path: impl Into<String>) {
        if let Some(entry) = self.fanout.lock().entries.get_mut(&self.id) {
            entry.subscriptions.insert(path);
        }
    }

    pub fn subscriptions(&self) -> SubscriptionSet {
        self.fanout
            .lock()
            .entries
            .get(&self.id)
            .map(|entry| entry.subscriptions.clone())
            .unwrap_or_default()
    }

    /// Removes and returns everything queued right now without waiting.
    pub fn try_drain(&mut self) -> Vec<NotificationEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Waits for the next event. Cancel safe.
    pub async fn recv(&mut self) -> Option<NotificationEvent> {
        self.rx.recv().await
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        self.fanout.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_of_paths() {
        assert_eq!(parent_path("docs/new.txt"), "docs");
        assert_eq!(parent_path("a/b/c"), "a/b");
        assert_eq!(parent_path("top.txt"), ".");
        assert_eq!(parent_path("dir/"), ".");
    }

    #[test]
    fn interest_is_self_or_parent() {
        let mut subs = SubscriptionSet::default();
        subs.insert("docs");
        assert!(subs.is_interested_in("docs"));
        assert!(subs.is_interested_in("docs/new.txt"));
        assert!(!subs.is_interested_in("docs/deep/new.txt"));
        assert!(!subs.is_interested_in("other/new.txt"));

        let mut root = SubscriptionSet::default();
        root.insert(".");
        assert!(root.is_interested_in("top.txt"));
        assert!(!root.is_interested_in("docs/new.txt"));
    }

    #[test]
    fn move_matches_either_end() {
        let mut subs = SubscriptionSet::default();
        subs.insert("dst");
        assert!(subs.is_interested(&NotificationEvent::moved("src/a", "dst/a", false)));
        assert!(!subs.is_interested(&NotificationEvent::moved("src/a", "x/a", false)));
    }

    #[test]
    fn subscribed_connection_receives_create() {
        let fanout = Fanout::new();
        let mut docs = fanout.register();
        let mut other = fanout.register();
        docs.subscribe("docs");
        other.subscribe("other");

        let event = NotificationEvent::new(EventKind::Create, "docs/new.txt", false);
        assert_eq!(fanout.publish(&event), 1);

        assert_eq!(docs.try_drain(), vec![event]);
        assert!(other.try_drain().is_empty());
    }

    #[test]
    fn every_subscriber_gets_its_own_copy() {
        let fanout = Fanout::new();
        let mut first = fanout.register();
        let mut second = fanout.register();
        first.subscribe("shared");
        second.subscribe("shared");

        let event = NotificationEvent::new(EventKind::Change, "shared/f", false);
        assert_eq!(fanout.publish(&event), 2);

        assert_eq!(first.try_drain(), vec![event.clone()]);
        assert!(first.try_drain().is_empty());
        assert_eq!(second.try_drain(), vec![event]);
    }

    #[test]
    fn events_keep_publish_order() {
        let fanout = Fanout::new();
        let mut mailbox = fanout.register();
        mailbox.subscribe(".");

        let events: Vec<_> = (0..5)
            .map(|i| NotificationEvent::new(EventKind::Change, format!("f{i}"), false))
            .collect();
        for event in &events {
            fanout.publish(event);
        }
        assert_eq!(mailbox.try_drain(), events);
    }

    #[test]
    fn dropped_mailbox_is_unregistered() {
        let fanout = Fanout::new();
        let mailbox = fanout.register();
        mailbox.subscribe(".");
        assert_eq!(fanout.connection_count(), 1);
        drop(mailbox);
        assert_eq!(fanout.connection_count(), 0);
        assert_eq!(
            fanout.publish(&NotificationEvent::new(EventKind::Delete, "x", false)),
            0
        );
    }

    #[test]
    fn subscriptions_are_per_connection() {
        let fanout = Fanout::new();
        let first = fanout.register();
        let second = fanout.register();
        first.subscribe("a");
        assert!(first.subscriptions().contains("a"));
        assert_eq!(second.subscriptions().len(), 0);
    }

    #[tokio::test]
    async fn recv_wakes_on_publish() {
        let fanout = Fanout::new();
        let mut mailbox = fanout.register();
        mailbox.subscribe("dir");

        let publisher = fanout.clone();
        tokio::spawn(async move {
            publisher.publish(&NotificationEvent::new(EventKind::Create, "dir/x", true));
        });

        let event = mailbox.recv().await.unwrap();
        assert_eq!(event.path, "dir/x");
        assert!(event.is_dir);
    }
}
