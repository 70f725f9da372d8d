use std::sync::{PoisonError, RwLock};

use tokio::sync::broadcast;

use dmodel_types::{PathAddress, SearchKey};

/// A change to the mirrored tree, published after it is committed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeEvent {
    /// A node's child listing was committed.
    ChildrenChanged {
        path: PathAddress,
        generation: u64,
        created: usize,
        updated: usize,
        removed: Vec<SearchKey>,
    },
    /// A node was dropped from the tree, directly or with an ancestor.
    NodeInvalidated { path: PathAddress },
    VisibilityChanged { path: PathAddress, visible: bool },
}

/// Discriminant of a [`TreeEvent`], for filtering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TreeEventKind {
    ChildrenChanged,
    NodeInvalidated,
    VisibilityChanged,
}

impl TreeEvent {
    pub fn path(&self) -> &PathAddress {
        match self {
            Self::ChildrenChanged { path, .. }
            | Self::NodeInvalidated { path }
            | Self::VisibilityChanged { path, .. } => path,
        }
    }

    pub fn kind(&self) -> TreeEventKind {
        match self {
            Self::ChildrenChanged { .. } => TreeEventKind::ChildrenChanged,
            Self::NodeInvalidated { .. } => TreeEventKind::NodeInvalidated,
            Self::VisibilityChanged { .. } => TreeEventKind::VisibilityChanged,
        }
    }
}

/// Filter for subscribing to a subset of tree events.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    /// If set, only events at or below this path are delivered.
    pub prefix: Option<PathAddress>,
    /// If set, only events of these kinds are delivered.
    pub kinds: Option<Vec<TreeEventKind>>,
}

impl EventFilter {
    /// Events at or below `prefix`.
    pub fn under(prefix: PathAddress) -> Self {
        Self {
            prefix: Some(prefix),
            kinds: None,
        }
    }

    pub fn matches(&self, event: &TreeEvent) -> bool {
        if let Some(ref prefix) = self.prefix {
            if !prefix.contains(event.path()) {
                return false;
            }
        }
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }
        true
    }
}

/// A broadcast channel receiver for tree events.
pub type EventStream = broadcast::Receiver<TreeEvent>;

struct Subscriber {
    filter: EventFilter,
    sender: broadcast::Sender<TreeEvent>,
}

/// Fan-out router that delivers events to matching subscribers.
pub(crate) struct EventRouter {
    subscribers: RwLock<Vec<Subscriber>>,
    capacity: usize,
}

impl EventRouter {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn subscribe(&self, filter: EventFilter) -> EventStream {
        let (sender, rx) = broadcast::channel(self.capacity);
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber { filter, sender });
        rx
    }

    /// Deliver `event` to every matching subscriber, pruning closed ones.
    pub(crate) fn route(&self, event: &TreeEvent) {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        subs.retain(|sub| {
            if sub.filter.matches(event) {
                sub.sender.send(event.clone()).is_ok()
            } else {
                sub.sender.receiver_count() > 0
            }
        });
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalidated(path: &[&str]) -> TreeEvent {
        TreeEvent::NodeInvalidated {
            path: PathAddress::new(path.iter().copied()),
        }
    }

    #[test]
    fn prefix_filter() {
        let filter = EventFilter::under(PathAddress::new(["p1"]));
        assert!(filter.matches(&invalidated(&["p1"])));
        assert!(filter.matches(&invalidated(&["p1", "t1"])));
        assert!(!filter.matches(&invalidated(&["p2"])));
        assert!(EventFilter::default().matches(&invalidated(&["p2"])));
    }

    #[test]
    fn kind_filter() {
        let filter = EventFilter {
            kinds: Some(vec![TreeEventKind::VisibilityChanged]),
            ..Default::default()
        };
        assert!(!filter.matches(&invalidated(&["p1"])));
        assert!(filter.matches(&TreeEvent::VisibilityChanged {
            path: PathAddress::root(),
            visible: true
        }));
    }

    #[test]
    fn router_delivers_matching_events_only() {
        let router = EventRouter::new(16);
        let mut p1 = router.subscribe(EventFilter::under(PathAddress::new(["p1"])));
        let mut all = router.subscribe(EventFilter::default());

        router.route(&invalidated(&["p2"]));
        router.route(&invalidated(&["p1", "t1"]));

        assert_eq!(p1.try_recv().unwrap(), invalidated(&["p1", "t1"]));
        assert!(p1.try_recv().is_err());
        assert_eq!(all.try_recv().unwrap(), invalidated(&["p2"]));
        assert_eq!(all.try_recv().unwrap(), invalidated(&["p1", "t1"]));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let router = EventRouter::new(16);
        let rx = router.subscribe(EventFilter::default());
        assert_eq!(router.subscriber_count(), 1);
        drop(rx);
        router.route(&invalidated(&["p1"]));
        assert_eq!(router.subscriber_count(), 0);
    }
}
