//! On-demand expansion of the mirrored tree.
//!
//! [`LazyTreeLoader`] decides when a round trip is needed, runs at most one
//! `ListElements` per node at a time, and publishes committed listings.
//!
//! Each load runs in its own task and hands its result to every waiter over
//! a oneshot channel. Callers that arrive while a node is loading join the
//! same load. A caller that stops waiting only drops its receiver; the load
//! still commits for everyone else.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use dmodel_cache::{LoadState, ObjectTree, ProxyNode, Snapshot};
use dmodel_client::ElementSource;
use dmodel_types::{PathAddress, RemoteModelObject, SearchKey};

use crate::config::{FailurePolicy, LoaderConfig};
use crate::error::{LoaderError, LoaderResult};
use crate::events::{EventFilter, EventRouter, EventStream, TreeEvent};

type Waiter = oneshot::Sender<LoaderResult<Snapshot>>;

struct InFlight {
    node: Arc<ProxyNode>,
    waiters: Vec<Waiter>,
}

/// Loads keyed by node identity. The entry holds the node, so its address
/// cannot be reused while the load is pending.
type InFlightMap = HashMap<usize, InFlight>;

fn node_id(node: &Arc<ProxyNode>) -> usize {
    Arc::as_ptr(node) as usize
}

struct Inner {
    tree: ObjectTree,
    source: Arc<dyn ElementSource>,
    config: LoaderConfig,
    in_flight: Mutex<InFlightMap>,
    router: EventRouter,
}

/// Lazily mirrors a remote hierarchy, one node's children at a time.
///
/// Cheap to clone; clones share the tree and the in-flight loads.
#[derive(Clone)]
pub struct LazyTreeLoader {
    inner: Arc<Inner>,
}

impl LazyTreeLoader {
    pub fn new(
        source: Arc<dyn ElementSource>,
        root_object: Arc<dyn RemoteModelObject>,
        config: LoaderConfig,
    ) -> Self {
        let router = EventRouter::new(config.event_capacity);
        Self {
            inner: Arc::new(Inner {
                tree: ObjectTree::new(root_object),
                source,
                config,
                in_flight: Mutex::new(HashMap::new()),
                router,
            }),
        }
    }

    pub fn root(&self) -> &Arc<ProxyNode> {
        self.inner.tree.root()
    }

    pub fn tree(&self) -> &ObjectTree {
        &self.inner.tree
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    /// The children of `node`, fetching them if needed.
    ///
    /// An immutable node that is already loaded is answered from the cache.
    /// A node that is loading joins the pending load.
    pub async fn expand(&self, node: &Arc<ProxyNode>) -> LoaderResult<Snapshot> {
        node.check_valid()?;
        if node.is_immutable() && node.load_state() == LoadState::Loaded {
            if let Some(snapshot) = self.inner.tree.snapshot(node)? {
                debug!(path = %node.path(), "immutable node served from cache");
                return Ok(snapshot);
            }
        }
        self.load(node).await
    }

    /// Like [`expand`](Self::expand), but always goes to the engine unless a
    /// load is already pending.
    pub async fn refresh(&self, node: &Arc<ProxyNode>) -> LoaderResult<Snapshot> {
        node.check_valid()?;
        self.load(node).await
    }

    /// The last committed listing of `node`'s children, without any I/O.
    pub fn get_cached(&self, node: &Arc<ProxyNode>) -> LoaderResult<Option<Snapshot>> {
        Ok(self.inner.tree.snapshot(node)?)
    }

    /// Look up a node among already-loaded listings, without any I/O.
    pub fn lookup(&self, path: &PathAddress) -> LoaderResult<Option<Arc<ProxyNode>>> {
        Ok(self.inner.tree.node(path)?)
    }

    /// Find the node at `path`, expanding ancestors as needed.
    ///
    /// A cached listing that lacks the next segment is refreshed once before
    /// the lookup fails with [`LoaderError::NotFound`].
    pub async fn resolve(&self, path: &PathAddress) -> LoaderResult<Arc<ProxyNode>> {
        let mut current = Arc::clone(self.root());
        for segment in path.segments() {
            let cached = self
                .get_cached(&current)?
                .and_then(|s| s.get(segment).cloned())
                .filter(|n| n.is_valid());
            let next = match cached {
                Some(node) => node,
                None => self
                    .expand(&current)
                    .await?
                    .get(segment)
                    .cloned()
                    .ok_or_else(|| LoaderError::NotFound {
                        path: current.path().child(&SearchKey::new(segment.as_str())),
                    })?,
            };
            current = next;
        }
        Ok(current)
    }

    /// Expand `node` and its descendants breadth first, down to
    /// `load_all_max_depth` levels. Returns the number of nodes expanded.
    ///
    /// Descendants invalidated while the walk is in progress are skipped.
    pub async fn load_all(&self, node: &Arc<ProxyNode>) -> LoaderResult<usize> {
        node.check_valid()?;
        let max_depth = self.inner.config.load_all_max_depth;
        let mut visited = 0;
        let mut queue = VecDeque::from([(Arc::clone(node), 0usize)]);
        while let Some((next, depth)) = queue.pop_front() {
            if depth >= max_depth || !next.is_valid() {
                continue;
            }
            let snapshot = match self.expand(&next).await {
                Ok(snapshot) => snapshot,
                Err(LoaderError::InvalidatedTarget { .. }) => continue,
                Err(e) => return Err(e),
            };
            visited += 1;
            queue.extend(
                snapshot
                    .children()
                    .iter()
                    .map(|child| (Arc::clone(child), depth + 1)),
            );
        }
        debug!(path = %node.path(), visited, "subtree loaded");
        Ok(visited)
    }

    /// Ask for `node` to be kept fresh.
    pub fn mark_visible(&self, node: &Arc<ProxyNode>) -> LoaderResult<()> {
        node.check_valid()?;
        let was_visible = node.set_visible(true);
        if !was_visible && node.is_visible() {
            debug!(path = %node.path(), "node visible");
            self.inner.router.route(&TreeEvent::VisibilityChanged {
                path: node.path().clone(),
                visible: true,
            });
        }
        Ok(())
    }

    /// Stop keeping `node` fresh. Cached children are kept.
    pub fn mark_invisible(&self, node: &Arc<ProxyNode>) {
        if node.set_visible(false) {
            debug!(path = %node.path(), "node invisible");
            self.inner.router.route(&TreeEvent::VisibilityChanged {
                path: node.path().clone(),
                visible: false,
            });
        }
    }

    /// React to an engine report that something under `path` changed.
    ///
    /// Refreshes every visible, loaded node at or below `path`, shallowest
    /// first. Failures are logged and skipped. Returns the number of nodes
    /// refreshed.
    pub async fn notify_changed(&self, path: &PathAddress) -> LoaderResult<usize> {
        if !self.inner.config.refresh_visible_on_change {
            return Ok(0);
        }
        let mut refreshed = 0;
        for node in self.inner.tree.loaded_under(path)? {
            if !node.is_visible() || !node.is_valid() {
                continue;
            }
            match self.refresh(&node).await {
                Ok(_) => refreshed += 1,
                Err(LoaderError::InvalidatedTarget { .. }) => {}
                Err(e) => warn!(path = %node.path(), error = %e, "refresh after change failed"),
            }
        }
        debug!(path = %path, refreshed, "change handled");
        Ok(refreshed)
    }

    /// Feed engine change notifications into [`notify_changed`](Self::notify_changed)
    /// until the channel closes.
    pub fn watch_changes(&self, mut changes: broadcast::Receiver<PathAddress>) -> JoinHandle<()> {
        let loader = self.clone();
        tokio::spawn(async move {
            loop {
                let path = match changes.recv().await {
                    Ok(path) => path,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "change notifications lagged; refreshing everything visible");
                        PathAddress::root()
                    }
                    Err(RecvError::Closed) => break,
                };
                if let Err(e) = loader.notify_changed(&path).await {
                    warn!(path = %path, error = %e, "change handling failed");
                }
            }
            debug!("change watcher stopped");
        })
    }

    /// Receive tree events matching `filter`.
    pub fn subscribe(&self, filter: EventFilter) -> EventStream {
        self.inner.router.subscribe(filter)
    }

    /// Number of loads currently pending.
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight().len()
    }

    async fn load(&self, node: &Arc<ProxyNode>) -> LoaderResult<Snapshot> {
        let rx = Inner::join_or_start(&self.inner, node);
        rx.await.unwrap_or_else(|_| {
            Err(LoaderError::Aborted {
                path: node.path().clone(),
            })
        })
    }
}

impl std::fmt::Debug for LazyTreeLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyTreeLoader")
            .field("config", &self.inner.config)
            .field("in_flight", &self.in_flight_count())
            .field("subscribers", &self.inner.router.subscriber_count())
            .finish()
    }
}

impl Inner {
    fn in_flight(&self) -> MutexGuard<'_, InFlightMap> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join the pending load of `node`, or start one.
    fn join_or_start(this: &Arc<Self>, node: &Arc<ProxyNode>) -> oneshot::Receiver<LoaderResult<Snapshot>> {
        let (tx, rx) = oneshot::channel();
        let id = node_id(node);
        let mut in_flight = this.in_flight();
        match in_flight.entry(id) {
            Entry::Occupied(mut pending) => {
                pending.get_mut().waiters.push(tx);
                debug!(
                    path = %node.path(),
                    waiters = pending.get().waiters.len(),
                    "joined pending load"
                );
            }
            Entry::Vacant(slot) => {
                slot.insert(InFlight {
                    node: Arc::clone(node),
                    waiters: vec![tx],
                });
                node.set_load_state(LoadState::Loading);
                tokio::spawn(Arc::clone(this).run_load(id, Arc::clone(node)));
            }
        }
        rx
    }

    async fn run_load(self: Arc<Self>, id: usize, node: Arc<ProxyNode>) {
        let mut guard = PendingLoad::new(self.as_ref(), id);
        let result = self.fetch(&node).await;
        for waiter in guard.finish() {
            let _ = waiter.send(result.clone());
        }
    }

    async fn fetch(&self, node: &Arc<ProxyNode>) -> LoaderResult<Snapshot> {
        debug!(path = %node.path(), "listing children");
        let committed = match self.source.list_elements(node).await {
            Ok(fresh) => self.commit(node, fresh),
            Err(e) => Err(e.into()),
        };
        committed.or_else(|e| self.fail(node, e))
    }

    fn commit(&self, node: &Arc<ProxyNode>, fresh: Vec<Arc<dyn RemoteModelObject>>) -> LoaderResult<Snapshot> {
        let update = self.tree.reconcile_children(node, fresh)?;
        node.set_load_state(LoadState::Loaded);
        debug!(
            path = %node.path(),
            count = update.snapshot.len(),
            created = update.created,
            removed = update.stale.len(),
            "children loaded"
        );

        self.router.route(&TreeEvent::ChildrenChanged {
            path: node.path().clone(),
            generation: update.snapshot.generation(),
            created: update.created,
            updated: update.updated,
            removed: update.stale.iter().map(|n| n.key().clone()).collect(),
        });
        for dropped in &update.invalidated {
            debug!(path = %dropped.path(), "node invalidated");
            self.router.route(&TreeEvent::NodeInvalidated {
                path: dropped.path().clone(),
            });
        }
        Ok(update.snapshot)
    }

    /// Apply the failure policy. The cached listing is never touched.
    fn fail(&self, node: &Arc<ProxyNode>, err: LoaderError) -> LoaderResult<Snapshot> {
        node.set_load_state(LoadState::Unloaded);
        if matches!(err, LoaderError::InvalidatedTarget { .. }) {
            debug!(path = %node.path(), "load target invalidated");
            return Err(err);
        }
        match self.config.failure_policy {
            FailurePolicy::Surface => {
                warn!(path = %node.path(), error = %err, "load failed");
                Err(err)
            }
            FailurePolicy::DegradeToEmpty => {
                warn!(path = %node.path(), error = %err, "load failed; reporting empty listing");
                Ok(Snapshot::empty())
            }
        }
    }
}

/// Removes a load's in-flight entry when the load task ends, even by
/// unwinding. Waiters still registered at that point see `Aborted`.
///
/// Once [`finish`](Self::finish) has taken the entry, the slot may already
/// belong to a newer load of the same node, so dropping does nothing.
struct PendingLoad<'a> {
    inner: &'a Inner,
    id: usize,
    finished: bool,
}

impl<'a> PendingLoad<'a> {
    fn new(inner: &'a Inner, id: usize) -> Self {
        Self {
            inner,
            id,
            finished: false,
        }
    }

    fn finish(&mut self) -> Vec<Waiter> {
        self.finished = true;
        let pending = self.inner.in_flight().remove(&self.id);
        pending.map(|p| p.waiters).unwrap_or_default()
    }
}

impl Drop for PendingLoad<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let abandoned = self.inner.in_flight().remove(&self.id);
        if let Some(pending) = abandoned {
            pending.node.set_load_state(LoadState::Unloaded);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use dmodel_client::{ClientError, ClientResult};
    use dmodel_protocol::ObjectDescriptor;

    use crate::events::TreeEventKind;

    /// Serves scripted listings. Holding `gate` stalls every listing after it
    /// has been counted.
    #[derive(Default)]
    struct ScriptedSource {
        listings: StdMutex<HashMap<PathAddress, ClientResult<Vec<ObjectDescriptor>>>>,
        calls: StdMutex<Vec<PathAddress>>,
        gate: tokio::sync::Mutex<()>,
    }

    impl ScriptedSource {
        fn set(&self, path: &[&str], keys: &[&str]) {
            let listing = keys.iter().map(|k| ObjectDescriptor::new(*k, "Node")).collect();
            self.set_descriptors(path, listing);
        }

        fn set_descriptors(&self, path: &[&str], listing: Vec<ObjectDescriptor>) {
            self.listings
                .lock()
                .unwrap()
                .insert(PathAddress::new(path.iter().copied()), Ok(listing));
        }

        fn fail(&self, path: &[&str], err: ClientError) {
            self.listings
                .lock()
                .unwrap()
                .insert(PathAddress::new(path.iter().copied()), Err(err));
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn calls_for(&self, path: &[&str]) -> usize {
            let path = PathAddress::new(path.iter().copied());
            self.calls.lock().unwrap().iter().filter(|p| **p == path).count()
        }
    }

    #[async_trait]
    impl ElementSource for ScriptedSource {
        async fn list_elements(&self, node: &Arc<ProxyNode>) -> ClientResult<Vec<Arc<dyn RemoteModelObject>>> {
            self.calls.lock().unwrap().push(node.path().clone());
            let _open = self.gate.lock().await;
            let listing = self
                .listings
                .lock()
                .unwrap()
                .get(node.path())
                .cloned()
                .unwrap_or_else(|| Ok(Vec::new()));
            listing.map(|ds| {
                ds.into_iter()
                    .map(|d| Arc::new(d) as Arc<dyn RemoteModelObject>)
                    .collect()
            })
        }
    }

    fn loader_with(config: LoaderConfig) -> (Arc<ScriptedSource>, LazyTreeLoader) {
        let source = Arc::new(ScriptedSource::default());
        let loader = LazyTreeLoader::new(
            Arc::clone(&source) as Arc<dyn ElementSource>,
            Arc::new(ObjectDescriptor::root()),
            config,
        );
        (source, loader)
    }

    fn loader() -> (Arc<ScriptedSource>, LazyTreeLoader) {
        loader_with(LoaderConfig::default())
    }

    fn keys(snapshot: &Snapshot) -> Vec<String> {
        snapshot.keys().into_iter().map(SearchKey::into_string).collect()
    }

    async fn settle(loader: &LazyTreeLoader) {
        while loader.in_flight_count() > 0 {
            tokio::task::yield_now().await;
        }
    }

    async fn wait_for_calls(source: &ScriptedSource, n: usize) {
        while source.calls() < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn debug_reports_live_subscribers() {
        let (_source, loader) = loader();
        let events = loader.subscribe(EventFilter::under(PathAddress::root()));
        assert!(format!("{loader:?}").contains("subscribers: 1"));
        drop(events);
        // Closed subscribers are pruned on the next routed event.
        loader.mark_visible(loader.root()).unwrap();
        assert!(format!("{loader:?}").contains("subscribers: 0"));
    }

    #[tokio::test]
    async fn finished_load_leaves_the_next_load_in_place() {
        let (_source, loader) = loader();
        let root = Arc::clone(loader.root());
        let id = node_id(&root);

        let (first_tx, _first_rx) = oneshot::channel();
        loader.inner.in_flight().insert(
            id,
            InFlight {
                node: Arc::clone(&root),
                waiters: vec![first_tx],
            },
        );
        root.set_load_state(LoadState::Loading);
        let mut guard = PendingLoad::new(loader.inner.as_ref(), id);
        assert_eq!(guard.finish().len(), 1);

        // A second load of the same node registers before the guard is gone.
        let (next_tx, mut next_rx) = oneshot::channel();
        loader.inner.in_flight().insert(
            id,
            InFlight {
                node: Arc::clone(&root),
                waiters: vec![next_tx],
            },
        );
        drop(guard);

        assert_eq!(loader.in_flight_count(), 1);
        assert_eq!(root.load_state(), LoadState::Loading);
        assert!(matches!(
            next_rx.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn abandoned_guard_resets_the_node() {
        let (_source, loader) = loader();
        let root = Arc::clone(loader.root());
        let id = node_id(&root);
        let (tx, mut rx) = oneshot::channel();
        loader.inner.in_flight().insert(
            id,
            InFlight {
                node: Arc::clone(&root),
                waiters: vec![tx],
            },
        );
        root.set_load_state(LoadState::Loading);

        drop(PendingLoad::new(loader.inner.as_ref(), id));

        assert_eq!(loader.in_flight_count(), 0);
        assert_eq!(root.load_state(), LoadState::Unloaded);
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn expand_lists_children_in_engine_order() {
        let (source, loader) = loader();
        source.set(&[], &["p2", "p1", "p3"]);
        let snapshot = loader.expand(loader.root()).await.unwrap();
        assert_eq!(keys(&snapshot), vec!["p2", "p1", "p3"]);
        assert_eq!(loader.root().load_state(), LoadState::Loaded);
        assert_eq!(keys(&loader.get_cached(loader.root()).unwrap().unwrap()), keys(&snapshot));
    }

    #[tokio::test]
    async fn refresh_keeps_identity_and_swaps_content() {
        let (source, loader) = loader();
        source.set_descriptors(&[], vec![ObjectDescriptor::new("t1", "Thread").with_display("old")]);
        let first = loader.expand(loader.root()).await.unwrap();
        let t1 = Arc::clone(first.get("t1").unwrap());

        source.set_descriptors(&[], vec![ObjectDescriptor::new("t1", "Thread").with_display("new")]);
        let second = loader.refresh(loader.root()).await.unwrap();
        assert!(Arc::ptr_eq(second.get("t1").unwrap(), &t1));
        assert_eq!(t1.display_name(), "new");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn concurrent_expands_share_one_request() {
        let (source, loader) = loader();
        source.set(&[], &["p1", "p2"]);

        let gate = source.gate.lock().await;
        let a = tokio::spawn({
            let loader = loader.clone();
            async move { loader.expand(loader.root()).await }
        });
        wait_for_calls(&source, 1).await;
        let b = tokio::spawn({
            let loader = loader.clone();
            async move { loader.expand(loader.root()).await }
        });
        while loader.inner.in_flight().values().map(|f| f.waiters.len()).sum::<usize>() < 2 {
            tokio::task::yield_now().await;
        }
        assert_eq!(loader.root().load_state(), LoadState::Loading);
        drop(gate);

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert_eq!(source.calls(), 1);
        assert!(Arc::ptr_eq(&a.children()[0], &b.children()[0]));
    }

    #[tokio::test]
    async fn channel_failure_preserves_cached_snapshot() {
        let (source, loader) = loader();
        source.set(&[], &["p1", "p2"]);
        let before = loader.expand(loader.root()).await.unwrap();

        source.fail(&[], ClientError::ChannelClosed);
        let err = loader.refresh(loader.root()).await.unwrap_err();
        assert_eq!(err, LoaderError::Client(ClientError::ChannelClosed));
        assert!(err.is_fatal());

        let cached = loader.get_cached(loader.root()).unwrap().unwrap();
        assert_eq!(keys(&cached), vec!["p1", "p2"]);
        assert_eq!(cached.generation(), before.generation());
        assert!(cached.children().iter().all(|n| n.is_valid()));
        assert_eq!(loader.root().load_state(), LoadState::Unloaded);
    }

    #[tokio::test]
    async fn failure_reaches_every_joined_caller() {
        let (source, loader) = loader();
        source.fail(&[], ClientError::DecodeError("bad reply".into()));

        let gate = source.gate.lock().await;
        let callers: Vec<_> = (0..3)
            .map(|_| {
                let loader = loader.clone();
                tokio::spawn(async move { loader.expand(loader.root()).await })
            })
            .collect();
        wait_for_calls(&source, 1).await;
        while loader.inner.in_flight().values().map(|f| f.waiters.len()).sum::<usize>() < 3 {
            tokio::task::yield_now().await;
        }
        drop(gate);

        for caller in callers {
            assert!(matches!(
                caller.await.unwrap(),
                Err(LoaderError::Client(ClientError::DecodeError(_)))
            ));
        }
        assert_eq!(source.calls(), 1);
        assert!(loader.get_cached(loader.root()).unwrap().is_none());
    }

    #[tokio::test]
    async fn degrade_to_empty_reports_empty_listing_and_keeps_cache() {
        let (source, loader) = loader_with(LoaderConfig {
            failure_policy: FailurePolicy::DegradeToEmpty,
            ..Default::default()
        });
        source.set(&[], &["p1"]);
        loader.expand(loader.root()).await.unwrap();

        source.fail(&[], ClientError::EngineError { code: 500, message: "busy".into() });
        let degraded = loader.refresh(loader.root()).await.unwrap();
        assert!(degraded.is_empty());
        assert_eq!(keys(&loader.get_cached(loader.root()).unwrap().unwrap()), vec!["p1"]);
    }

    #[tokio::test]
    async fn immutable_loaded_node_is_served_from_cache() {
        let (source, loader) = loader();
        source.set_descriptors(&[], vec![ObjectDescriptor::new("regs", "RegisterBank").immutable()]);
        source.set(&["regs"], &["rax", "rbx"]);
        let regs = loader.resolve(&PathAddress::new(["regs"])).await.unwrap();

        loader.expand(&regs).await.unwrap();
        let again = loader.expand(&regs).await.unwrap();
        assert_eq!(keys(&again), vec!["rax", "rbx"]);
        assert_eq!(source.calls_for(&["regs"]), 1);

        loader.refresh(&regs).await.unwrap();
        assert_eq!(source.calls_for(&["regs"]), 2);
    }

    #[tokio::test]
    async fn cancelled_caller_does_not_cancel_the_load() {
        let (source, loader) = loader();
        source.set(&[], &["p1"]);

        let gate = source.gate.lock().await;
        let caller = tokio::spawn({
            let loader = loader.clone();
            async move { loader.expand(loader.root()).await }
        });
        wait_for_calls(&source, 1).await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());
        drop(gate);

        settle(&loader).await;
        let cached = loader.get_cached(loader.root()).unwrap().unwrap();
        assert_eq!(keys(&cached), vec!["p1"]);
        assert_eq!(loader.root().load_state(), LoadState::Loaded);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn removed_nodes_are_invalidated_with_their_subtree() {
        let (source, loader) = loader();
        source.set(&[], &["p1", "p2"]);
        source.set(&["p1"], &["t1"]);
        let t1 = loader.resolve(&PathAddress::new(["p1", "t1"])).await.unwrap();
        let p1 = loader.lookup(&PathAddress::new(["p1"])).unwrap().unwrap();
        let mut events = loader.subscribe(EventFilter {
            kinds: Some(vec![TreeEventKind::NodeInvalidated]),
            ..Default::default()
        });

        source.set(&[], &["p2"]);
        loader.refresh(loader.root()).await.unwrap();

        assert!(!p1.is_valid());
        assert!(!t1.is_valid());
        assert_eq!(p1.load_state(), LoadState::Invalidated);
        assert_eq!(
            loader.expand(&p1).await.unwrap_err(),
            LoaderError::InvalidatedTarget { path: PathAddress::new(["p1"]) }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            TreeEvent::NodeInvalidated { path: PathAddress::new(["p1"]) }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            TreeEvent::NodeInvalidated { path: PathAddress::new(["p1", "t1"]) }
        );

        // The key comes back as a new node.
        source.set(&[], &["p1", "p2"]);
        let snapshot = loader.refresh(loader.root()).await.unwrap();
        let p1_again = snapshot.get("p1").unwrap();
        assert!(!Arc::ptr_eq(p1_again, &p1));
        assert!(p1_again.is_valid());
    }

    #[tokio::test]
    async fn children_changed_event_reports_removed_keys() {
        let (source, loader) = loader();
        let mut events = loader.subscribe(EventFilter {
            kinds: Some(vec![TreeEventKind::ChildrenChanged]),
            ..Default::default()
        });
        source.set(&[], &["a", "b"]);
        loader.expand(loader.root()).await.unwrap();
        source.set(&[], &["b", "c"]);
        loader.refresh(loader.root()).await.unwrap();

        assert!(matches!(
            events.try_recv().unwrap(),
            TreeEvent::ChildrenChanged { created: 2, .. }
        ));
        match events.try_recv().unwrap() {
            TreeEvent::ChildrenChanged { created, updated, removed, .. } => {
                assert_eq!(created, 1);
                assert_eq!(updated, 1);
                assert_eq!(removed, vec![SearchKey::new("a")]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn resolve_reports_missing_segment() {
        let (source, loader) = loader();
        source.set(&[], &["p1"]);
        let err = loader.resolve(&PathAddress::new(["p1", "t9"])).await.unwrap_err();
        assert_eq!(err, LoaderError::NotFound { path: PathAddress::new(["p1", "t9"]) });
    }

    #[tokio::test]
    async fn resolve_uses_cached_listings() {
        let (source, loader) = loader();
        source.set(&[], &["p1"]);
        source.set(&["p1"], &["t1"]);
        loader.resolve(&PathAddress::new(["p1", "t1"])).await.unwrap();
        loader.resolve(&PathAddress::new(["p1", "t1"])).await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn load_all_is_bounded_by_depth() {
        let (source, loader) = loader_with(LoaderConfig {
            load_all_max_depth: 2,
            ..Default::default()
        });
        source.set(&[], &["p1", "p2"]);
        source.set(&["p1"], &["t1"]);
        source.set(&["p1", "t1"], &["f0"]);

        let visited = loader.load_all(loader.root()).await.unwrap();
        assert_eq!(visited, 3);
        assert_eq!(source.calls_for(&["p1", "t1"]), 0);
        assert!(loader.lookup(&PathAddress::new(["p1", "t1"])).unwrap().is_some());
    }

    #[tokio::test]
    async fn visibility_events_fire_on_change_only() {
        let (source, loader) = loader();
        source.set(&[], &["p1"]);
        let p1 = loader.resolve(&PathAddress::new(["p1"])).await.unwrap();
        let mut events = loader.subscribe(EventFilter::under(PathAddress::new(["p1"])));

        loader.mark_visible(&p1).unwrap();
        loader.mark_visible(&p1).unwrap();
        loader.mark_invisible(&p1);

        assert_eq!(
            events.try_recv().unwrap(),
            TreeEvent::VisibilityChanged { path: PathAddress::new(["p1"]), visible: true }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            TreeEvent::VisibilityChanged { path: PathAddress::new(["p1"]), visible: false }
        );
        assert!(events.try_recv().is_err());
        // Visibility never evicts.
        assert!(loader.get_cached(loader.root()).unwrap().is_some());
    }

    #[tokio::test]
    async fn notify_changed_refreshes_visible_nodes_only() {
        let (source, loader) = loader();
        source.set(&[], &["p1", "p2"]);
        source.set(&["p1"], &["t1"]);
        source.set(&["p2"], &["t2"]);
        loader.load_all(loader.root()).await.unwrap();
        let p1 = loader.lookup(&PathAddress::new(["p1"])).unwrap().unwrap();
        loader.mark_visible(&p1).unwrap();

        source.set(&["p1"], &["t1", "t3"]);
        let refreshed = loader.notify_changed(&PathAddress::root()).await.unwrap();
        assert_eq!(refreshed, 1);
        assert_eq!(source.calls_for(&["p1"]), 2);
        assert_eq!(source.calls_for(&["p2"]), 1);
        assert_eq!(keys(&loader.get_cached(&p1).unwrap().unwrap()), vec!["t1", "t3"]);
    }

    #[tokio::test]
    async fn notify_changed_can_be_disabled() {
        let (source, loader) = loader_with(LoaderConfig {
            refresh_visible_on_change: false,
            ..Default::default()
        });
        loader.expand(loader.root()).await.unwrap();
        loader.mark_visible(loader.root()).unwrap();
        assert_eq!(loader.notify_changed(&PathAddress::root()).await.unwrap(), 0);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn watcher_refreshes_on_pushed_changes() {
        let (source, loader) = loader();
        source.set(&[], &["p1"]);
        loader.expand(loader.root()).await.unwrap();
        loader.mark_visible(loader.root()).unwrap();
        let mut events = loader.subscribe(EventFilter {
            kinds: Some(vec![TreeEventKind::ChildrenChanged]),
            ..Default::default()
        });

        let (tx, rx) = broadcast::channel(8);
        let watcher = loader.watch_changes(rx);
        source.set(&[], &["p1", "p2"]);
        tx.send(PathAddress::root()).unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.path(), &PathAddress::root());
        drop(tx);
        watcher.await.unwrap();
        assert_eq!(keys(&loader.get_cached(loader.root()).unwrap().unwrap()), vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn end_to_end_over_local_engine() {
        use dmodel_client::{connect_local, ClientConfig, InMemoryProvider};

        let provider = Arc::new(InMemoryProvider::new());
        provider
            .insert(&PathAddress::root(), ObjectDescriptor::new("p1", "Process"))
            .unwrap();
        provider
            .insert(&PathAddress::new(["p1"]), ObjectDescriptor::new("t1", "Thread"))
            .unwrap();
        let (client, _engine) = connect_local(provider.clone(), &ClientConfig::default());
        let loader = LazyTreeLoader::new(
            Arc::new(client),
            Arc::new(ObjectDescriptor::root()),
            LoaderConfig::default(),
        );

        let t1 = loader.resolve(&PathAddress::new(["p1", "t1"])).await.unwrap();
        provider.remove(&PathAddress::new(["p1", "t1"])).unwrap();
        let p1 = loader.lookup(&PathAddress::new(["p1"])).unwrap().unwrap();
        assert!(loader.refresh(&p1).await.unwrap().is_empty());
        assert!(!t1.is_valid());
    }
}
