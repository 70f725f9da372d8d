//! The arena that owns every [`ObjectCache`] of one mirrored hierarchy.
//!
//! Each parent path has at most one cache, owned here rather than in a
//! process-wide map, so dropping the tree drops every cache and invalidating
//! a node can detach its whole subtree mechanically.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use dmodel_types::{PathAddress, RemoteModelObject};

use crate::cache::{CommitOutcome, ObjectCache, Snapshot};
use crate::error::{CacheError, CacheResult};
use crate::node::ProxyNode;

/// Result of reconciling one node's children through the tree.
#[derive(Clone, Debug)]
pub struct TreeUpdate {
    pub snapshot: Snapshot,
    pub created: usize,
    pub updated: usize,
    /// Nodes dropped by the listing itself.
    pub stale: Vec<Arc<ProxyNode>>,
    /// Every node invalidated as a consequence, stale nodes first, then
    /// their descendants.
    pub invalidated: Vec<Arc<ProxyNode>>,
}

/// The local mirror of one remote hierarchy.
#[derive(Debug)]
pub struct ObjectTree {
    root: Arc<ProxyNode>,
    containers: RwLock<HashMap<PathAddress, Arc<ObjectCache>>>,
}

impl ObjectTree {
    /// Create a tree whose root holds `root_object`.
    pub fn new(root_object: Arc<dyn RemoteModelObject>) -> Self {
        Self {
            root: ProxyNode::new_root(root_object),
            containers: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Arc<ProxyNode> {
        &self.root
    }

    /// The cache holding `node`'s children, created on first use.
    pub fn container(&self, node: &Arc<ProxyNode>) -> CacheResult<Arc<ObjectCache>> {
        node.check_valid()?;
        if let Some(existing) = self.existing_container(node)? {
            return Ok(existing);
        }
        let mut containers = self.containers.write().map_err(poisoned)?;
        let entry = containers
            .entry(node.path().clone())
            .or_insert_with(|| Arc::new(ObjectCache::new(Arc::clone(node))));
        if !Arc::ptr_eq(entry.owner(), node) {
            // A previous node at this path was invalidated but its cache was
            // not detached yet; the live node takes the slot.
            *entry = Arc::new(ObjectCache::new(Arc::clone(node)));
        }
        Ok(Arc::clone(entry))
    }

    /// The cache holding `node`'s children, if one exists for this node.
    pub fn existing_container(&self, node: &Arc<ProxyNode>) -> CacheResult<Option<Arc<ObjectCache>>> {
        let containers = self.containers.read().map_err(poisoned)?;
        Ok(containers
            .get(node.path())
            .filter(|c| Arc::ptr_eq(c.owner(), node))
            .cloned())
    }

    /// The last committed listing of `node`'s children, without any I/O.
    pub fn snapshot(&self, node: &Arc<ProxyNode>) -> CacheResult<Option<Snapshot>> {
        match self.existing_container(node)? {
            Some(cache) => cache.snapshot(),
            None => Ok(None),
        }
    }

    /// Look up a node by address among already-loaded listings.
    ///
    /// Returns `Ok(None)` if some ancestor has not been listed yet or the
    /// listing does not contain the next segment.
    pub fn node(&self, path: &PathAddress) -> CacheResult<Option<Arc<ProxyNode>>> {
        let mut current = Arc::clone(&self.root);
        for segment in path.segments() {
            let Some(cache) = self.existing_container(&current)? else {
                return Ok(None);
            };
            match cache.get(segment)? {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Reconcile `fresh` into `node`'s children and detach what was dropped.
    pub fn reconcile_children(
        &self,
        node: &Arc<ProxyNode>,
        fresh: Vec<Arc<dyn RemoteModelObject>>,
    ) -> CacheResult<TreeUpdate> {
        let cache = self.container(node)?;
        let CommitOutcome {
            snapshot,
            created,
            updated,
            stale,
        } = match cache.reconcile(fresh) {
            Ok(outcome) => outcome,
            Err(e @ CacheError::InvalidatedTarget { .. }) => {
                // The node died after its cache was attached.
                self.discard_container(node)?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let mut invalidated = stale.clone();
        for dropped in &stale {
            invalidated.extend(self.detach_subtree(dropped)?);
        }

        Ok(TreeUpdate {
            snapshot,
            created,
            updated,
            stale,
            invalidated,
        })
    }

    fn discard_container(&self, node: &Arc<ProxyNode>) -> CacheResult<()> {
        let mut containers = self.containers.write().map_err(poisoned)?;
        if containers
            .get(node.path())
            .is_some_and(|c| Arc::ptr_eq(c.owner(), node))
        {
            containers.remove(node.path());
            debug!(path = %node.path(), "dead container discarded");
        }
        Ok(())
    }

    /// Remove every cache below `node` and invalidate the nodes they held.
    ///
    /// `node` itself is expected to be invalidated already. Returns the
    /// descendants that were invalidated, shallowest first.
    pub fn detach_subtree(&self, node: &Arc<ProxyNode>) -> CacheResult<Vec<Arc<ProxyNode>>> {
        let detached: Vec<Arc<ObjectCache>> = {
            let mut containers = self.containers.write().map_err(poisoned)?;
            let paths: Vec<PathAddress> = containers
                .iter()
                .filter(|(path, cache)| {
                    node.path().contains(path) && cache.owner().descends_from(node)
                })
                .map(|(path, _)| path.clone())
                .collect();
            paths
                .iter()
                .filter_map(|p| containers.remove(p))
                .collect()
        };

        let mut invalidated = Vec::new();
        for cache in &detached {
            invalidated.extend(cache.clear()?);
        }
        invalidated.sort_by(|a, b| {
            a.path()
                .len()
                .cmp(&b.path().len())
                .then_with(|| a.path().cmp(b.path()))
        });

        if !detached.is_empty() {
            debug!(
                path = %node.path(),
                containers = detached.len(),
                nodes = invalidated.len(),
                "subtree detached"
            );
        }
        Ok(invalidated)
    }

    /// Nodes at or below `path` whose children have been listed, shallowest
    /// first.
    pub fn loaded_under(&self, path: &PathAddress) -> CacheResult<Vec<Arc<ProxyNode>>> {
        let containers = self.containers.read().map_err(poisoned)?;
        let mut owners: Vec<Arc<ProxyNode>> = containers
            .iter()
            .filter(|(p, _)| path.contains(p))
            .map(|(_, cache)| Arc::clone(cache.owner()))
            .collect();
        owners.sort_by(|a, b| {
            a.path()
                .len()
                .cmp(&b.path().len())
                .then_with(|| a.path().cmp(b.path()))
        });
        Ok(owners)
    }

    /// Number of caches currently attached.
    pub fn container_count(&self) -> CacheResult<usize> {
        let containers = self.containers.read().map_err(poisoned)?;
        Ok(containers.len())
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> CacheError {
    CacheError::Poisoned(e.to_string())
}
