//! Merging a freshly fetched listing into a parent's cached children.
//!
//! [`reconcile`] is pure: it reads the current entries and the fresh listing
//! and produces a [`Reconciliation`] plan. Nothing is swapped, invalidated,
//! or published until the plan is committed through
//! [`ObjectCache::commit`](crate::ObjectCache::commit), which is what keeps
//! readers from ever observing a half-applied refresh.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::warn;

use dmodel_types::{PathAddress, RemoteModelObject, SearchKey};

use crate::node::ProxyNode;

/// The outcome of reconciling one listing, ready to be committed.
#[derive(Debug)]
pub struct Reconciliation {
    /// Address of the parent whose children were reconciled.
    pub parent: PathAddress,
    /// Cache generation the plan was built against.
    pub base_generation: u64,
    /// Children in the order the engine reported them.
    pub ordered: Vec<Arc<ProxyNode>>,
    /// Existing nodes paired with the object that replaces their current one.
    pub updates: Vec<(Arc<ProxyNode>, Arc<dyn RemoteModelObject>)>,
    /// Number of nodes created by this plan.
    pub created: usize,
    /// Cached nodes whose keys are absent from the fresh listing, by key.
    pub stale: Vec<Arc<ProxyNode>>,
    /// Keys repeated within the fresh listing; only the first was kept.
    pub duplicates: Vec<SearchKey>,
}

/// Reconcile `fresh` against the cached children of `owner`.
///
/// - The result follows `fresh`'s order, not the cache's.
/// - A key present in `cache` reuses its node; the node is scheduled to
///   receive the fresh object.
/// - A key absent from `cache`, or cached under an already invalidated
///   node, gets a new node holding the fresh object.
/// - Every cached key missing from `fresh` is reported as stale.
pub fn reconcile(
    owner: &Arc<ProxyNode>,
    cache: &HashMap<SearchKey, Arc<ProxyNode>>,
    fresh: Vec<Arc<dyn RemoteModelObject>>,
) -> Reconciliation {
    let mut ordered = Vec::with_capacity(fresh.len());
    let mut updates = Vec::new();
    let mut created = 0;
    let mut duplicates = Vec::new();
    let mut seen: HashSet<SearchKey> = HashSet::with_capacity(fresh.len());

    for object in fresh {
        let key = object.search_key();
        if !seen.insert(key.clone()) {
            warn!(parent = %owner.path(), key = %key, "duplicate key in listing; keeping first");
            duplicates.push(key);
            continue;
        }
        match cache.get(&key).filter(|n| n.is_valid()) {
            Some(existing) => {
                updates.push((Arc::clone(existing), object));
                ordered.push(Arc::clone(existing));
            }
            None => {
                ordered.push(ProxyNode::new_child(owner, object));
                created += 1;
            }
        }
    }

    let mut stale: Vec<Arc<ProxyNode>> = cache
        .iter()
        .filter(|(key, _)| !seen.contains(*key))
        .map(|(_, node)| Arc::clone(node))
        .collect();
    stale.sort_by(|a, b| a.key().cmp(b.key()));

    Reconciliation {
        parent: owner.path().clone(),
        base_generation: 0,
        ordered,
        updates,
        created,
        stale,
        duplicates,
    }
}
