//! Per-parent cache of proxy nodes.
//!
//! [`ObjectCache`] owns the children of one parent node. All mutation goes
//! through [`ObjectCache::commit`], which applies a complete
//! [`Reconciliation`] under a single write lock: object swaps, stale
//! invalidation, entry replacement, and snapshot publication happen together,
//! so a reader holding the read lock sees either the old listing or the new
//! one.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use dmodel_types::{PathAddress, RemoteModelObject, SearchKey};

use crate::error::{CacheError, CacheResult};
use crate::node::ProxyNode;
use crate::reconcile::{reconcile, Reconciliation};

/// An immutable, ordered view of a parent's children at one generation.
#[derive(Clone, Debug)]
pub struct Snapshot {
    generation: u64,
    children: Arc<[Arc<ProxyNode>]>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            generation: 0,
            children: Arc::from(Vec::new()),
        }
    }

    /// Cache generation that produced this snapshot.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn children(&self) -> &[Arc<ProxyNode>] {
        &self.children
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Arc<ProxyNode>> {
        self.children.iter().find(|n| n.key().as_str() == key)
    }

    pub fn keys(&self) -> Vec<SearchKey> {
        self.children.iter().map(|n| n.key().clone()).collect()
    }
}

/// What a successful commit changed.
#[derive(Clone, Debug)]
pub struct CommitOutcome {
    pub snapshot: Snapshot,
    pub created: usize,
    pub updated: usize,
    /// Nodes invalidated by this commit. The caller detaches their subtrees.
    pub stale: Vec<Arc<ProxyNode>>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<SearchKey, Arc<ProxyNode>>,
    snapshot: Option<Snapshot>,
    generation: u64,
}

/// The children of one parent node, keyed by search key.
///
/// The cache is the only owner of its nodes' membership; other components
/// hold lookups, never independent entries.
#[derive(Debug)]
pub struct ObjectCache {
    owner: Arc<ProxyNode>,
    state: RwLock<CacheState>,
}

impl ObjectCache {
    /// Create an empty cache for the children of `owner`.
    pub fn new(owner: Arc<ProxyNode>) -> Self {
        Self {
            owner,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// The parent node whose children this cache holds.
    pub fn owner(&self) -> &Arc<ProxyNode> {
        &self.owner
    }

    pub fn path(&self) -> &PathAddress {
        self.owner.path()
    }

    pub fn get(&self, key: &str) -> CacheResult<Option<Arc<ProxyNode>>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.entries.get(key).cloned())
    }

    pub fn len(&self) -> CacheResult<usize> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.entries.len())
    }

    pub fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn generation(&self) -> CacheResult<u64> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.generation)
    }

    /// The last committed listing, or `None` if nothing was ever committed.
    pub fn snapshot(&self) -> CacheResult<Option<Snapshot>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.snapshot.clone())
    }

    /// Build a reconciliation plan for `fresh` against the current entries.
    pub fn plan(&self, fresh: Vec<Arc<dyn RemoteModelObject>>) -> CacheResult<Reconciliation> {
        let state = self.state.read().map_err(poisoned)?;
        let mut plan = reconcile(&self.owner, &state.entries, fresh);
        plan.base_generation = state.generation;
        Ok(plan)
    }

    /// Apply a plan atomically.
    ///
    /// Fails with [`CacheError::InvalidatedTarget`] if the owner has been
    /// invalidated and with [`CacheError::StaleGeneration`] if another commit
    /// landed after the plan was built. A failed commit changes nothing.
    pub fn commit(&self, plan: Reconciliation) -> CacheResult<CommitOutcome> {
        let mut state = self.state.write().map_err(poisoned)?;

        if !self.owner.is_valid() {
            return Err(CacheError::InvalidatedTarget {
                path: self.owner.path().clone(),
            });
        }
        if plan.base_generation != state.generation {
            return Err(CacheError::StaleGeneration {
                path: self.owner.path().clone(),
                planned: plan.base_generation,
                current: state.generation,
            });
        }

        let updated = plan.updates.len();
        for (node, object) in plan.updates {
            node.replace_object(object);
        }
        for node in &plan.stale {
            node.invalidate();
        }

        state.entries = plan
            .ordered
            .iter()
            .map(|n| (n.key().clone(), Arc::clone(n)))
            .collect();
        state.generation += 1;
        let snapshot = Snapshot {
            generation: state.generation,
            children: Arc::from(plan.ordered),
        };
        state.snapshot = Some(snapshot.clone());

        debug!(
            path = %self.owner.path(),
            generation = state.generation,
            created = plan.created,
            updated,
            stale = plan.stale.len(),
            "reconciliation committed"
        );

        Ok(CommitOutcome {
            snapshot,
            created: plan.created,
            updated,
            stale: plan.stale,
        })
    }

    /// Plan and commit in one step.
    pub fn reconcile(&self, fresh: Vec<Arc<dyn RemoteModelObject>>) -> CacheResult<CommitOutcome> {
        let plan = self.plan(fresh)?;
        self.commit(plan)
    }

    /// Invalidate and remove every entry, returning the removed nodes.
    pub fn clear(&self) -> CacheResult<Vec<Arc<ProxyNode>>> {
        let mut state = self.state.write().map_err(poisoned)?;
        let mut removed: Vec<Arc<ProxyNode>> = state.entries.drain().map(|(_, n)| n).collect();
        removed.sort_by(|a, b| a.key().cmp(b.key()));
        for node in &removed {
            node.invalidate();
        }
        state.snapshot = None;
        state.generation += 1;
        Ok(removed)
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> CacheError {
    CacheError::Poisoned(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{obj, version_of};

    fn cache() -> ObjectCache {
        ObjectCache::new(ProxyNode::new_root(obj("", 0)))
    }

    #[test]
    fn creation_populates_cache() {
        let cache = cache();
        assert!(cache.snapshot().unwrap().is_none());

        let outcome = cache.reconcile(vec![obj("p1", 0), obj("p2", 0)]).unwrap();
        assert_eq!(outcome.created, 2);
        assert_eq!(
            outcome.snapshot.keys(),
            vec![SearchKey::new("p1"), SearchKey::new("p2")]
        );
        assert_eq!(cache.len().unwrap(), 2);
        assert_eq!(cache.generation().unwrap(), 1);
    }

    #[test]
    fn in_place_update_keeps_identity() {
        let cache = cache();
        let first = cache.reconcile(vec![obj("t1", 1)]).unwrap();
        let n1 = Arc::clone(&first.snapshot.children()[0]);

        let second = cache.reconcile(vec![obj("t1", 2)]).unwrap();
        assert!(Arc::ptr_eq(&second.snapshot.children()[0], &n1));
        assert_eq!(version_of(n1.object().as_ref()), 2);
        assert_eq!(second.updated, 1);
    }

    #[test]
    fn removal_invalidates_stale_nodes() {
        let cache = cache();
        let first = cache.reconcile(vec![obj("p1", 0), obj("p2", 0)]).unwrap();
        let n1 = Arc::clone(first.snapshot.get("p1").unwrap());
        let n2 = Arc::clone(first.snapshot.get("p2").unwrap());

        let second = cache.reconcile(vec![obj("p1", 0)]).unwrap();
        assert_eq!(second.snapshot.len(), 1);
        assert!(Arc::ptr_eq(&second.snapshot.children()[0], &n1));
        assert!(!n2.is_valid());
        assert!(matches!(
            n2.check_valid(),
            Err(CacheError::InvalidatedTarget { .. })
        ));
        assert!(cache.get("p2").unwrap().is_none());
    }

    #[test]
    fn reappearing_key_gets_new_node() {
        let cache = cache();
        let first = cache.reconcile(vec![obj("p1", 0)]).unwrap();
        let old = Arc::clone(&first.snapshot.children()[0]);
        cache.reconcile(vec![]).unwrap();
        let third = cache.reconcile(vec![obj("p1", 0)]).unwrap();

        let new = &third.snapshot.children()[0];
        assert!(!Arc::ptr_eq(new, &old));
        assert!(new.is_valid());
        assert!(!old.is_valid());
    }

    #[test]
    fn stale_plan_is_rejected_without_side_effects() {
        let cache = cache();
        cache.reconcile(vec![obj("p1", 0)]).unwrap();
        let n1 = cache.get("p1").unwrap().unwrap();

        let late = cache.plan(vec![]).unwrap();
        cache.reconcile(vec![obj("p1", 1)]).unwrap();

        let err = cache.commit(late).unwrap_err();
        assert!(matches!(
            err,
            CacheError::StaleGeneration { planned: 1, current: 2, .. }
        ));
        assert!(n1.is_valid());
        assert_eq!(cache.snapshot().unwrap().unwrap().len(), 1);
    }

    #[test]
    fn commit_refused_for_invalid_owner() {
        let cache = cache();
        let plan = cache.plan(vec![obj("p1", 0)]).unwrap();
        cache.owner().invalidate();
        assert!(matches!(
            cache.commit(plan),
            Err(CacheError::InvalidatedTarget { .. })
        ));
        assert!(cache.snapshot().unwrap().is_none());
    }

    #[test]
    fn clear_invalidates_everything() {
        let cache = cache();
        cache.reconcile(vec![obj("a", 0), obj("b", 0)]).unwrap();
        let removed = cache.clear().unwrap();
        assert_eq!(removed.len(), 2);
        assert!(removed.iter().all(|n| !n.is_valid()));
        assert!(cache.is_empty().unwrap());
        assert!(cache.snapshot().unwrap().is_none());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use std::collections::HashSet;

        fn listing() -> impl Strategy<Value = Vec<String>> {
            proptest::collection::hash_set("[a-f][0-9]", 0..12)
                .prop_map(|set| set.into_iter().collect::<Vec<_>>())
                .prop_shuffle()
        }

        proptest! {
            #[test]
            fn committed_order_matches_listing(first in listing(), second in listing()) {
                let cache = cache();
                cache.reconcile(first.iter().map(|k| obj(k, 0)).collect()).unwrap();
                let outcome = cache.reconcile(second.iter().map(|k| obj(k, 1)).collect()).unwrap();
                let keys: Vec<String> = outcome
                    .snapshot
                    .keys()
                    .into_iter()
                    .map(SearchKey::into_string)
                    .collect();
                prop_assert_eq!(keys, second);
            }

            #[test]
            fn surviving_keys_keep_identity(first in listing(), second in listing()) {
                let cache = cache();
                let before = cache.reconcile(first.iter().map(|k| obj(k, 0)).collect()).unwrap();
                let after = cache.reconcile(second.iter().map(|k| obj(k, 1)).collect()).unwrap();

                let second_set: HashSet<&String> = second.iter().collect();
                for node in before.snapshot.children() {
                    let key = node.key().as_str().to_string();
                    match after.snapshot.get(&key) {
                        Some(same) => {
                            prop_assert!(Arc::ptr_eq(same, node));
                            prop_assert_eq!(version_of(same.object().as_ref()), 1);
                        }
                        None => {
                            prop_assert!(!second_set.contains(&key));
                            prop_assert!(!node.is_valid());
                        }
                    }
                }
                prop_assert_eq!(after.stale.len(), first.iter().filter(|k| !second_set.contains(k)).count());
            }

            #[test]
            fn same_listing_twice_is_identity_stable(keys in listing()) {
                let cache = cache();
                let a = cache.reconcile(keys.iter().map(|k| obj(k, 0)).collect()).unwrap();
                let b = cache.reconcile(keys.iter().map(|k| obj(k, 0)).collect()).unwrap();
                prop_assert_eq!(a.snapshot.len(), b.snapshot.len());
                for (x, y) in a.snapshot.children().iter().zip(b.snapshot.children()) {
                    prop_assert!(Arc::ptr_eq(x, y));
                }
                prop_assert!(b.stale.is_empty());
                prop_assert_eq!(b.created, 0);
            }
        }
    }
}
