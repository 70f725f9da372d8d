//! Identity-stable local representatives of remote objects.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use dmodel_types::{CapabilitySet, PathAddress, RemoteModelObject, SearchKey};

use crate::error::{CacheError, CacheResult};

/// Load state of a node's child listing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadState {
    /// Children have never been fetched, or the last fetch failed.
    Unloaded,
    /// A `ListElements` round trip is in flight.
    Loading,
    /// A listing has been committed.
    Loaded,
    /// The node was dropped by its parent's reconciliation. Terminal.
    Invalidated,
}

/// Local, identity-stable representative of one remote entity.
///
/// A `ProxyNode` is created the first time its key appears in its parent's
/// listing and lives for as long as the key keeps appearing. On every
/// refresh the held [`RemoteModelObject`] is swapped in place, so holders of
/// the node observe fresh content without re-subscribing. Once a listing
/// omits the key, the node is invalidated for good; if the key comes back
/// it gets a new `ProxyNode`.
///
/// Readers should dereference [`object`](Self::object) each time they need
/// content rather than keeping the returned handle across a suspension
/// point.
pub struct ProxyNode {
    path: PathAddress,
    key: SearchKey,
    parent: Option<Weak<ProxyNode>>,
    object: RwLock<Arc<dyn RemoteModelObject>>,
    valid: AtomicBool,
    visible: AtomicBool,
    state: Mutex<LoadState>,
}

impl ProxyNode {
    /// Create the root node of a tree.
    pub fn new_root(object: Arc<dyn RemoteModelObject>) -> Arc<Self> {
        Arc::new(Self {
            path: PathAddress::root(),
            key: SearchKey::new(""),
            parent: None,
            object: RwLock::new(object),
            valid: AtomicBool::new(true),
            visible: AtomicBool::new(false),
            state: Mutex::new(LoadState::Unloaded),
        })
    }

    /// Create a child of `parent` holding `object`.
    pub fn new_child(parent: &Arc<ProxyNode>, object: Arc<dyn RemoteModelObject>) -> Arc<Self> {
        let key = object.search_key();
        Arc::new(Self {
            path: parent.path.child(&key),
            key,
            parent: Some(Arc::downgrade(parent)),
            object: RwLock::new(object),
            valid: AtomicBool::new(true),
            visible: AtomicBool::new(false),
            state: Mutex::new(LoadState::Unloaded),
        })
    }

    pub fn path(&self) -> &PathAddress {
        &self.path
    }

    pub fn key(&self) -> &SearchKey {
        &self.key
    }

    /// The parent node, if this is not the root and the parent is alive.
    pub fn parent(&self) -> Option<Arc<ProxyNode>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// The remote object currently held by this node.
    pub fn object(&self) -> Arc<dyn RemoteModelObject> {
        self.object
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap in a fresh remote object, returning the previous one.
    pub fn replace_object(&self, object: Arc<dyn RemoteModelObject>) -> Arc<dyn RemoteModelObject> {
        debug_assert_eq!(object.search_key(), self.key, "object key must match node key");
        let mut slot = self.object.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, object)
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.object().capabilities()
    }

    pub fn is_immutable(&self) -> bool {
        self.object().is_immutable()
    }

    pub fn display_name(&self) -> String {
        self.object().display_name()
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Flag the node invalid.
    ///
    /// Returns `true` only for the call that performed the transition; the
    /// flag never goes back to valid.
    pub fn invalidate(&self) -> bool {
        let flipped = self
            .valid
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if flipped {
            self.visible.store(false, Ordering::Release);
            *self.state.lock().unwrap_or_else(PoisonError::into_inner) = LoadState::Invalidated;
        }
        flipped
    }

    /// Check that this node and every ancestor is still valid.
    pub fn check_valid(&self) -> CacheResult<()> {
        if !self.is_valid() {
            return Err(self.invalidated_error());
        }
        let mut next = self.parent.clone();
        while let Some(weak) = next {
            let Some(ancestor) = weak.upgrade() else {
                return Err(self.invalidated_error());
            };
            if !ancestor.is_valid() {
                return Err(self.invalidated_error());
            }
            next = ancestor.parent.clone();
        }
        Ok(())
    }

    /// Returns `true` if `ancestor` is this node or one of its ancestors.
    pub fn descends_from(&self, ancestor: &ProxyNode) -> bool {
        if std::ptr::eq(self, ancestor) {
            return true;
        }
        let mut next = self.parent();
        while let Some(node) = next {
            if std::ptr::eq(node.as_ref(), ancestor) {
                return true;
            }
            next = node.parent();
        }
        false
    }

    pub fn load_state(&self) -> LoadState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `next` unless the node has been invalidated.
    ///
    /// `Invalidated` is only reachable through [`invalidate`](Self::invalidate).
    /// Returns `false` if the transition was refused.
    pub fn set_load_state(&self, next: LoadState) -> bool {
        if next == LoadState::Invalidated {
            return false;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == LoadState::Invalidated {
            return false;
        }
        *state = next;
        true
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Acquire)
    }

    /// Set the visibility flag, returning the previous value.
    ///
    /// Invalid nodes stay invisible.
    pub fn set_visible(&self, visible: bool) -> bool {
        if visible && !self.is_valid() {
            return false;
        }
        self.visible.swap(visible, Ordering::AcqRel)
    }

    fn invalidated_error(&self) -> CacheError {
        CacheError::InvalidatedTarget {
            path: self.path.clone(),
        }
    }
}

impl fmt::Debug for ProxyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyNode")
            .field("path", &self.path)
            .field("valid", &self.is_valid())
            .field("state", &self.load_state())
            .finish()
    }
}
