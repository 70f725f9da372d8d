use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::debug;

use dmodel_protocol::ObjectDescriptor;
use dmodel_types::{
    attributes, AttributeMap, AttributeValue, Capability, ExecutionState, PathAddress, SearchKey,
    StepKind,
};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::ModelProvider;

#[derive(Debug)]
struct Entry {
    descriptor: ObjectDescriptor,
    children: Vec<SearchKey>,
}

impl Entry {
    fn new(descriptor: ObjectDescriptor) -> Self {
        Self {
            descriptor,
            children: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct State {
    entries: HashMap<PathAddress, Entry>,
    log: Vec<String>,
}

/// A [`ModelProvider`] backed by an in-memory hierarchy.
///
/// The hierarchy is edited directly (insert, remove, reorder, set
/// attributes) and served through a [`LocalEngine`](crate::LocalEngine).
/// Interrupt and step commands are recorded in a log and move the target to
/// the `stopped` state.
#[derive(Debug)]
pub struct InMemoryProvider {
    state: RwLock<State>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(PathAddress::root(), Entry::new(ObjectDescriptor::root()));
        Self {
            state: RwLock::new(State {
                entries,
                log: Vec::new(),
            }),
        }
    }

    /// Add `descriptor` as the last child of `parent`, or replace the
    /// descriptor of an existing child with the same key in place.
    ///
    /// Returns the address of the child.
    pub fn insert(&self, parent: &PathAddress, descriptor: ObjectDescriptor) -> ProviderResult<PathAddress> {
        let mut state = self.write();
        let path = parent.child(&descriptor.key);
        let siblings = &mut state
            .entries
            .get_mut(parent)
            .ok_or_else(|| ProviderError::not_found(parent))?
            .children;
        if !siblings.contains(&descriptor.key) {
            siblings.push(descriptor.key.clone());
        }
        match state.entries.get_mut(&path) {
            Some(entry) => entry.descriptor = descriptor,
            None => {
                state.entries.insert(path.clone(), Entry::new(descriptor));
            }
        }
        Ok(path)
    }

    /// Remove the object at `path` together with everything below it.
    pub fn remove(&self, path: &PathAddress) -> ProviderResult<()> {
        let Some(parent) = path.parent() else {
            return Err(ProviderError::bad_request("the root cannot be removed"));
        };
        let mut state = self.write();
        if !state.entries.contains_key(path) {
            return Err(ProviderError::not_found(path));
        }
        state.entries.retain(|p, _| !path.contains(p));
        if let (Some(entry), Some(key)) = (state.entries.get_mut(&parent), path.last()) {
            entry.children.retain(|k| *k != key);
        }
        debug!(path = %path, "object removed");
        Ok(())
    }

    /// Reorder the children of `parent`. `order` must name exactly the
    /// current children.
    pub fn reorder<I, K>(&self, parent: &PathAddress, order: I) -> ProviderResult<()>
    where
        I: IntoIterator<Item = K>,
        K: Into<SearchKey>,
    {
        let order: Vec<SearchKey> = order.into_iter().map(Into::into).collect();
        let mut state = self.write();
        let entry = state
            .entries
            .get_mut(parent)
            .ok_or_else(|| ProviderError::not_found(parent))?;
        let mut current = entry.children.clone();
        let mut proposed = order.clone();
        current.sort();
        proposed.sort();
        if current != proposed {
            return Err(ProviderError::bad_request(format!(
                "reorder of {parent} must name every child exactly once"
            )));
        }
        entry.children = order;
        Ok(())
    }

    /// Set one attribute on the object at `path`.
    pub fn set_attribute(
        &self,
        path: &PathAddress,
        name: &str,
        value: impl Into<AttributeValue>,
    ) -> ProviderResult<()> {
        let mut state = self.write();
        let entry = state
            .entries
            .get_mut(path)
            .ok_or_else(|| ProviderError::not_found(path))?;
        entry.descriptor.attributes.insert(name.to_string(), value.into());
        Ok(())
    }

    pub fn descriptor(&self, path: &PathAddress) -> Option<ObjectDescriptor> {
        self.read().entries.get(path).map(|e| e.descriptor.clone())
    }

    pub fn attributes(&self, path: &PathAddress) -> Option<AttributeMap> {
        self.read()
            .entries
            .get(path)
            .map(|e| e.descriptor.attributes.clone())
    }

    /// Commands executed so far, oldest first.
    pub fn command_log(&self) -> Vec<String> {
        self.read().log.clone()
    }

    fn command(&self, path: &PathAddress, capability: Capability, record: String) -> ProviderResult<()> {
        let mut state = self.write();
        let entry = state
            .entries
            .get_mut(path)
            .ok_or_else(|| ProviderError::not_found(path))?;
        if !entry.descriptor.capabilities.supports(capability) {
            return Err(ProviderError::unsupported(path, capability));
        }
        entry
            .descriptor
            .attributes
            .insert(attributes::STATE.to_string(), ExecutionState::Stopped.into());
        state.log.push(record);
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelProvider for InMemoryProvider {
    async fn get_elements(&self, path: &PathAddress) -> ProviderResult<Vec<ObjectDescriptor>> {
        let state = self.read();
        let entry = state
            .entries
            .get(path)
            .ok_or_else(|| ProviderError::not_found(path))?;
        Ok(entry
            .children
            .iter()
            .filter_map(|key| state.entries.get(&path.child(key)))
            .map(|child| child.descriptor.clone())
            .collect())
    }

    async fn get_attributes(&self, path: &PathAddress) -> ProviderResult<AttributeMap> {
        self.attributes(path)
            .ok_or_else(|| ProviderError::not_found(path))
    }

    async fn interrupt(&self, path: &PathAddress) -> ProviderResult<()> {
        self.command(path, Capability::Interruptible, format!("interrupt {path}"))
    }

    async fn step(&self, path: &PathAddress, kind: StepKind) -> ProviderResult<()> {
        self.command(path, Capability::Steppable, format!("step {kind} {path}"))
    }
}
