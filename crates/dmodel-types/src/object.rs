use std::any::Any;
use std::fmt;

use crate::capability::CapabilitySet;
use crate::key::SearchKey;

/// Opaque handle to remote-side state, supplied by a provider.
///
/// Beyond its [`search_key`](Self::search_key), the content of a remote object
/// is provider-defined. Consumers that know the concrete type recover it
/// through [`as_any`](Self::as_any).
pub trait RemoteModelObject: fmt::Debug + Send + Sync + 'static {
    /// Key identifying this object among its siblings.
    fn search_key(&self) -> SearchKey;

    /// Human-readable name; defaults to the search key.
    fn display_name(&self) -> String {
        self.search_key().into_string()
    }

    /// Commands this object accepts.
    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new()
    }

    /// Whether the object's children never change once listed.
    fn is_immutable(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any;
}
