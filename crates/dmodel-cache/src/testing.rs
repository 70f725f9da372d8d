//! Test doubles shared by the unit tests of this crate.

use std::any::Any;
use std::sync::Arc;

use dmodel_types::{RemoteModelObject, SearchKey};

#[derive(Debug)]
pub(crate) struct TestObject {
    key: SearchKey,
    version: u32,
}

impl RemoteModelObject for TestObject {
    fn search_key(&self) -> SearchKey {
        self.key.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn obj(key: &str, version: u32) -> Arc<dyn RemoteModelObject> {
    Arc::new(TestObject {
        key: SearchKey::new(key),
        version,
    })
}

pub(crate) fn version_of(object: &dyn RemoteModelObject) -> u32 {
    object
        .as_any()
        .downcast_ref::<TestObject>()
        .map(|o| o.version)
        .unwrap_or(u32::MAX)
}
