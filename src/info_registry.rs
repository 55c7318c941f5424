use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use log::warn;
use parking_lot::Mutex;

/// A trivial name -> shared-object map, used to publish ancillary objects
/// (a metrics sink, a config snapshot, ...) without inventing a new message
/// type for the dispatch fabric. Explicitly out of scope for the scheduling
/// core itself, but still owned by the framework manager.
#[derive(Default)]
pub struct InformationRegistry {
    entries: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl InformationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, name: impl Into<String>, value: Arc<dyn Any + Send + Sync>) {
        let name = name.into();
        if self.entries.lock().insert(name.clone(), value).is_some() {
            warn!("information entry '{name}' was replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.entries.lock().get(name).cloned()
    }

    pub fn get_as<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.get(name).and_then(|value| value.downcast::<T>().ok())
    }

    pub fn remove(&self, name: &str) {
        self.entries.lock().remove(name);
    }
}
