use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::holder::PermissionHolder;

/// Group directory: resolve a group holder by name (case-insensitive).
///
/// An unknown name is not an error; inheritance simply skips the reference.
pub trait GroupRegistry: Send + Sync {
    fn group(&self, name: &str) -> Option<Arc<PermissionHolder>>;
}

/// Process-local registry keyed by lowercased group name.
#[derive(Default)]
pub struct MemoryGroupRegistry {
    groups: RwLock<HashMap<String, Arc<PermissionHolder>>>,
}

impl MemoryGroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the holder's object name, replacing any previous entry.
    pub fn register(&self, holder: Arc<PermissionHolder>) {
        self.groups
            .write()
            .unwrap()
            .insert(holder.object_name().to_string(), holder);
    }

    pub fn remove(&self, name: &str) -> Option<Arc<PermissionHolder>> {
        self.groups
            .write()
            .unwrap()
            .remove(&name.to_ascii_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

impl GroupRegistry for MemoryGroupRegistry {
    fn group(&self, name: &str) -> Option<Arc<PermissionHolder>> {
        self.groups
            .read()
            .unwrap()
            .get(&name.to_ascii_lowercase())
            .cloned()
    }
}
