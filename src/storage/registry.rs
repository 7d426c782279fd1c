//! Named source adapter registry
//!
//! Pull-through sources (external databases a client may sync from) are
//! registered under a name and resolved per pull request.

use crate::storage::adapters::DatabaseAdapter;
use dashmap::DashMap;
use std::sync::Arc;

/// String-keyed registry of database adapters
#[derive(Default)]
pub struct SourceRegistry {
    adapters: DashMap<String, Arc<dyn DatabaseAdapter>>,
}

impl SourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under a name, replacing any previous entry
    pub fn register(&self, name: impl Into<String>, adapter: Arc<dyn DatabaseAdapter>) {
        self.adapters.insert(name.into(), adapter);
    }

    /// Remove a named adapter; returns whether it existed
    pub fn unregister(&self, name: &str) -> bool {
        self.adapters.remove(name).is_some()
    }

    /// Resolve a named adapter
    pub fn get(&self, name: &str) -> Option<Arc<dyn DatabaseAdapter>> {
        self.adapters.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Registered names, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
