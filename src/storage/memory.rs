//! In-memory object store
//!
//! A DashMap-backed [`ObjectStore`] used by tests, local development and the
//! in-process flush-queue consumer. Semantics mirror a real object store:
//! immutable puts overwrite whole objects, listing is by key prefix, and
//! last-modified stamps come from the wall clock.

use crate::core::error::AdapterError;
use crate::storage::adapters::{ObjectMeta, ObjectStore};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Bytes,
    content_type: String,
    last_modified_ms: u64,
}

/// DashMap-backed in-memory object store
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: DashMap<String, StoredObject>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn wall_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Content type recorded for a key, if present
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects.get(key).map(|o| o.content_type.clone())
    }

    /// Backdate an object's last-modified stamp by `age_ms`. Test hook for
    /// exercising age-guarded sweeps.
    pub fn age_object(&self, key: &str, age_ms: u64) {
        if let Some(mut obj) = self.objects.get_mut(key) {
            obj.last_modified_ms = Self::wall_ms().saturating_sub(age_ms);
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), AdapterError> {
        self.objects.insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
                last_modified_ms: Self::wall_ms(),
            },
        );
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Bytes, AdapterError> {
        self.objects
            .get(key)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| AdapterError::NotFound(key.to_string()))
    }

    async fn head_object(&self, key: &str) -> Result<ObjectMeta, AdapterError> {
        self.objects
            .get(key)
            .map(|o| ObjectMeta {
                key: key.to_string(),
                size: o.bytes.len() as u64,
                last_modified_ms: o.last_modified_ms,
            })
            .ok_or_else(|| AdapterError::NotFound(key.to_string()))
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectMeta>, AdapterError> {
        let mut listed: Vec<ObjectMeta> = self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| ObjectMeta {
                key: entry.key().clone(),
                size: entry.value().bytes.len() as u64,
                last_modified_ms: entry.value().last_modified_ms,
            })
            .collect();
        listed.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(listed)
    }

    async fn delete_object(&self, key: &str) -> Result<(), AdapterError> {
        self.objects.remove(key);
        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<(), AdapterError> {
        for key in keys {
            self.objects.remove(key);
        }
        Ok(())
    }
}
