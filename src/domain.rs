//! Domain store access.
//!
//! The engine never owns clinical data. Snapshots for backup, existence checks
//! for integrity verification, and the final destructive step of the deletion
//! sweep all go through the [`EntityStore`] seam, implemented by the owning
//! platform. [`InMemoryEntityStore`] is the reference implementation used by
//! tests and the development binary.

use crate::error::{CustodiaError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Accessor for the domain entities under retention.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Fetch a JSON snapshot of an entity for archiving.
    async fn snapshot(&self, entity_type: &str, entity_id: &str) -> Result<serde_json::Value>;

    /// Whether the entity still exists in the domain store.
    async fn exists(&self, entity_type: &str, entity_id: &str) -> Result<bool>;

    /// Destroy the underlying entity. Only the deletion sweep calls this, and
    /// only after observing a verified backup on the ledger row.
    async fn delete(&self, entity_type: &str, entity_id: &str) -> Result<()>;

    /// Replay a snapshot back into the domain store during restore.
    async fn restore_snapshot(
        &self,
        entity_type: &str,
        entity_id: &str,
        snapshot: serde_json::Value,
    ) -> Result<()>;
}

/// In-memory entity store for tests and development.
pub struct InMemoryEntityStore {
    entities: RwLock<HashMap<(String, String), serde_json::Value>>,
    fail_deletes: AtomicBool,
}

impl InMemoryEntityStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            fail_deletes: AtomicBool::new(false),
        }
    }

    /// Inserts an entity.
    pub async fn insert(
        &self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        data: serde_json::Value,
    ) {
        let mut entities = self.entities.write().await;
        entities.insert((entity_type.into(), entity_id.into()), data);
    }

    /// Removes an entity directly, bypassing the deletion sweep.
    pub async fn remove(&self, entity_type: &str, entity_id: &str) {
        let mut entities = self.entities.write().await;
        entities.remove(&(entity_type.to_string(), entity_id.to_string()));
    }

    /// Makes subsequent `delete` calls fail, for exercising abort paths.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Number of entities currently stored.
    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.entities.read().await.is_empty()
    }
}

impl Default for InMemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn snapshot(&self, entity_type: &str, entity_id: &str) -> Result<serde_json::Value> {
        let entities = self.entities.read().await;
        entities
            .get(&(entity_type.to_string(), entity_id.to_string()))
            .cloned()
            .ok_or_else(|| {
                CustodiaError::NotFound(format!("Entity {}/{}", entity_type, entity_id))
            })
    }

    async fn exists(&self, entity_type: &str, entity_id: &str) -> Result<bool> {
        let entities = self.entities.read().await;
        Ok(entities.contains_key(&(entity_type.to_string(), entity_id.to_string())))
    }

    async fn delete(&self, entity_type: &str, entity_id: &str) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(CustodiaError::Storage(
                "Entity store refused the delete".to_string(),
            ));
        }

        let mut entities = self.entities.write().await;
        entities
            .remove(&(entity_type.to_string(), entity_id.to_string()))
            .ok_or_else(|| {
                CustodiaError::NotFound(format!("Entity {}/{}", entity_type, entity_id))
            })?;
        Ok(())
    }

    async fn restore_snapshot(
        &self,
        entity_type: &str,
        entity_id: &str,
        snapshot: serde_json::Value,
    ) -> Result<()> {
        let mut entities = self.entities.write().await;
        entities.insert((entity_type.to_string(), entity_id.to_string()), snapshot);
        Ok(())
    }
}
