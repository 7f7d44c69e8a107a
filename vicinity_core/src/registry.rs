//! The entity registry: single owner of position truth.
//!
//! Every tracked truck, worker and observer lives here with its most recent
//! position. Writes are serialized behind one lock and commit position,
//! status, `last_updated` and `revision` together, so readers never see a
//! half-applied update. After a write commits, the registered observer
//! (normally the realtime bus) is told about it.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;
use vicinity_env::Clock;

use crate::error::{ProximityError, Result};
use crate::types::{EntityId, EntityKind, EntityStatus, Position, TrackedEntity};

// ============================================================================
// CHANGE NOTIFICATION
// ============================================================================

/// A committed registry write.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryChange {
    Updated(TrackedEntity),
    Removed(EntityId),
}

/// Receives every committed write, after the registry lock is released.
///
/// Implementations must not write back into the registry from
/// `on_change`; reads are fine.
pub trait RegistryObserver: Send + Sync {
    fn on_change(&self, change: &RegistryChange);
}

// ============================================================================
// EXTERNAL STORE
// ============================================================================

/// Durable storage for entity identity and status, owned outside the engine.
///
/// The registry is an in-memory cache populated from and synced to this
/// store; the engine defines no schema for it.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<TrackedEntity>>;
    async fn save(&self, entity: &TrackedEntity) -> Result<()>;
}

/// In-memory store, for tests and offline demo fleets.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<IndexMap<EntityId, TrackedEntity>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store with a fleet.
    pub fn with_records(records: impl IntoIterator<Item = TrackedEntity>) -> Self {
        let store = Self::new();
        {
            let mut map = store.records.lock().unwrap_or_else(PoisonError::into_inner);
            for record in records {
                map.insert(record.id.clone(), record);
            }
        }
        store
    }

    pub fn get(&self, id: &EntityId) -> Option<TrackedEntity> {
        let map = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        map.get(id).cloned()
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn load_all(&self) -> Result<Vec<TrackedEntity>> {
        let map = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(map.values().cloned().collect())
    }

    async fn save(&self, entity: &TrackedEntity) -> Result<()> {
        let mut map = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        map.insert(entity.id.clone(), entity.clone());
        Ok(())
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// In-memory directory of tracked entities.
pub struct EntityRegistry {
    /// Insertion-ordered so scans are deterministic
    entries: RwLock<IndexMap<EntityId, TrackedEntity>>,

    clock: Arc<dyn Clock>,

    /// Age beyond which an entry is reported stale (never deleted)
    stale_after: Duration,

    observer: Option<Arc<dyn RegistryObserver>>,
}

impl EntityRegistry {
    /// Creates an empty registry stamping writes with `clock`.
    pub fn new(clock: Arc<dyn Clock>, stale_after: Duration) -> Self {
        Self {
            entries: RwLock::new(IndexMap::new()),
            clock,
            stale_after,
            observer: None,
        }
    }

    /// Routes committed writes to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn RegistryObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Inserts or replaces an entity, returning the committed record.
    ///
    /// `last_updated` is always set to the call time and `revision` is bumped
    /// past whatever was stored before. A replaced entry keeps its original
    /// insertion slot.
    pub fn upsert(&self, mut entity: TrackedEntity) -> TrackedEntity {
        let committed = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            let previous = entries.get(&entity.id).map(|e| e.revision).unwrap_or(0);
            entity.revision = previous + 1;
            entity.last_updated = self.clock.system_time();
            entries.insert(entity.id.clone(), entity.clone());
            entity
        };

        self.notify(RegistryChange::Updated(committed.clone()));
        committed
    }

    /// The single "update position/status" operation for a known entity.
    pub fn update_position(
        &self,
        id: &EntityId,
        position: Position,
        status: Option<EntityStatus>,
    ) -> Result<TrackedEntity> {
        let committed = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            let entry = entries
                .get_mut(id)
                .ok_or_else(|| ProximityError::not_found(format!("entity {id}")))?;
            entry.position = position;
            if let Some(status) = status {
                entry.status = status;
            }
            entry.last_updated = self.clock.system_time();
            entry.revision += 1;
            entry.clone()
        };

        self.notify(RegistryChange::Updated(committed.clone()));
        Ok(committed)
    }

    pub fn get(&self, id: &EntityId) -> Result<TrackedEntity> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(id)
            .cloned()
            .ok_or_else(|| ProximityError::not_found(format!("entity {id}")))
    }

    /// Latest committed position of `id`, if the entity is known.
    pub fn position_of(&self, id: &EntityId) -> Option<Position> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(id).map(|e| e.position)
    }

    /// Snapshot of all entities of `kind`, optionally filtered by status.
    ///
    /// Ordered by insertion; callers must not attach meaning to the order.
    pub fn list_by_kind(
        &self,
        kind: EntityKind,
        status_filter: Option<EntityStatus>,
    ) -> Vec<TrackedEntity> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .values()
            .filter(|e| e.kind == kind)
            .filter(|e| status_filter.map_or(true, |s| e.status == s))
            .cloned()
            .collect()
    }

    /// Deregisters an entity. Removing an unknown id is not an error.
    pub fn remove(&self, id: &EntityId) {
        let removed = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            entries.shift_remove(id).is_some()
        };

        if removed {
            self.notify(RegistryChange::Removed(id.clone()));
        }
    }

    /// True when the entry has not been written for longer than `stale_after`.
    pub fn is_stale(&self, id: &EntityId) -> Result<bool> {
        let entity = self.get(id)?;
        Ok(self.age_exceeds(&entity))
    }

    /// Ids of every stale entry, in insertion order.
    pub fn stale_entities(&self) -> Vec<EntityId> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .values()
            .filter(|e| self.age_exceeds(e))
            .map(|e| e.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Populates the registry from the external store.
    pub async fn load_from(&self, store: &dyn RegistryStore) -> Result<usize> {
        let records = store.load_all().await?;
        let count = records.len();
        for record in records {
            self.upsert(record);
        }
        debug!("Loaded {} entities from store", count);
        Ok(count)
    }

    /// Writes the current record for `id` back to the external store.
    pub async fn persist(&self, id: &EntityId, store: &dyn RegistryStore) -> Result<()> {
        let entity = self.get(id)?;
        store.save(&entity).await
    }

    fn age_exceeds(&self, entity: &TrackedEntity) -> bool {
        self.clock
            .system_time()
            .duration_since(entity.last_updated)
            .map(|age| age > self.stale_after)
            .unwrap_or(false)
    }

    /// Runs after the write lock is released. Notifications for concurrent
    /// writes to the same id can therefore arrive out of `revision` order.
    fn notify(&self, change: RegistryChange) {
        if let Some(observer) = &self.observer {
            observer.on_change(&change);
        }
    }
}
