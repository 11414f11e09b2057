//! EntityDatabase - one manager per kind, plus cross-kind resolution.
//!
//! Managers never reference each other. Everything that crosses kinds
//! (resolving downloaded associations, staging both sides of a local link,
//! translating handles to remote ids during sync) goes through the database.

use crate::entity::{Entity, EntityRef};
use crate::error::Result;
use crate::manager::{EntityManager, EntityMut, SyncCounters};
use crate::relation::AssociationOrigin;
use crate::transport::LoggingProgress;
use crate::{EntityKind, Error, LocalId, RemoteId};
use futures::future::try_join_all;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::info;

/// Resolves entities across kinds by remote id.
pub trait EntityLookup: Send + Sync {
    /// Handle of the `kind` entity with remote id `id`.
    fn lookup(&self, kind: EntityKind, id: &str) -> Option<EntityRef>;

    /// Remote id of `entity`, if it has one.
    fn remote_id(&self, entity: EntityRef) -> Option<RemoteId>;
}

/// Snapshot of every `(kind, remote id)` pair held by a database.
#[derive(Debug, Clone, Default)]
pub struct EntityDirectory {
    by_id: HashMap<(EntityKind, RemoteId), LocalId>,
    ids: HashMap<EntityRef, RemoteId>,
}

impl EntityDirectory {
    pub fn insert(&mut self, entity: &Entity) {
        if let Some(id) = entity.id() {
            self.by_id
                .insert((entity.kind(), id.to_string()), entity.local_id());
            self.ids.insert(entity.entity_ref(), id.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl EntityLookup for EntityDirectory {
    fn lookup(&self, kind: EntityKind, id: &str) -> Option<EntityRef> {
        self.by_id
            .get(&(kind, id.to_string()))
            .map(|local| EntityRef::new(kind, *local))
    }

    fn remote_id(&self, entity: EntityRef) -> Option<RemoteId> {
        self.ids.get(&entity).cloned()
    }
}

/// Per-kind counters of one database sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub kinds: BTreeMap<EntityKind, SyncCounters>,
}

impl SyncReport {
    pub fn get(&self, kind: EntityKind) -> SyncCounters {
        self.kinds.get(&kind).copied().unwrap_or_default()
    }

    pub fn total(&self) -> SyncCounters {
        let mut total = SyncCounters::default();
        for counters in self.kinds.values() {
            total += *counters;
        }
        total
    }
}

#[derive(Debug, Default)]
pub struct EntityDatabase {
    managers: BTreeMap<EntityKind, EntityManager>,
}

impl EntityDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a manager. A manager of the same kind is replaced.
    pub fn add_manager(&mut self, manager: EntityManager) {
        self.managers.insert(manager.kind(), manager);
    }

    /// Builder-style variant of [`add_manager`](Self::add_manager).
    pub fn with_manager(mut self, manager: EntityManager) -> Self {
        self.add_manager(manager);
        self
    }

    pub fn manager(&self, kind: EntityKind) -> Result<&EntityManager> {
        self.managers
            .get(&kind)
            .ok_or_else(|| Error::UnknownKind(kind.to_string()))
    }

    pub fn manager_mut(&mut self, kind: EntityKind) -> Result<&mut EntityManager> {
        self.managers
            .get_mut(&kind)
            .ok_or_else(|| Error::UnknownKind(kind.to_string()))
    }

    pub fn managers(&self) -> impl Iterator<Item = &EntityManager> {
        self.managers.values()
    }

    /// Handle of the `kind` entity with remote id `id`.
    pub fn get_entity(&self, kind: EntityKind, id: &str) -> Result<EntityRef> {
        self.manager(kind)?
            .get(id)
            .map(Entity::entity_ref)
            .ok_or_else(|| Error::UnknownRemoteId {
                kind,
                id: id.to_string(),
            })
    }

    pub fn entity(&self, entity: EntityRef) -> Result<&Entity> {
        self.manager(entity.kind)?
            .entity(entity.local)
            .ok_or(Error::EntityNotFound(entity))
    }

    pub fn entity_mut(&mut self, entity: EntityRef) -> Result<EntityMut<'_>> {
        self.manager_mut(entity.kind)?
            .entity_mut(entity.local)
            .ok_or(Error::EntityNotFound(entity))
    }

    fn raw_entity_mut(&mut self, entity: EntityRef) -> Result<&mut Entity> {
        self.manager_mut(entity.kind)?
            .raw_entity_mut(entity.local)
            .ok_or(Error::EntityNotFound(entity))
    }

    /// Current `(kind, remote id)` snapshot of every managed entity.
    pub fn directory(&self) -> EntityDirectory {
        let mut directory = EntityDirectory::default();
        for entity in self.managers.values().flat_map(EntityManager::get_all) {
            directory.insert(entity);
        }
        directory
    }

    /// Download every kind concurrently, then link associations.
    pub async fn download_all_data(&mut self) -> Result<()> {
        try_join_all(self.managers.values_mut().map(|manager| async move {
            let progress = LoggingProgress::new(manager.kind().plural());
            manager.download_all_entities(&progress).await
        }))
        .await?;

        self.link_associations()
    }

    /// Resolve every manager's pre-linked associations.
    ///
    /// Each resolved link is applied on both sides as downloaded state, so it
    /// is not pushed back on the next sync.
    pub fn link_associations(&mut self) -> Result<()> {
        let directory = self.directory();

        let mut links = Vec::new();
        for manager in self.managers.values_mut() {
            links.extend(manager.link_associations(&directory)?);
        }

        let count = links.len();
        for (owner, other) in links {
            self.raw_entity_mut(other)?
                .add_association(owner, AssociationOrigin::Downloaded);
        }

        info!(links = count, "linked associations");
        Ok(())
    }

    /// Stage a link between `a` and `b` on both sides.
    pub fn associate(&mut self, a: EntityRef, b: EntityRef) -> Result<()> {
        self.entity(a)?;
        self.entity(b)?;
        self.raw_entity_mut(a)?
            .add_association(b, AssociationOrigin::LocalPending);
        self.raw_entity_mut(b)?.add_reciprocal_association(a);
        Ok(())
    }

    /// Stage removal of the link between `a` and `b` on both sides.
    pub fn disassociate(&mut self, a: EntityRef, b: EntityRef) -> Result<()> {
        self.entity(a)?;
        self.entity(b)?;
        self.raw_entity_mut(a)?.remove_association(b);
        self.raw_entity_mut(b)?.remove_reciprocal_association(a);
        Ok(())
    }

    /// Stage removal of every `kind` link of `entity`, on both sides.
    pub fn clear_associations(&mut self, entity: EntityRef, kind: EntityKind) -> Result<()> {
        let others = self.entity(entity)?.associated(kind);
        for other in others {
            self.disassociate(entity, other)?;
        }
        Ok(())
    }

    /// Drop entities locally without telling the remote service.
    ///
    /// Relations of surviving entities forget the removed handles.
    pub fn remove_locally(&mut self, entities: &[EntityRef]) -> Vec<Entity> {
        let mut by_kind: BTreeMap<EntityKind, Vec<LocalId>> = BTreeMap::new();
        for entity in entities {
            by_kind.entry(entity.kind).or_default().push(entity.local);
        }

        let mut removed = Vec::new();
        for (kind, locals) in by_kind {
            if let Some(manager) = self.managers.get_mut(&kind) {
                removed.extend(manager.remove_locally(&locals));
            }
        }

        let refs: Vec<EntityRef> = removed.iter().map(Entity::entity_ref).collect();
        for manager in self.managers.values_mut() {
            manager.forget_associations_with(&refs);
        }
        removed
    }

    /// Push every pending change of every kind.
    ///
    /// Properties go first for all kinds, so association pushes can address
    /// entities created in the same cycle.
    pub async fn sync_up_all_entities(&mut self) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        for manager in self.managers.values_mut() {
            let delta = manager.sync_up_properties().await?;
            *report.kinds.entry(manager.kind()).or_default() += delta;
        }

        let directory = self.directory();
        let kinds: Vec<EntityKind> = self.managers.keys().copied().collect();
        for kind in kinds {
            let Some(manager) = self.managers.get_mut(&kind) else {
                continue;
            };
            let pushed = manager.sync_up_associations(&directory).await?;
            *report.kinds.entry(kind).or_default() += pushed.counters;

            // Reciprocal ends commit only once their owner's push went through.
            for (from, to) in pushed.confirmed {
                if to.kind != kind {
                    self.raw_entity_mut(to)?.apply_association_change(&from);
                }
            }
        }

        for manager in self.managers.values_mut() {
            manager.rebuild_indexes();
        }

        let total = report.total();
        info!(
            created = total.created,
            updated = total.updated,
            associated = total.associated,
            disassociated = total.disassociated,
            "sync complete"
        );
        Ok(report)
    }
}
