//! EntityManager - owns every entity of one kind.
//!
//! The manager downloads remote state, hands out local entities, computes the
//! outgoing diff and drives batched calls through the injected transport.
//!
//! # Sync phases
//!
//! 1. Property sync: create entities without a remote id, update dirty ones,
//!    and recover the ids of created records by their business identifiers.
//! 2. Association sync: push staged association additions, then removals.
//!
//! Local state of a phase is applied only after every remote call of that
//! phase succeeded.

use crate::database::EntityLookup;
use crate::entity::{Entity, EntityRef};
use crate::error::Result;
use crate::index::{Index, IndexSet};
use crate::relation::{AssociationOp, AssociationOrigin};
use crate::transport::{batches_of, BatchPolicy, Downloader, Progress, Uploader};
use crate::{
    Association, EntityKind, EntityUpdate, Error, ExistingEntity, KindAdapter, LocalId,
    NewEntity, OutgoingProperties, Properties, RelativeAssociation, RemoteId,
};
use futures::future::try_join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::{AddAssign, Deref};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counts of remote writes performed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCounters {
    pub created: usize,
    pub updated: usize,
    pub associated: usize,
    pub disassociated: usize,
}

impl SyncCounters {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl AddAssign for SyncCounters {
    fn add_assign(&mut self, rhs: Self) {
        self.created += rhs.created;
        self.updated += rhs.updated;
        self.associated += rhs.associated;
        self.disassociated += rhs.disassociated;
    }
}

/// Result of one association push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssociationSync {
    pub counters: SyncCounters,
    /// `(from, to)` changes the remote service accepted. The reciprocal end
    /// of each may still hold its staged copy.
    pub confirmed: Vec<(EntityRef, EntityRef)>,
}

/// Owns the entities and indexes of one kind.
pub struct EntityManager {
    adapter: Arc<dyn KindAdapter>,
    downloader: Arc<dyn Downloader>,
    uploader: Arc<dyn Uploader>,
    policy: BatchPolicy,
    /// Keyed by monotonic local id, so iteration is insertion order
    entities: BTreeMap<LocalId, Entity>,
    next_local: LocalId,
    indexes: IndexSet,
    /// Downloaded associations waiting for every kind to be present
    prelinked: BTreeMap<RemoteId, BTreeSet<RelativeAssociation>>,
    counters: SyncCounters,
}

impl EntityManager {
    pub fn new(
        adapter: Arc<dyn KindAdapter>,
        downloader: Arc<dyn Downloader>,
        uploader: Arc<dyn Uploader>,
    ) -> Self {
        let policy = BatchPolicy::for_kind(adapter.kind());
        let indexes = IndexSet::new(adapter.indexes());
        Self {
            adapter,
            downloader,
            uploader,
            policy,
            entities: BTreeMap::new(),
            next_local: 1,
            indexes,
            prelinked: BTreeMap::new(),
            counters: SyncCounters::default(),
        }
    }

    /// Builder-style method to override the batch policy.
    pub fn with_batch_policy(mut self, policy: BatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.adapter.kind()
    }

    pub fn adapter(&self) -> &dyn KindAdapter {
        self.adapter.as_ref()
    }

    pub fn batch_policy(&self) -> BatchPolicy {
        self.policy
    }

    /// Cumulative remote writes since the manager was built.
    pub fn counters(&self) -> SyncCounters {
        self.counters
    }

    fn allocate_local(&mut self) -> LocalId {
        let local = self.next_local;
        self.next_local += 1;
        local
    }

    // ------------------------------------------------------------------
    // Download
    // ------------------------------------------------------------------

    /// Download every remote record of this kind.
    ///
    /// Associations are staged as pre-linked until
    /// [`link_associations`](Self::link_associations) runs. A record whose id
    /// is already held locally replaces that entity's data.
    pub async fn download_all_entities(&mut self, progress: &dyn Progress) -> Result<usize> {
        let kind = self.kind();
        let adapter = Arc::clone(&self.adapter);
        let downloader = Arc::clone(&self.downloader);

        let records = downloader
            .download_entities(
                progress,
                kind,
                adapter.api_properties(),
                adapter.down_associations(),
            )
            .await?;

        let mut known: HashMap<RemoteId, LocalId> = self
            .entities
            .values()
            .filter_map(|e| e.id().map(|id| (id.to_string(), e.local_id())))
            .collect();

        let mut count = 0;
        let mut skipped = 0;
        for record in records {
            let Some(data) = adapter.from_api(&record.properties) else {
                skipped += 1;
                debug!(%kind, id = %record.id, "skipping record");
                continue;
            };

            if !record.associations.is_empty() {
                self.prelinked
                    .entry(record.id.clone())
                    .or_default()
                    .extend(record.associations);
            }

            match known.get(&record.id).copied() {
                Some(local) => {
                    if let Some(existing) = self.entities.get_mut(&local) {
                        existing.replace_remote_data(data);
                    }
                }
                None => {
                    let local = self.allocate_local();
                    known.insert(record.id.clone(), local);
                    self.entities
                        .insert(local, Entity::from_remote(local, record.id, kind, data));
                }
            }
            count += 1;
        }

        self.rebuild_indexes();
        info!(%kind, count, skipped, "downloaded entities");
        Ok(count)
    }

    /// Resolve every pre-linked association and link it on this side.
    ///
    /// Returns the resolved `(owner, other)` pairs so the caller can stage the
    /// reciprocal side. Must run only after every kind finished downloading.
    pub fn link_associations(
        &mut self,
        lookup: &dyn EntityLookup,
    ) -> Result<Vec<(EntityRef, EntityRef)>> {
        let kind = self.kind();
        let mut links = Vec::new();

        for (me_id, assocs) in &self.prelinked {
            let me = self.lookup_local(me_id).ok_or_else(|| Error::UnresolvedAssociation {
                kind,
                id: me_id.clone(),
            })?;
            for assoc in assocs {
                let found = if assoc.kind == kind {
                    self.lookup_local(&assoc.id)
                } else {
                    lookup.lookup(assoc.kind, &assoc.id)
                };
                let you = found.ok_or_else(|| Error::UnresolvedAssociation {
                    kind: assoc.kind,
                    id: assoc.id.clone(),
                })?;
                links.push((me, you));
            }
        }

        for (me, you) in &links {
            if let Some(entity) = self.entities.get_mut(&me.local) {
                entity.add_association(*you, AssociationOrigin::Downloaded);
            }
        }
        self.prelinked.clear();

        debug!(%kind, links = links.len(), "linked associations");
        Ok(links)
    }

    fn lookup_local(&self, id: &str) -> Option<EntityRef> {
        self.indexes
            .by_id()
            .get(id)
            .map(|local| EntityRef::new(self.kind(), local))
    }

    // ------------------------------------------------------------------
    // Local collection
    // ------------------------------------------------------------------

    /// Construct a new entity pending creation. No network call.
    pub fn create(&mut self, props: Properties) -> Result<EntityRef> {
        self.adapter.schema().validate_properties(&props)?;

        let local = self.allocate_local();
        let entity = Entity::new_local(local, self.kind(), props);
        self.indexes.add_indexes_for([&entity]);
        let entity_ref = entity.entity_ref();
        self.entities.insert(local, entity);
        Ok(entity_ref)
    }

    /// Drop entities from the indexes and the collection. The remote service
    /// is not told.
    pub fn remove_locally(&mut self, locals: &[LocalId]) -> Vec<Entity> {
        let targets: Vec<&Entity> = locals.iter().filter_map(|l| self.entities.get(l)).collect();
        self.indexes.remove_indexes_for(targets.iter().copied());

        locals
            .iter()
            .filter_map(|l| self.entities.remove(l))
            .collect()
    }

    pub fn get_all(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn get_array(&self) -> Vec<&Entity> {
        self.entities.values().collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Look an entity up by remote id.
    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.find(crate::index::ID_INDEX, id)
    }

    /// Look an entity up through a named index.
    pub fn find(&self, index: &str, key: &str) -> Option<&Entity> {
        self.indexes
            .get(index)
            .and_then(|i| i.get(key))
            .and_then(|local| self.entities.get(&local))
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.get(name)
    }

    pub fn entity(&self, local: LocalId) -> Option<&Entity> {
        self.entities.get(&local)
    }

    /// Mutable access that keeps this manager's indexes current.
    pub fn entity_mut(&mut self, local: LocalId) -> Option<EntityMut<'_>> {
        let entity = self.entities.get_mut(&local)?;
        Some(EntityMut {
            entity,
            indexes: &mut self.indexes,
            adapter: self.adapter.as_ref(),
        })
    }

    pub(crate) fn raw_entity_mut(&mut self, local: LocalId) -> Option<&mut Entity> {
        self.entities.get_mut(&local)
    }

    pub(crate) fn forget_associations_with(&mut self, removed: &[EntityRef]) {
        for entity in self.entities.values_mut() {
            for other in removed {
                entity.forget_association(other);
            }
        }
    }

    pub fn rebuild_indexes(&mut self) {
        self.indexes.rebuild(self.entities.values());
    }

    // ------------------------------------------------------------------
    // Sync up
    // ------------------------------------------------------------------

    /// Push every pending property and association change of this kind.
    pub async fn sync_up_all_entities(
        &mut self,
        lookup: &dyn EntityLookup,
    ) -> Result<SyncCounters> {
        let mut delta = self.sync_up_properties().await?;
        delta += self.sync_up_associations(lookup).await?.counters;
        self.rebuild_indexes();
        Ok(delta)
    }

    /// Phase 1: create new entities, update dirty ones.
    pub async fn sync_up_properties(&mut self) -> Result<SyncCounters> {
        let kind = self.kind();
        let (to_create, to_update): (Vec<&Entity>, Vec<&Entity>) = self
            .entities
            .values()
            .filter(|e| e.has_property_changes())
            .partition(|e| e.id().is_none());

        let create_payloads: Vec<(LocalId, NewEntity)> = to_create
            .iter()
            .map(|e| {
                (
                    e.local_id(),
                    NewEntity {
                        properties: self.changed_properties(e),
                    },
                )
            })
            .collect();
        let update_payloads: Vec<(LocalId, EntityUpdate)> = to_update
            .iter()
            .filter_map(|e| {
                let id = e.id()?.to_string();
                Some((
                    e.local_id(),
                    EntityUpdate {
                        id,
                        properties: self.changed_properties(e),
                    },
                ))
            })
            .collect();

        let mut delta = SyncCounters::default();
        let uploader = Arc::clone(&self.uploader);
        let batch_size = self.policy.entity_batch_size;

        if !create_payloads.is_empty() {
            let (locals, payloads): (Vec<LocalId>, Vec<NewEntity>) =
                create_payloads.into_iter().unzip();
            let results: Vec<ExistingEntity> = try_join_all(
                batches_of(payloads, batch_size)
                    .into_iter()
                    .map(|batch| uploader.create_entities(kind, batch)),
            )
            .await?
            .into_iter()
            .flatten()
            .collect();

            let assigned = self.match_created(&locals, &results)?;
            for (local, id) in assigned {
                if let Some(entity) = self.entities.get_mut(&local) {
                    entity.assign_id(id);
                    entity.apply_property_changes();
                }
            }
            delta.created = locals.len();
            info!(%kind, count = delta.created, "created entities");
        }

        if !update_payloads.is_empty() {
            let (locals, payloads): (Vec<LocalId>, Vec<EntityUpdate>) =
                update_payloads.into_iter().unzip();
            try_join_all(
                batches_of(payloads, batch_size)
                    .into_iter()
                    .map(|batch| uploader.update_entities(kind, batch)),
            )
            .await?;

            for local in &locals {
                if let Some(entity) = self.entities.get_mut(local) {
                    entity.apply_property_changes();
                }
            }
            delta.updated = locals.len();
            info!(%kind, count = delta.updated, "updated entities");
        }

        self.counters += delta;
        Ok(delta)
    }

    /// Phase 2: push staged association changes.
    ///
    /// This kind pushes the changes toward kinds listed in the adapter's
    /// `up_associations`; for links within the kind only the initiating side
    /// is pushed. Everything else stays staged until the owning side's push
    /// is confirmed. Changes with an endpoint that has no remote id yet stay
    /// staged for a later cycle.
    pub async fn sync_up_associations(
        &mut self,
        lookup: &dyn EntityLookup,
    ) -> Result<AssociationSync> {
        let kind = self.kind();
        let up = self.adapter.up_associations();

        let mut adds: BTreeMap<EntityKind, Vec<Association>> = BTreeMap::new();
        let mut dels: BTreeMap<EntityKind, Vec<Association>> = BTreeMap::new();
        let mut pushed: Vec<(EntityRef, EntityRef)> = Vec::new();

        for entity in self.entities.values().filter(|e| e.has_association_changes()) {
            for change in entity.association_changes() {
                let owned = up.contains(&change.other.kind)
                    && (change.other.kind != kind || change.first_side);
                if !owned {
                    continue;
                }
                let from_id = entity.id();
                let to_id = self.resolve_remote_id(change.other, lookup);
                let (Some(from_id), Some(to_id)) = (from_id, to_id) else {
                    warn!(%kind, from = %entity.entity_ref(), to = %change.other, "deferring association without remote id");
                    continue;
                };
                let input = Association {
                    from_id: from_id.to_string(),
                    to_id,
                    to_kind: change.other.kind,
                };
                match change.op {
                    AssociationOp::Add => adds.entry(change.other.kind).or_default().push(input),
                    AssociationOp::Remove => dels.entry(change.other.kind).or_default().push(input),
                }
                pushed.push((entity.entity_ref(), change.other));
            }
        }

        let uploader = Arc::clone(&self.uploader);
        let batch_size = self.policy.association_batch_size;
        let associated: usize = adds.values().map(Vec::len).sum();
        let disassociated: usize = dels.values().map(Vec::len).sum();

        let add_batches = association_batches(adds, batch_size);
        try_join_all(
            add_batches
                .into_iter()
                .map(|(to, batch)| uploader.create_associations(kind, to, batch)),
        )
        .await?;

        let del_batches = association_batches(dels, batch_size);
        try_join_all(
            del_batches
                .into_iter()
                .map(|(to, batch)| uploader.delete_associations(kind, to, batch)),
        )
        .await?;

        for (from, to) in &pushed {
            if let Some(entity) = self.entities.get_mut(&from.local) {
                entity.apply_association_change(to);
            }
            // Same-kind reciprocal ends live here too.
            if to.kind == kind {
                if let Some(entity) = self.entities.get_mut(&to.local) {
                    entity.apply_association_change(from);
                }
            }
        }

        let counters = SyncCounters {
            associated,
            disassociated,
            ..SyncCounters::default()
        };
        if !counters.is_empty() {
            info!(%kind, associated, disassociated, "synced associations");
        }
        self.counters += counters;
        Ok(AssociationSync {
            counters,
            confirmed: pushed,
        })
    }

    fn resolve_remote_id(&self, other: EntityRef, lookup: &dyn EntityLookup) -> Option<RemoteId> {
        if other.kind == self.kind() {
            self.entities
                .get(&other.local)
                .and_then(|e| e.id())
                .map(str::to_string)
        } else {
            lookup.remote_id(other)
        }
    }

    /// Pending properties of `entity` in their remote form.
    fn changed_properties(&self, entity: &Entity) -> OutgoingProperties {
        entity
            .changed_properties()
            .filter_map(|(k, v)| self.adapter.to_api(k, v))
            .collect()
    }

    /// Remote values `entity` must show under its business identifiers.
    fn expected_identifiers(&self, entity: &Entity) -> Vec<(String, String)> {
        self.adapter
            .identifiers()
            .iter()
            .filter_map(|field| {
                let value = entity.get(field).unwrap_or(&Value::Null);
                self.adapter.to_api(field, value)
            })
            .collect()
    }

    /// Pair every created local entity with exactly one returned record.
    ///
    /// Nothing is mutated here, so a mismatch leaves local state untouched.
    fn match_created(
        &self,
        locals: &[LocalId],
        results: &[ExistingEntity],
    ) -> Result<Vec<(LocalId, RemoteId)>> {
        let kind = self.kind();
        let mut claimed: HashSet<&str> = HashSet::new();
        let mut assigned = Vec::with_capacity(locals.len());

        for local in locals {
            let entity = self
                .entities
                .get(local)
                .ok_or(Error::EntityNotFound(EntityRef::new(kind, *local)))?;
            let expected = self.expected_identifiers(entity);

            let matches: Vec<&ExistingEntity> = results
                .iter()
                .filter(|r| expected.iter().all(|(key, value)| r.property(key) == value))
                .collect();

            match matches.as_slice() {
                [found] if claimed.insert(found.id.as_str()) => {
                    assigned.push((*local, found.id.clone()));
                }
                _ => {
                    return Err(Error::CreationMismatch {
                        kind,
                        matches: matches.len(),
                        attachment: creation_diagnostic(entity, results),
                    })
                }
            }
        }

        Ok(assigned)
    }
}

fn association_batches(
    by_kind: BTreeMap<EntityKind, Vec<Association>>,
    size: usize,
) -> Vec<(EntityKind, Vec<Association>)> {
    by_kind
        .into_iter()
        .flat_map(|(to, inputs)| {
            batches_of(inputs, size)
                .into_iter()
                .map(move |batch| (to, batch))
        })
        .collect()
}

fn creation_diagnostic(entity: &Entity, results: &[ExistingEntity]) -> String {
    let diagnostic = serde_json::json!({
        "local": entity.data(),
        "remotes": results,
    });
    serde_json::to_string_pretty(&diagnostic).unwrap_or_else(|_| diagnostic.to_string())
}

impl std::fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityManager")
            .field("kind", &self.kind())
            .field("entities", &self.entities.len())
            .field("policy", &self.policy)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

/// Mutable entity access handed out by a manager.
///
/// Property writes are validated against the kind's schema and keep the
/// manager's indexes current.
pub struct EntityMut<'a> {
    entity: &'a mut Entity,
    indexes: &'a mut IndexSet,
    adapter: &'a dyn KindAdapter,
}

impl EntityMut<'_> {
    /// Write a property; returns the previous value.
    pub fn set(&mut self, property: &str, value: Value) -> Result<Option<Value>> {
        self.adapter.schema().validate_property(property, &value)?;
        Ok(self.entity.set_indexed(property, value, &mut *self.indexes))
    }

    /// Link `other` on this side only, pending confirmation.
    pub fn add_association(&mut self, other: EntityRef) {
        self.entity
            .add_association(other, AssociationOrigin::LocalPending);
    }

    /// Stage removal of the link to `other` on this side only.
    pub fn remove_association(&mut self, other: EntityRef) {
        self.entity.remove_association(other);
    }

    pub fn clear_associations(&mut self, kind: EntityKind) {
        self.entity.clear_associations(kind);
    }
}

impl Deref for EntityMut<'_> {
    type Target = Entity;

    fn deref(&self) -> &Entity {
        self.entity
    }
}
