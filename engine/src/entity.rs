//! Entities: addressable records with pending property and association diffs.

use crate::relation::{AssociationChange, AssociationOrigin, Relation};
use crate::{EntityKind, LocalId, Properties, RemoteId};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Handle to an entity owned by a manager.
///
/// References between entities are handles, never pointers: the manager of
/// `kind` resolves `local` to the entity it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub local: LocalId,
}

impl EntityRef {
    pub fn new(kind: EntityKind, local: LocalId) -> Self {
        Self { kind, local }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.local)
    }
}

/// Property-sync state of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No remote id yet; must be created.
    UnsyncedNew,
    /// Remote id present, nothing pending.
    Synced,
    /// Remote id present, properties pending.
    UnsyncedDirty,
}

/// Receives index maintenance callbacks around a property write.
pub trait Indexer {
    /// Called with the entity as it was before `property` changes.
    fn remove_indexes_for(&mut self, property: &str, entity: &Entity);
    /// Called with the entity after `property` changed.
    fn add_indexes_for(&mut self, property: &str, entity: &Entity);
}

/// An [`Indexer`] that keeps nothing up to date.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIndexer;

impl Indexer for NoIndexer {
    fn remove_indexes_for(&mut self, _property: &str, _entity: &Entity) {}
    fn add_indexes_for(&mut self, _property: &str, _entity: &Entity) {}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    local: LocalId,
    id: Option<RemoteId>,
    kind: EntityKind,
    data: Properties,
    /// Value of each pending property before the first write of this cycle
    changes: BTreeMap<String, Option<Value>>,
    associations: BTreeMap<EntityKind, Relation>,
}

impl Entity {
    /// An entity converted from a downloaded record. Nothing is pending.
    pub fn from_remote(
        local: LocalId,
        id: impl Into<RemoteId>,
        kind: EntityKind,
        data: Properties,
    ) -> Self {
        Self {
            local,
            id: Some(id.into()),
            kind,
            data,
            changes: BTreeMap::new(),
            associations: BTreeMap::new(),
        }
    }

    /// A locally constructed entity. All of its data has never been synced,
    /// so every property is pending.
    pub fn new_local(local: LocalId, kind: EntityKind, data: Properties) -> Self {
        let changes = data.keys().map(|k| (k.clone(), None)).collect();
        Self {
            local,
            id: None,
            kind,
            data,
            changes,
            associations: BTreeMap::new(),
        }
    }

    pub fn local_id(&self) -> LocalId {
        self.local
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind, self.local)
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn data(&self) -> &Properties {
        &self.data
    }

    pub fn get(&self, property: &str) -> Option<&Value> {
        self.data.get(property)
    }

    /// String value of a property, `""` when absent or not a string.
    pub fn get_str(&self, property: &str) -> &str {
        self.get(property).and_then(Value::as_str).unwrap_or("")
    }

    /// Write a property and return its previous value.
    ///
    /// The diff keeps the value from before the first write of the current
    /// cycle; later writes only change the data.
    pub fn set(&mut self, property: impl Into<String>, value: Value) -> Option<Value> {
        let property = property.into();
        let old = self.data.insert(property.clone(), value);
        self.changes.entry(property).or_insert_with(|| old.clone());
        old
    }

    /// Like [`set`](Self::set), keeping the indexer's derived lookups live.
    pub fn set_indexed(
        &mut self,
        property: impl Into<String>,
        value: Value,
        indexer: &mut dyn Indexer,
    ) -> Option<Value> {
        let property = property.into();
        indexer.remove_indexes_for(&property, self);
        let old = self.set(property.clone(), value);
        indexer.add_indexes_for(&property, self);
        old
    }

    pub fn has_property_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Pending properties, mapped to their value before the cycle started.
    pub fn property_changes(&self) -> &BTreeMap<String, Option<Value>> {
        &self.changes
    }

    /// Pending properties with their current values.
    pub fn changed_properties(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.changes.keys().map(|k| {
            let value = self.data.get(k).unwrap_or(&Value::Null);
            (k.as_str(), value)
        })
    }

    pub fn apply_property_changes(&mut self) {
        self.changes.clear();
    }

    pub fn sync_state(&self) -> SyncState {
        match (&self.id, self.has_property_changes()) {
            (None, _) => SyncState::UnsyncedNew,
            (Some(_), false) => SyncState::Synced,
            (Some(_), true) => SyncState::UnsyncedDirty,
        }
    }

    /// Assign the id recovered from a creation response. Ids are assigned
    /// exactly once; later calls are ignored and return `false`.
    pub(crate) fn assign_id(&mut self, id: RemoteId) -> bool {
        if self.id.is_some() {
            return false;
        }
        self.id = Some(id);
        true
    }

    /// Replace data with a fresh download of the same remote record.
    pub(crate) fn replace_remote_data(&mut self, data: Properties) {
        self.data = data;
        self.changes.clear();
    }

    /// Relation to entities of `kind`, if any link was ever staged.
    pub fn relation(&self, kind: EntityKind) -> Option<&Relation> {
        self.associations.get(&kind)
    }

    /// Currently linked entities of `kind`, staged changes included.
    pub fn associated(&self, kind: EntityKind) -> Vec<EntityRef> {
        self.relation(kind)
            .map(|r| r.iter().collect())
            .unwrap_or_default()
    }

    pub fn is_associated_with(&self, other: &EntityRef) -> bool {
        self.relation(other.kind)
            .is_some_and(|r| r.contains(other))
    }

    /// Link this entity to `other` on this side only.
    pub fn add_association(&mut self, other: EntityRef, origin: AssociationOrigin) {
        self.associations
            .entry(other.kind)
            .or_default()
            .add(other, origin);
    }

    /// Stage removal of the link to `other` on this side only.
    pub fn remove_association(&mut self, other: EntityRef) {
        if let Some(relation) = self.associations.get_mut(&other.kind) {
            relation.remove(other);
        }
    }

    /// Link `other` as the reciprocal end of a change `other` initiated.
    pub(crate) fn add_reciprocal_association(&mut self, other: EntityRef) {
        self.associations
            .entry(other.kind)
            .or_default()
            .add_reciprocal(other);
    }

    pub(crate) fn remove_reciprocal_association(&mut self, other: EntityRef) {
        if let Some(relation) = self.associations.get_mut(&other.kind) {
            relation.remove_reciprocal(other);
        }
    }

    /// Stage removal of every link to entities of `kind`.
    pub fn clear_associations(&mut self, kind: EntityKind) {
        if let Some(relation) = self.associations.get_mut(&kind) {
            relation.clear();
        }
    }

    pub fn has_association_changes(&self) -> bool {
        self.associations.values().any(Relation::has_changes)
    }

    pub fn association_changes(&self) -> Vec<AssociationChange> {
        self.associations
            .values()
            .flat_map(Relation::changes)
            .collect()
    }

    pub fn apply_association_changes(&mut self) {
        for relation in self.associations.values_mut() {
            relation.apply();
        }
    }

    /// Commit the staged change for `other` alone.
    pub(crate) fn apply_association_change(&mut self, other: &EntityRef) {
        if let Some(relation) = self.associations.get_mut(&other.kind) {
            relation.apply_where(|o| o == other);
        }
    }

    pub(crate) fn forget_association(&mut self, other: &EntityRef) {
        if let Some(relation) = self.associations.get_mut(&other.kind) {
            relation.forget(other);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{properties, AssociationOp};
    use serde_json::json;

    fn person() -> Entity {
        Entity::from_remote(
            1,
            "123",
            EntityKind::Contact,
            properties(json!({"age": 20, "name": "Bob"})),
        )
    }

    #[test]
    fn has_dynamic_data() {
        let mut p = person();
        assert!(!p.has_property_changes());
        assert_eq!(p.get("age"), Some(&json!(20)));
        assert_eq!(p.get_str("name"), "Bob");

        p.set("age", json!(21));
        assert!(p.has_property_changes());
        assert_eq!(p.get("age"), Some(&json!(21)));
        assert_eq!(p.get_str("name"), "Bob");

        p.set("name", json!("Bobby"));
        assert!(p.has_property_changes());
        assert_eq!(p.get("age"), Some(&json!(21)));
        assert_eq!(p.get_str("name"), "Bobby");

        p.apply_property_changes();
        assert!(!p.has_property_changes());
        assert_eq!(p.get("age"), Some(&json!(21)));
        assert_eq!(p.get_str("name"), "Bobby");
    }

    #[test]
    fn diff_keeps_first_old_value() {
        let mut p = person();
        p.set("age", json!(21));
        p.set("age", json!(22));
        p.set("age", json!(23));

        assert_eq!(p.property_changes().get("age"), Some(&Some(json!(20))));
        assert_eq!(p.get("age"), Some(&json!(23)));
    }

    #[test]
    fn changed_properties_report_current_values() {
        let mut p = person();
        p.set("name", json!("Robert"));
        p.set("nickname", json!("Rob"));

        let changed: Vec<_> = p.changed_properties().collect();
        assert_eq!(
            changed,
            vec![("name", &json!("Robert")), ("nickname", &json!("Rob"))]
        );
        assert_eq!(p.property_changes().get("nickname"), Some(&None));
    }

    #[test]
    fn local_entities_are_pending_creation() {
        let e = Entity::new_local(
            7,
            EntityKind::Company,
            properties(json!({"domain": "acme.com"})),
        );

        assert_eq!(e.id(), None);
        assert!(e.has_property_changes());
        assert_eq!(e.sync_state(), SyncState::UnsyncedNew);
    }

    #[test]
    fn state_machine() {
        let mut e = Entity::new_local(
            7,
            EntityKind::Company,
            properties(json!({"domain": "acme.com"})),
        );

        assert!(e.assign_id("555".into()));
        e.apply_property_changes();
        assert_eq!(e.sync_state(), SyncState::Synced);

        e.set("domain", json!("acme.org"));
        assert_eq!(e.sync_state(), SyncState::UnsyncedDirty);

        e.apply_property_changes();
        assert_eq!(e.sync_state(), SyncState::Synced);

        assert!(!e.assign_id("556".into()));
        assert_eq!(e.id(), Some("555"));
    }

    #[derive(Default)]
    struct RecordingIndexer {
        events: Vec<(String, String, Value)>,
    }

    impl Indexer for RecordingIndexer {
        fn remove_indexes_for(&mut self, property: &str, entity: &Entity) {
            let value = entity.get(property).cloned().unwrap_or(Value::Null);
            self.events.push(("remove".into(), property.into(), value));
        }

        fn add_indexes_for(&mut self, property: &str, entity: &Entity) {
            let value = entity.get(property).cloned().unwrap_or(Value::Null);
            self.events.push(("add".into(), property.into(), value));
        }
    }

    #[test]
    fn set_indexed_notifies_before_and_after() {
        let mut p = person();
        let mut indexer = RecordingIndexer::default();

        p.set_indexed("name", json!("Bobby"), &mut indexer);

        assert_eq!(
            indexer.events,
            vec![
                ("remove".into(), "name".into(), json!("Bob")),
                ("add".into(), "name".into(), json!("Bobby")),
            ]
        );
        assert!(p.has_property_changes());
    }

    #[test]
    fn association_changes_follow_relation() {
        let mut p = person();
        let company = EntityRef::new(EntityKind::Company, 9);
        let other = EntityRef::new(EntityKind::Company, 10);

        p.add_association(company, AssociationOrigin::Downloaded);
        assert!(!p.has_association_changes());
        assert!(p.is_associated_with(&company));

        p.add_association(other, AssociationOrigin::LocalPending);
        p.remove_association(company);
        assert!(p.has_association_changes());

        let mut changes = p.association_changes();
        changes.sort_by_key(|c| c.other);
        assert_eq!(changes[0].op, AssociationOp::Remove);
        assert_eq!(changes[1].op, AssociationOp::Add);

        p.apply_association_changes();
        assert!(!p.has_association_changes());
        assert_eq!(p.associated(EntityKind::Company), vec![other]);
    }

    // Property-based tests using proptest
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_diff_keeps_value_before_first_write(
                initial in any::<i64>(),
                writes in prop::collection::vec(any::<i64>(), 1..20),
            ) {
                let mut e = Entity::from_remote(
                    1,
                    "1",
                    EntityKind::Deal,
                    properties(json!({"amount": initial})),
                );

                for value in &writes {
                    e.set("amount", json!(value));
                }

                prop_assert_eq!(e.property_changes().get("amount"), Some(&Some(json!(initial))));
                prop_assert_eq!(e.get("amount"), Some(&json!(writes[writes.len() - 1])));

                e.apply_property_changes();
                prop_assert!(!e.has_property_changes());
            }
        }
    }
}
