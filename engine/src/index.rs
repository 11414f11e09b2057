//! Derived key → entity lookups.
//!
//! An [`Index`] maps every key an entity projects to that entity's local id.
//! Indexes are rebuilt wholesale after bulk changes (download, sync) and kept
//! current entry by entry on property writes made through a manager.

use crate::entity::{Entity, Indexer};
use crate::LocalId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Name of the index every manager keeps over remote ids.
pub const ID_INDEX: &str = "id";

type KeysFor = Arc<dyn Fn(&Entity) -> Vec<String> + Send + Sync>;

/// Declares an index: its name, the properties its projection reads, and the
/// projection itself.
#[derive(Clone)]
pub struct IndexSpec {
    name: String,
    depends_on: Vec<String>,
    keys_for: KeysFor,
}

impl IndexSpec {
    pub fn new<F>(name: impl Into<String>, depends_on: &[&str], keys_for: F) -> Self
    where
        F: Fn(&Entity) -> Vec<String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            keys_for: Arc::new(keys_for),
        }
    }

    /// Index over a single string property.
    pub fn by_property(property: &'static str) -> Self {
        Self::new(property, &[property], move |e| {
            vec![e.get_str(property).to_string()]
        })
    }

    /// Index over remote ids.
    pub fn by_id() -> Self {
        Self::new(ID_INDEX, &[], |e| {
            e.id().map(str::to_string).into_iter().collect()
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn depends_on(&self, property: &str) -> bool {
        self.depends_on.iter().any(|p| p == property)
    }

    /// Keys projected by `entity`. Empty keys are never indexed.
    pub fn keys_for(&self, entity: &Entity) -> Vec<String> {
        let mut keys = (self.keys_for)(entity);
        keys.retain(|k| !k.is_empty());
        keys
    }
}

impl fmt::Debug for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexSpec")
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct Index {
    spec: IndexSpec,
    map: HashMap<String, LocalId>,
}

impl Index {
    pub fn new(spec: IndexSpec) -> Self {
        Self {
            spec,
            map: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.spec.name()
    }

    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    pub fn get(&self, key: &str) -> Option<LocalId> {
        self.map.get(key).copied()
    }

    /// Point `key` at `local`. An existing entry for the key is overwritten.
    pub fn add_index(&mut self, key: impl Into<String>, local: LocalId) {
        self.map.insert(key.into(), local);
    }

    pub fn remove_index(&mut self, key: &str) {
        self.map.remove(key);
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn add_indexes_for<'a>(&mut self, entities: impl IntoIterator<Item = &'a Entity>) {
        for entity in entities {
            for key in self.spec.keys_for(entity) {
                self.add_index(key, entity.local_id());
            }
        }
    }

    pub fn remove_indexes_for<'a>(&mut self, entities: impl IntoIterator<Item = &'a Entity>) {
        for entity in entities {
            for key in self.spec.keys_for(entity) {
                self.remove_owned(&key, entity.local_id());
            }
        }
    }

    /// Remove `key` only while it still points at `local`, so a later entity
    /// that took the key over keeps it.
    fn remove_owned(&mut self, key: &str, local: LocalId) {
        if self.get(key) == Some(local) {
            self.map.remove(key);
        }
    }
}

/// All indexes of one manager. The id index is always first.
#[derive(Debug, Clone)]
pub struct IndexSet {
    indexes: Vec<Index>,
}

impl IndexSet {
    pub fn new(specs: impl IntoIterator<Item = IndexSpec>) -> Self {
        let indexes = std::iter::once(IndexSpec::by_id())
            .chain(specs)
            .map(Index::new)
            .collect();
        Self { indexes }
    }

    pub fn by_id(&self) -> &Index {
        &self.indexes[0]
    }

    pub fn get(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Index> {
        self.indexes.iter()
    }

    /// Clear every index and repopulate it from `entities`.
    pub fn rebuild<'a>(&mut self, entities: impl IntoIterator<Item = &'a Entity> + Clone) {
        for index in &mut self.indexes {
            index.clear();
            index.add_indexes_for(entities.clone());
        }
    }

    pub fn add_indexes_for<'a>(&mut self, entities: impl IntoIterator<Item = &'a Entity> + Clone) {
        for index in &mut self.indexes {
            index.add_indexes_for(entities.clone());
        }
    }

    pub fn remove_indexes_for<'a>(
        &mut self,
        entities: impl IntoIterator<Item = &'a Entity> + Clone,
    ) {
        for index in &mut self.indexes {
            index.remove_indexes_for(entities.clone());
        }
    }
}

impl Default for IndexSet {
    fn default() -> Self {
        Self::new([])
    }
}

impl Indexer for IndexSet {
    fn remove_indexes_for(&mut self, property: &str, entity: &Entity) {
        for index in self.indexes.iter_mut().filter(|i| i.spec.depends_on(property)) {
            for key in index.spec.keys_for(entity) {
                index.remove_owned(&key, entity.local_id());
            }
        }
    }

    fn add_indexes_for(&mut self, property: &str, entity: &Entity) {
        for index in self.indexes.iter_mut().filter(|i| i.spec.depends_on(property)) {
            for key in index.spec.keys_for(entity) {
                index.add_index(key, entity.local_id());
            }
        }
    }
}
