//! In-memory remote entity store.
//!
//! [`MemoryCrm`] implements both transport traits over plain maps, assigns ids
//! on create, keeps associations bidirectional and records every call. Tests
//! can inject a failure, reverse response order or replace the next creation
//! response.

use crate::error::TransportResult;
use crate::transport::{Downloader, Progress, Uploader};
use crate::{
    Association, EntityKind, EntityUpdate, ExistingEntity, FullEntity, NewEntity,
    OutgoingProperties, RelativeAssociation, RemoteId, RemoteProperties, TransportError,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

type Key = (EntityKind, RemoteId);

/// One call received by a [`MemoryCrm`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Download {
        kind: EntityKind,
    },
    Create {
        kind: EntityKind,
        count: usize,
    },
    Update {
        kind: EntityKind,
        ids: Vec<RemoteId>,
    },
    CreateAssociations {
        from: EntityKind,
        to: EntityKind,
        pairs: Vec<(RemoteId, RemoteId)>,
    },
    DeleteAssociations {
        from: EntityKind,
        to: EntityKind,
        pairs: Vec<(RemoteId, RemoteId)>,
    },
}

impl RemoteCall {
    pub fn is_write(&self) -> bool {
        !matches!(self, RemoteCall::Download { .. })
    }
}

#[derive(Debug)]
struct State {
    records: BTreeMap<EntityKind, BTreeMap<RemoteId, RemoteProperties>>,
    links: BTreeSet<(Key, Key)>,
    next_id: u64,
    calls: Vec<RemoteCall>,
    fail_next: Option<TransportError>,
    reverse_responses: bool,
    create_override: Option<Vec<ExistingEntity>>,
}

#[derive(Debug)]
pub struct MemoryCrm {
    state: Mutex<State>,
}

impl Default for MemoryCrm {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCrm {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                records: BTreeMap::new(),
                links: BTreeSet::new(),
                next_id: 1001,
                calls: Vec::new(),
                fail_next: None,
                reverse_responses: false,
                create_override: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a remote record.
    pub fn insert(&self, kind: EntityKind, id: &str, properties: &[(&str, &str)]) {
        let props = properties
            .iter()
            .map(|(k, v)| (k.to_string(), Some(v.to_string())))
            .collect();
        self.state()
            .records
            .entry(kind)
            .or_default()
            .insert(id.to_string(), props);
    }

    /// Seed a remote association, stored on both sides.
    pub fn link(&self, a: (EntityKind, &str), b: (EntityKind, &str)) {
        let a = (a.0, a.1.to_string());
        let b = (b.0, b.1.to_string());
        let mut state = self.state();
        state.links.insert((a.clone(), b.clone()));
        state.links.insert((b, a));
    }

    pub fn record(&self, kind: EntityKind, id: &str) -> Option<RemoteProperties> {
        self.state()
            .records
            .get(&kind)
            .and_then(|records| records.get(id))
            .cloned()
    }

    /// All records of `kind` as `(id, properties)`, ordered by id.
    pub fn records(&self, kind: EntityKind) -> Vec<(RemoteId, RemoteProperties)> {
        self.state()
            .records
            .get(&kind)
            .map(|records| records.iter().map(|(id, p)| (id.clone(), p.clone())).collect())
            .unwrap_or_default()
    }

    pub fn is_linked(&self, a: (EntityKind, &str), b: (EntityKind, &str)) -> bool {
        let key = ((a.0, a.1.to_string()), (b.0, b.1.to_string()));
        self.state().links.contains(&key)
    }

    /// Number of stored links, each counted once per side.
    pub fn link_count(&self) -> usize {
        self.state().links.len()
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    pub fn write_calls(&self) -> Vec<RemoteCall> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.is_write())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Make the next call fail with `error`.
    pub fn fail_next(&self, error: TransportError) {
        self.state().fail_next = Some(error);
    }

    /// Return creation and update results in reverse order.
    pub fn set_reverse_responses(&self, reverse: bool) {
        self.state().reverse_responses = reverse;
    }

    /// Replace the response of the next create call. Records are still
    /// stored under freshly assigned ids.
    pub fn override_next_create(&self, response: Vec<ExistingEntity>) {
        self.state().create_override = Some(response);
    }
}

impl State {
    fn begin(&mut self, call: RemoteCall) -> TransportResult<()> {
        self.calls.push(call);
        match self.fail_next.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn allocate_id(&mut self) -> RemoteId {
        let id = self.next_id;
        self.next_id += 1;
        id.to_string()
    }

    fn finish(&self, mut results: Vec<ExistingEntity>) -> Vec<ExistingEntity> {
        if self.reverse_responses {
            results.reverse();
        }
        results
    }
}

fn remote_properties(props: OutgoingProperties) -> RemoteProperties {
    props.into_iter().map(|(k, v)| (k, Some(v))).collect()
}

fn pairs(inputs: &[Association]) -> Vec<(RemoteId, RemoteId)> {
    inputs
        .iter()
        .map(|a| (a.from_id.clone(), a.to_id.clone()))
        .collect()
}

#[async_trait]
impl Downloader for MemoryCrm {
    async fn download_entities(
        &self,
        progress: &dyn Progress,
        kind: EntityKind,
        _api_properties: &[String],
        associations: &[EntityKind],
    ) -> TransportResult<Vec<FullEntity>> {
        let mut state = self.state();
        state.begin(RemoteCall::Download { kind })?;

        let records = state.records.get(&kind).cloned().unwrap_or_default();
        progress.set_count(records.len());

        let entities = records
            .into_iter()
            .map(|(id, properties)| {
                let me = (kind, id.clone());
                let links = state
                    .links
                    .iter()
                    .filter(|(from, to)| *from == me && associations.contains(&to.0))
                    .map(|(_, (other, other_id))| RelativeAssociation::new(*other, other_id.clone()))
                    .collect();
                progress.tick(&id);
                FullEntity {
                    id,
                    properties,
                    associations: links,
                }
            })
            .collect();
        Ok(entities)
    }
}

#[async_trait]
impl Uploader for MemoryCrm {
    async fn create_entities(
        &self,
        kind: EntityKind,
        entities: Vec<NewEntity>,
    ) -> TransportResult<Vec<ExistingEntity>> {
        let mut state = self.state();
        state.begin(RemoteCall::Create {
            kind,
            count: entities.len(),
        })?;

        let mut results = Vec::with_capacity(entities.len());
        for entity in entities {
            let id = state.allocate_id();
            let properties = remote_properties(entity.properties);
            state
                .records
                .entry(kind)
                .or_default()
                .insert(id.clone(), properties.clone());
            results.push(ExistingEntity { id, properties });
        }

        if let Some(response) = state.create_override.take() {
            return Ok(response);
        }
        Ok(state.finish(results))
    }

    async fn update_entities(
        &self,
        kind: EntityKind,
        entities: Vec<EntityUpdate>,
    ) -> TransportResult<Vec<ExistingEntity>> {
        let mut state = self.state();
        state.begin(RemoteCall::Update {
            kind,
            ids: entities.iter().map(|e| e.id.clone()).collect(),
        })?;

        let mut results = Vec::with_capacity(entities.len());
        for update in entities {
            let record = state
                .records
                .get_mut(&kind)
                .and_then(|records| records.get_mut(&update.id))
                .ok_or_else(|| {
                    TransportError::Request(format!("{kind} {} does not exist", update.id))
                })?;
            record.extend(remote_properties(update.properties));
            results.push(ExistingEntity {
                id: update.id,
                properties: record.clone(),
            });
        }
        Ok(state.finish(results))
    }

    async fn create_associations(
        &self,
        from: EntityKind,
        to: EntityKind,
        inputs: Vec<Association>,
    ) -> TransportResult<()> {
        let mut state = self.state();
        state.begin(RemoteCall::CreateAssociations {
            from,
            to,
            pairs: pairs(&inputs),
        })?;

        for input in inputs {
            let a = (from, input.from_id);
            let b = (to, input.to_id);
            state.links.insert((a.clone(), b.clone()));
            state.links.insert((b, a));
        }
        Ok(())
    }

    async fn delete_associations(
        &self,
        from: EntityKind,
        to: EntityKind,
        inputs: Vec<Association>,
    ) -> TransportResult<()> {
        let mut state = self.state();
        state.begin(RemoteCall::DeleteAssociations {
            from,
            to,
            pairs: pairs(&inputs),
        })?;

        for input in inputs {
            let a = (from, input.from_id);
            let b = (to, input.to_id);
            state.links.remove(&(a.clone(), b.clone()));
            state.links.remove(&(b, a));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NoProgress;

    #[tokio::test]
    async fn download_returns_requested_associations() {
        let crm = MemoryCrm::new();
        crm.insert(EntityKind::Contact, "1", &[("email", "jo@acme.com")]);
        crm.insert(EntityKind::Company, "7", &[("domain", "acme.com")]);
        crm.insert(EntityKind::Deal, "9", &[]);
        crm.link((EntityKind::Contact, "1"), (EntityKind::Company, "7"));
        crm.link((EntityKind::Contact, "1"), (EntityKind::Deal, "9"));

        let contacts = crm
            .download_entities(&NoProgress, EntityKind::Contact, &[], &[EntityKind::Company])
            .await
            .unwrap();

        assert_eq!(contacts.len(), 1);
        assert_eq!(
            contacts[0].associations,
            vec![RelativeAssociation::new(EntityKind::Company, "7")]
        );
    }

    #[tokio::test]
    async fn create_assigns_ids_and_honors_reverse() {
        let crm = MemoryCrm::new();
        crm.set_reverse_responses(true);
        let new = |d: &str| NewEntity {
            properties: [("domain".to_string(), d.to_string())].into(),
        };

        let created = crm
            .create_entities(EntityKind::Company, vec![new("a.com"), new("b.com")])
            .await
            .unwrap();

        assert_eq!(created[0].id, "1002");
        assert_eq!(created[0].property("domain"), "b.com");
        assert_eq!(crm.records(EntityKind::Company).len(), 2);
    }

    #[tokio::test]
    async fn injected_failure_is_one_shot() {
        let crm = MemoryCrm::new();
        crm.fail_next(TransportError::Request("rate limited".into()));

        let first = crm
            .create_associations(EntityKind::Deal, EntityKind::Company, vec![])
            .await;
        let second = crm
            .create_associations(EntityKind::Deal, EntityKind::Company, vec![])
            .await;

        assert!(first.is_err());
        assert!(second.is_ok());
        assert_eq!(crm.calls().len(), 2);
    }

    #[tokio::test]
    async fn associations_are_bidirectional() {
        let crm = MemoryCrm::new();
        let input = Association {
            from_id: "1".into(),
            to_id: "2".into(),
            to_kind: EntityKind::Company,
        };

        crm.create_associations(EntityKind::Contact, EntityKind::Company, vec![input.clone()])
            .await
            .unwrap();
        assert!(crm.is_linked((EntityKind::Company, "2"), (EntityKind::Contact, "1")));

        crm.delete_associations(EntityKind::Contact, EntityKind::Company, vec![input])
            .await
            .unwrap();
        assert_eq!(crm.link_count(), 0);
    }
}
