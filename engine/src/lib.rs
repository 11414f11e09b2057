//! # hubsync engine
//!
//! Reconciles a local in-memory model of CRM entities (deals, companies,
//! contacts) against a remote entity store that is only reachable through a
//! rate-limited, batch-oriented API.
//!
//! ## Core Concepts
//!
//! ### Entities
//!
//! An [`Entity`] holds:
//! - An optional remote id (absent until the remote service creates it)
//! - An immutable [`EntityKind`]
//! - Property data as JSON values
//! - A pending property diff (what must be pushed on the next sync)
//! - One [`Relation`] per related kind, with staged additions and removals
//!
//! ### Managers
//!
//! An [`EntityManager`] owns every entity of one kind together with that
//! kind's [`Index`]es. It downloads remote state through a [`Downloader`],
//! pushes diffs through an [`Uploader`], and re-identifies freshly created
//! records by their business identifiers.
//!
//! Kinds are configuration values: a [`KindAdapter`] supplies the remote
//! property list, the local/remote mapping, the business identifiers and the
//! extra indexes. Built-in adapters live in [`kinds`].
//!
//! ### Database
//!
//! The [`EntityDatabase`] owns one manager per kind and resolves cross-kind
//! references by `(kind, remote id)`, so managers never hold references to
//! each other.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use hubsync_engine::{
//!     kinds::CompanyKind, memory::MemoryCrm, EntityDatabase, EntityKind, EntityManager,
//! };
//! use serde_json::json;
//!
//! # futures::executor::block_on(async {
//! let crm = Arc::new(MemoryCrm::new());
//! let mut db = EntityDatabase::new();
//! db.add_manager(EntityManager::new(
//!     Arc::new(CompanyKind::new()),
//!     crm.clone(),
//!     crm.clone(),
//! ));
//!
//! db.download_all_data().await.unwrap();
//!
//! let acme = db
//!     .manager_mut(EntityKind::Company)
//!     .unwrap()
//!     .create(hubsync_engine::properties(json!({
//!         "domain": "acme.com",
//!         "additionalDomains": [],
//!         "name": "Acme",
//!         "type": null,
//!     })))
//!     .unwrap();
//!
//! let report = db.sync_up_all_entities().await.unwrap();
//! assert_eq!(report.total().created, 1);
//! assert!(db.entity(acme).unwrap().id().is_some());
//! # });
//! ```

pub mod adapter;
pub mod database;
pub mod entity;
pub mod error;
pub mod index;
pub mod kinds;
pub mod manager;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod record;
pub mod relation;
pub mod schema;
pub mod transport;

// Re-export main types at crate root
pub use adapter::KindAdapter;
pub use database::{EntityDatabase, EntityDirectory, EntityLookup, SyncReport};
pub use entity::{Entity, EntityRef, Indexer, NoIndexer, SyncState};
pub use error::{Error, TransportError};
pub use index::{Index, IndexSet, IndexSpec};
pub use manager::{AssociationSync, EntityManager, EntityMut, SyncCounters};
pub use record::{
    Association, EntityKind, EntityUpdate, ExistingEntity, FullEntity, NewEntity,
    RelativeAssociation,
};
pub use relation::{AssociationChange, AssociationOp, AssociationOrigin, Relation};
pub use schema::{FieldDef, FieldType, KindSchema};
pub use transport::{BatchPolicy, Downloader, LoggingProgress, NoProgress, Progress, Uploader};

use std::collections::BTreeMap;

/// Type aliases for clarity
pub type RemoteId = String;
pub type LocalId = u64;
pub type PropertyName = String;

/// Local property data of an entity.
pub type Properties = BTreeMap<PropertyName, serde_json::Value>;

/// Property bag as returned by the remote service (values may be null).
pub type RemoteProperties = BTreeMap<String, Option<String>>;

/// Property bag as sent to the remote service.
pub type OutgoingProperties = BTreeMap<String, String>;

/// Build [`Properties`] from a JSON object literal.
///
/// Non-object values produce an empty map.
pub fn properties(value: serde_json::Value) -> Properties {
    match value {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => Properties::new(),
    }
}
