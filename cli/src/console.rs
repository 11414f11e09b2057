//! Dry-run uploader.
//!
//! Logs every payload instead of writing it. Created records are echoed back
//! with synthetic ids so creation matching runs as it would live.

use async_trait::async_trait;
use hubsync_engine::error::TransportResult;
use hubsync_engine::{
    Association, EntityKind, EntityUpdate, ExistingEntity, NewEntity, OutgoingProperties,
    RemoteProperties, Uploader,
};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

#[derive(Debug, Default)]
pub struct ConsoleUploader {
    next_id: AtomicU64,
}

impl ConsoleUploader {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        format!("console-{n}")
    }
}

fn echoed(properties: OutgoingProperties) -> RemoteProperties {
    properties.into_iter().map(|(k, v)| (k, Some(v))).collect()
}

fn payload<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

#[async_trait]
impl Uploader for ConsoleUploader {
    async fn create_entities(
        &self,
        kind: EntityKind,
        entities: Vec<NewEntity>,
    ) -> TransportResult<Vec<ExistingEntity>> {
        info!(%kind, count = entities.len(), payload = %payload(&entities), "would create");
        Ok(entities
            .into_iter()
            .map(|entity| ExistingEntity {
                id: self.allocate_id(),
                properties: echoed(entity.properties),
            })
            .collect())
    }

    async fn update_entities(
        &self,
        kind: EntityKind,
        entities: Vec<EntityUpdate>,
    ) -> TransportResult<Vec<ExistingEntity>> {
        info!(%kind, count = entities.len(), payload = %payload(&entities), "would update");
        Ok(entities
            .into_iter()
            .map(|update| ExistingEntity {
                id: update.id,
                properties: echoed(update.properties),
            })
            .collect())
    }

    async fn create_associations(
        &self,
        from: EntityKind,
        to: EntityKind,
        inputs: Vec<Association>,
    ) -> TransportResult<()> {
        info!(%from, %to, count = inputs.len(), payload = %payload(&inputs), "would associate");
        Ok(())
    }

    async fn delete_associations(
        &self,
        from: EntityKind,
        to: EntityKind,
        inputs: Vec<Association>,
    ) -> TransportResult<()> {
        info!(%from, %to, count = inputs.len(), payload = %payload(&inputs), "would disassociate");
        Ok(())
    }
}
