//! Transport seams: how the engine reaches the remote entity store.
//!
//! The engine never does IO itself. A [`Downloader`] and an [`Uploader`] are
//! injected per manager; the live HTTP client, a dry-run console uploader and
//! the in-memory `MemoryCrm` test fake all implement them.

use crate::error::TransportResult;
use crate::{
    Association, EntityKind, EntityUpdate, ExistingEntity, FullEntity, NewEntity,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Progress sink for long downloads.
pub trait Progress: Send + Sync {
    fn set_count(&self, count: usize);
    fn tick(&self, label: &str);
}

/// Progress sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn set_count(&self, _count: usize) {}
    fn tick(&self, _label: &str) {}
}

/// Progress sink that reports through `tracing`.
#[derive(Debug)]
pub struct LoggingProgress {
    task: String,
    count: AtomicUsize,
    done: AtomicUsize,
}

impl LoggingProgress {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            count: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
        }
    }

    pub fn done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }
}

impl Progress for LoggingProgress {
    fn set_count(&self, count: usize) {
        self.count.store(count, Ordering::Relaxed);
        tracing::debug!(task = %self.task, count, "download started");
    }

    fn tick(&self, label: &str) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        let count = self.count.load(Ordering::Relaxed);
        tracing::debug!(task = %self.task, done, count, label, "download progress");
    }
}

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch every record of `kind`, paging as needed.
    async fn download_entities(
        &self,
        progress: &dyn Progress,
        kind: EntityKind,
        api_properties: &[String],
        associations: &[EntityKind],
    ) -> TransportResult<Vec<FullEntity>>;
}

#[async_trait]
pub trait Uploader: Send + Sync {
    /// Create one batch of records. The response order is unspecified.
    async fn create_entities(
        &self,
        kind: EntityKind,
        entities: Vec<NewEntity>,
    ) -> TransportResult<Vec<ExistingEntity>>;

    async fn update_entities(
        &self,
        kind: EntityKind,
        entities: Vec<EntityUpdate>,
    ) -> TransportResult<Vec<ExistingEntity>>;

    async fn create_associations(
        &self,
        from: EntityKind,
        to: EntityKind,
        inputs: Vec<Association>,
    ) -> TransportResult<()>;

    async fn delete_associations(
        &self,
        from: EntityKind,
        to: EntityKind,
        inputs: Vec<Association>,
    ) -> TransportResult<()>;
}

/// Batch sizes used when pushing one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub entity_batch_size: usize,
    pub association_batch_size: usize,
}

/// Default batch size for entity and association calls.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Contacts have a stricter remote limit on batch writes.
pub const CONTACT_BATCH_SIZE: usize = 10;

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            entity_batch_size: DEFAULT_BATCH_SIZE,
            association_batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl BatchPolicy {
    pub fn for_kind(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Contact => Self {
                entity_batch_size: CONTACT_BATCH_SIZE,
                ..Self::default()
            },
            _ => Self::default(),
        }
    }
}

/// Split `items` into consecutive batches of at most `size` items.
pub fn batches_of<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(size));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(size).collect());
    }
    batches
}
