//! Application workflows built on the engine.

pub mod companies;
pub mod events;

use crate::config::Config;
use crate::error::Result;
use hubsync_engine::kinds::{CompanyKind, ContactKind, DealKind};
use hubsync_engine::{Downloader, EntityDatabase, EntityManager, KindAdapter, Uploader};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;

/// Database with a manager for every built-in kind.
pub fn build_database(
    config: &Config,
    downloader: Arc<dyn Downloader>,
    uploader: Arc<dyn Uploader>,
) -> EntityDatabase {
    let manager = |adapter: Arc<dyn KindAdapter>| {
        let kind = adapter.kind();
        EntityManager::new(adapter, downloader.clone(), uploader.clone())
            .with_batch_policy(config.batch_policy(kind))
    };

    EntityDatabase::new()
        .with_manager(manager(Arc::new(CompanyKind::new())))
        .with_manager(manager(Arc::new(ContactKind::new(config.contact.clone()))))
        .with_manager(manager(Arc::new(DealKind::new(config.deal.clone()))))
}

/// Read a JSON input file.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use hubsync_engine::memory::MemoryCrm;
    use hubsync_engine::EntityKind;

    #[test]
    fn every_kind_gets_a_configured_manager() {
        let crm = Arc::new(MemoryCrm::new());
        let db = build_database(&test_config(), crm.clone(), crm);

        for kind in EntityKind::ALL {
            assert!(db.manager(kind).is_ok());
        }
        let contacts = db.manager(EntityKind::Contact).unwrap();
        assert_eq!(contacts.batch_policy().entity_batch_size, 10);
    }

    #[test]
    fn missing_input_file_is_an_io_error() {
        let result: Result<Vec<u8>> = load_json(Path::new("does/not/exist.json"));
        assert!(matches!(result, Err(crate::error::AppError::Io(_))));
    }
}
