use std::sync::Arc;
use tracing::{debug, info};

use crate::config::MongoTargetConfig;
use crate::document::{FIELD_LEVEL, FIELD_LOGGER};
use crate::store::{CollectionOptions, Connector, LogCollection, StoreError};

/// Keys of the compound ascending index built on a new log collection.
pub const LOG_INDEX_KEYS: [&str; 2] = [FIELD_LOGGER, FIELD_LEVEL];

/// Ensures the configured log collection exists and hands out a handle
/// to it.
///
/// The provisioner itself caches nothing; [`crate::repository::LogRepository`]
/// decides when `ensure` runs and remembers its outcome.
#[derive(Clone)]
pub struct CollectionProvisioner {
    connector: Arc<dyn Connector>,
}

impl CollectionProvisioner {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    /// Open the database, create the collection if it is missing (capped
    /// when configured) and index it on `(logger, lvl)`.
    ///
    /// An existing collection is used as is: neither its options nor its
    /// indexes are touched.
    pub async fn ensure(
        &self,
        config: &MongoTargetConfig,
    ) -> Result<Arc<dyn LogCollection>, StoreError> {
        let name = config.collection_name.as_str();
        if name.is_empty() {
            return Err(StoreError::EmptyCollectionName);
        }

        let db = self
            .connector
            .open(&config.connection_string, &config.database_name)
            .await?;

        let exists = db
            .list_collection_names()
            .await?
            .iter()
            .any(|existing| existing == name);

        if exists {
            debug!(database = %config.database_name, collection = name, "log collection already exists");
        } else {
            let options = collection_options(config);
            db.create_collection(name, options).await?;
            db.create_index(name, &LOG_INDEX_KEYS).await?;
            info!(
                database = %config.database_name,
                collection = name,
                capped = options.capped,
                max_size = ?options.max_size,
                max_documents = ?options.max_documents,
                "created log collection"
            );
        }

        Ok(db.collection(name))
    }
}

/// Creation options derived from the configuration; size limits are only
/// passed for capped collections.
pub fn collection_options(config: &MongoTargetConfig) -> CollectionOptions {
    if config.use_capped_collection {
        CollectionOptions {
            capped: true,
            max_size: Some(config.capped_collection_size),
            max_documents: config.capped_collection_max_items,
        }
    } else {
        CollectionOptions::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_CAPPED_COLLECTION_SIZE;
    use crate::memory::MemoryConnector;

    fn config(name: &str) -> MongoTargetConfig {
        MongoTargetConfig::for_process(Some(name))
    }

    #[tokio::test]
    async fn creates_capped_collection_with_index() {
        let store = MemoryConnector::new();
        let provisioner = CollectionProvisioner::new(Arc::new(store.clone()));

        provisioner.ensure(&config("app")).await.unwrap();

        let created = store.collection("logs", "app").unwrap();
        assert_eq!(
            created.options,
            CollectionOptions {
                capped: true,
                max_size: Some(DEFAULT_CAPPED_COLLECTION_SIZE),
                max_documents: None,
            }
        );
        assert_eq!(created.indexes, vec![vec!["logger".to_string(), "lvl".to_string()]]);
        assert_eq!(store.list_calls(), 1);
        assert_eq!(store.create_calls(), 1);
        assert_eq!(store.index_calls(), 1);
    }

    #[tokio::test]
    async fn uncapped_collection_ignores_size_limits() {
        let store = MemoryConnector::new();
        let provisioner = CollectionProvisioner::new(Arc::new(store.clone()));
        let mut cfg = config("app");
        cfg.use_capped_collection = false;
        cfg.capped_collection_max_items = Some(10);

        provisioner.ensure(&cfg).await.unwrap();

        assert_eq!(store.collection("logs", "app").unwrap().options, CollectionOptions::default());
    }

    #[test]
    fn capped_collection_passes_max_items() {
        let mut cfg = config("app");
        cfg.capped_collection_size = 1_000_000;
        cfg.capped_collection_max_items = Some(10_000);

        assert_eq!(
            collection_options(&cfg),
            CollectionOptions {
                capped: true,
                max_size: Some(1_000_000),
                max_documents: Some(10_000),
            }
        );
    }

    #[tokio::test]
    async fn existing_collection_is_not_recreated_or_indexed() {
        let store = MemoryConnector::new();
        store.seed_collection("logs", "app");
        let provisioner = CollectionProvisioner::new(Arc::new(store.clone()));

        provisioner.ensure(&config("app")).await.unwrap();

        assert_eq!(store.create_calls(), 0);
        assert_eq!(store.index_calls(), 0);
        assert!(store.collection("logs", "app").unwrap().indexes.is_empty());
    }

    #[tokio::test]
    async fn empty_collection_name_fails_before_connecting() {
        let store = MemoryConnector::new();
        let provisioner = CollectionProvisioner::new(Arc::new(store.clone()));
        let mut cfg = config("app");
        cfg.collection_name.clear();

        let err = provisioner.ensure(&cfg).await.err().unwrap();

        assert!(matches!(err, StoreError::EmptyCollectionName));
        assert_eq!(store.open_calls(), 0);
    }

    #[tokio::test]
    async fn connection_failure_is_returned() {
        let store = MemoryConnector::new();
        store.fail_open("auth failed");
        let provisioner = CollectionProvisioner::new(Arc::new(store.clone()));

        let err = provisioner.ensure(&config("app")).await.err().unwrap();

        assert_eq!(err.to_string(), "auth failed");
        assert_eq!(store.list_calls(), 0);
    }
}
