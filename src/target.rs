use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::config::MongoTargetConfig;
use crate::document::{to_document, to_documents};
use crate::record::LogRecord;
use crate::repository::LogRepository;
use crate::store::{Connector, StoreError};

/// Log target writing [`LogRecord`]s into a MongoDB collection.
///
/// Every configuration setter invalidates the provisioned collection, so
/// the next write provisions against the new settings.
pub struct MongoTarget {
    repository: Arc<LogRepository>,
    failed_writes: AtomicU64,
}

impl MongoTarget {
    /// Target backed by the MongoDB driver.
    #[cfg(feature = "mongodb")]
    pub fn new(config: MongoTargetConfig) -> Self {
        Self::with_connector(config, Arc::new(crate::mongo::MongoConnector))
    }

    pub fn with_connector(config: MongoTargetConfig, connector: Arc<dyn Connector>) -> Self {
        let target = MongoTarget {
            repository: Arc::new(LogRepository::new(config, connector)),
            failed_writes: AtomicU64::new(0),
        };
        target.initialize();
        target
    }

    /// Host lifecycle hook; drops any provisioning state.
    pub fn initialize(&self) {
        self.repository.reset();
    }

    pub fn repository(&self) -> &Arc<LogRepository> {
        &self.repository
    }

    pub fn config(&self) -> Arc<MongoTargetConfig> {
        self.repository.config()
    }

    /// Number of write cycles whose insert failed.
    pub fn failed_writes(&self) -> u64 {
        self.failed_writes.load(Ordering::Relaxed)
    }

    pub fn set_collection_name(&self, name: impl Into<String>) {
        let name = name.into();
        self.repository.update_config(|c| c.collection_name = name);
    }

    pub fn set_connection_string(&self, connection_string: impl Into<String>) {
        let connection_string = connection_string.into();
        self.repository
            .update_config(|c| c.connection_string = connection_string);
    }

    pub fn set_database_name(&self, name: impl Into<String>) {
        let name = name.into();
        self.repository.update_config(|c| c.database_name = name);
    }

    pub fn set_use_capped_collection(&self, capped: bool) {
        self.repository
            .update_config(|c| c.use_capped_collection = capped);
    }

    pub fn set_capped_collection_size(&self, bytes: u64) {
        self.repository
            .update_config(|c| c.capped_collection_size = bytes);
    }

    pub fn set_capped_collection_max_items(&self, max_items: Option<u64>) {
        self.repository
            .update_config(|c| c.capped_collection_max_items = max_items);
    }

    pub fn set_use_formatted_message(&self, formatted: bool) {
        self.repository
            .update_config(|c| c.use_formatted_message = formatted);
    }

    /// Persist a batch of records with one insert, preserving their order.
    ///
    /// Returns `Ok(())` without writing when the collection could not be
    /// provisioned; an insert error fails only this batch.
    pub async fn write_batch(&self, records: &[LogRecord]) -> Result<(), StoreError> {
        let use_formatted_message = self.repository.config().use_formatted_message;
        let documents = to_documents(records, use_formatted_message);
        let result = self.repository.insert_many(documents).await;
        self.track(records.len(), result)
    }

    pub async fn write_one(&self, record: &LogRecord) -> Result<(), StoreError> {
        let use_formatted_message = self.repository.config().use_formatted_message;
        let document = to_document(record, use_formatted_message);
        let result = self.repository.insert_one(document).await;
        self.track(1, result)
    }

    fn track(&self, records: usize, result: Result<(), StoreError>) -> Result<(), StoreError> {
        if let Err(err) = &result {
            self.failed_writes.fetch_add(1, Ordering::Relaxed);
            warn!(records, error = %err, "log write failed");
        }
        result
    }
}
