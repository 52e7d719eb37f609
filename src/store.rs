use async_trait::async_trait;
use bson::Document;
use std::sync::Arc;

/// Error raised by a document store while provisioning or inserting.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("collection name must not be empty")]
    EmptyCollectionName,

    #[cfg(feature = "mongodb")]
    #[error("mongodb: {0}")]
    Driver(#[from] mongodb::error::Error),

    #[error("{0}")]
    Backend(String),
}

/// Options used when the log collection has to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollectionOptions {
    pub capped: bool,
    /// Maximum size in bytes, only meaningful for capped collections.
    pub max_size: Option<u64>,
    /// Maximum document count, only meaningful for capped collections.
    pub max_documents: Option<u64>,
}

/// Opens databases on a document store.
///
/// Implemented by the MongoDB driver and by [`crate::memory::MemoryConnector`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(
        &self,
        connection_string: &str,
        database: &str,
    ) -> Result<Box<dyn LogDatabase>, StoreError>;
}

/// The database operations needed to provision a log collection.
#[async_trait]
pub trait LogDatabase: Send + Sync {
    async fn list_collection_names(&self) -> Result<Vec<String>, StoreError>;

    async fn create_collection(
        &self,
        name: &str,
        options: CollectionOptions,
    ) -> Result<(), StoreError>;

    /// Build a compound ascending index over `keys` on collection `name`.
    async fn create_index(&self, name: &str, keys: &[&str]) -> Result<(), StoreError>;

    fn collection(&self, name: &str) -> Arc<dyn LogCollection>;
}

/// A provisioned, ready-to-write collection.
#[async_trait]
pub trait LogCollection: Send + Sync {
    /// Insert all documents with one batch call, in order.
    async fn insert_many(&self, documents: Vec<Document>) -> Result<(), StoreError>;

    async fn insert_one(&self, document: Document) -> Result<(), StoreError>;
}
