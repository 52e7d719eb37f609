use async_trait::async_trait;
use bson::{Bson, Document};
use mongodb::{Client, Collection, Database, IndexModel};
use std::sync::Arc;

use crate::store::{CollectionOptions, Connector, LogCollection, LogDatabase, StoreError};

/// [`Connector`] backed by the official MongoDB driver.
///
/// Every `open` builds a fresh [`Client`]; the provisioner only calls it
/// once per configuration snapshot and the resulting collection handle
/// keeps the client's connection pool alive.
#[derive(Clone, Debug, Default)]
pub struct MongoConnector;

#[async_trait]
impl Connector for MongoConnector {
    async fn open(
        &self,
        connection_string: &str,
        database: &str,
    ) -> Result<Box<dyn LogDatabase>, StoreError> {
        let client = Client::with_uri_str(connection_string).await?;
        Ok(Box::new(MongoDatabase {
            database: client.database(database),
        }))
    }
}

pub struct MongoDatabase {
    database: Database,
}

#[async_trait]
impl LogDatabase for MongoDatabase {
    async fn list_collection_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.database.list_collection_names().await?)
    }

    async fn create_collection(
        &self,
        name: &str,
        options: CollectionOptions,
    ) -> Result<(), StoreError> {
        let mut create = self.database.create_collection(name).capped(options.capped);
        if options.capped {
            if let Some(size) = options.max_size {
                create = create.size(size);
            }
            if let Some(max) = options.max_documents {
                create = create.max(max);
            }
        }
        create.await?;
        Ok(())
    }

    async fn create_index(&self, name: &str, keys: &[&str]) -> Result<(), StoreError> {
        let keys: Document = keys
            .iter()
            .map(|key| (key.to_string(), Bson::Int32(1)))
            .collect();
        let index = IndexModel::builder().keys(keys).build();
        self.database
            .collection::<Document>(name)
            .create_index(index)
            .await?;
        Ok(())
    }

    fn collection(&self, name: &str) -> Arc<dyn LogCollection> {
        Arc::new(MongoLogCollection {
            collection: self.database.collection(name),
        })
    }
}

#[derive(Clone)]
pub struct MongoLogCollection {
    collection: Collection<Document>,
}

#[async_trait]
impl LogCollection for MongoLogCollection {
    async fn insert_many(&self, documents: Vec<Document>) -> Result<(), StoreError> {
        self.collection.insert_many(documents).await?;
        Ok(())
    }

    async fn insert_one(&self, document: Document) -> Result<(), StoreError> {
        self.collection.insert_one(document).await?;
        Ok(())
    }
}
