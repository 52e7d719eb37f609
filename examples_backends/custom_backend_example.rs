use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};
use tracing_mongo_sink::{
    config::MongoTargetConfig,
    init::init_tracing,
    store::{CollectionOptions, Connector, LogCollection, LogDatabase, StoreError},
    target::MongoTarget,
};
use tracing_mongo_sink::bson::Document;

/// Example of integrating a completely custom document store by
/// implementing the store traits directly. Imagine this talks to some
/// MongoDB-compatible service for which the driver is not an option.
struct PrintConnector;

struct PrintDatabase {
    name: String,
}

struct PrintCollection {
    name: String,
}

#[async_trait]
impl Connector for PrintConnector {
    async fn open(&self, _connection_string: &str, database: &str) -> Result<Box<dyn LogDatabase>, StoreError> {
        Ok(Box::new(PrintDatabase { name: database.to_string() }))
    }
}

#[async_trait]
impl LogDatabase for PrintDatabase {
    async fn list_collection_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(Vec::new())
    }

    async fn create_collection(&self, name: &str, options: CollectionOptions) -> Result<(), StoreError> {
        println!("[print-db] create {}.{} {:?}", self.name, name, options);
        Ok(())
    }

    async fn create_index(&self, name: &str, keys: &[&str]) -> Result<(), StoreError> {
        println!("[print-db] index {}.{} on {:?}", self.name, name, keys);
        Ok(())
    }

    fn collection(&self, name: &str) -> Arc<dyn LogCollection> {
        Arc::new(PrintCollection { name: format!("{}.{}", self.name, name) })
    }
}

#[async_trait]
impl LogCollection for PrintCollection {
    async fn insert_many(&self, documents: Vec<Document>) -> Result<(), StoreError> {
        for document in documents {
            println!("[print-db] {} <- {}", self.name, document);
        }
        Ok(())
    }

    async fn insert_one(&self, document: Document) -> Result<(), StoreError> {
        println!("[print-db] {} <- {}", self.name, document);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let target = MongoTarget::with_connector(
        MongoTargetConfig::for_process(Some("custom_backend")),
        Arc::new(PrintConnector),
    );
    init_tracing(Arc::new(target))?;

    info!("custom backend example started");
    error!(db = "print-db", "simulated error sent via custom backend");

    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    Ok(())
}
