use async_trait::async_trait;
use bson::Document;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::{sleep, Duration};

use crate::store::{CollectionOptions, Connector, LogCollection, LogDatabase, StoreError};

/// In-process document store.
///
/// Useful for measuring the overhead of the pipeline without any external
/// I/O, and for tests that inspect what was provisioned and written.
/// Every store operation is counted; failures can be injected per stage.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<MemoryState>,
    opens: AtomicU64,
    list_calls: AtomicU64,
    create_calls: AtomicU64,
    index_calls: AtomicU64,
    insert_calls: AtomicU64,
}

#[derive(Default)]
struct MemoryState {
    /// Keyed by `database.collection`.
    collections: BTreeMap<String, MemoryCollection>,
    fail_open: Option<String>,
    fail_insert: Option<String>,
    create_delay: Option<Duration>,
}

/// Snapshot of one stored collection.
#[derive(Debug, Clone, Default)]
pub struct MemoryCollection {
    pub options: CollectionOptions,
    pub indexes: Vec<Vec<String>>,
    pub documents: Vec<Document>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every subsequent `open` fail with `message`.
    pub fn fail_open(&self, message: impl Into<String>) {
        self.state().fail_open = Some(message.into());
    }

    /// Make every subsequent insert fail with `message`.
    pub fn fail_insert(&self, message: impl Into<String>) {
        self.state().fail_insert = Some(message.into());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.fail_open = None;
        state.fail_insert = None;
    }

    /// Sleep this long inside `create_collection`, widening the window in
    /// which concurrent provisioning would race.
    pub fn set_create_delay(&self, delay: Duration) {
        self.state().create_delay = Some(delay);
    }

    /// Register an existing collection, as if created by an earlier run.
    pub fn seed_collection(&self, database: &str, collection: &str) {
        self.state()
            .collections
            .entry(key(database, collection))
            .or_default();
    }

    pub fn collection(&self, database: &str, collection: &str) -> Option<MemoryCollection> {
        self.state().collections.get(&key(database, collection)).cloned()
    }

    pub fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        self.collection(database, collection)
            .map(|c| c.documents)
            .unwrap_or_default()
    }

    pub fn open_calls(&self) -> u64 {
        self.inner.opens.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> u64 {
        self.inner.list_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> u64 {
        self.inner.create_calls.load(Ordering::SeqCst)
    }

    pub fn index_calls(&self) -> u64 {
        self.inner.index_calls.load(Ordering::SeqCst)
    }

    pub fn insert_calls(&self) -> u64 {
        self.inner.insert_calls.load(Ordering::SeqCst)
    }
}

fn key(database: &str, collection: &str) -> String {
    format!("{}.{}", database, collection)
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(
        &self,
        connection_string: &str,
        database: &str,
    ) -> Result<Box<dyn LogDatabase>, StoreError> {
        self.inner.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.state().fail_open.clone() {
            return Err(StoreError::Backend(message));
        }
        if connection_string.is_empty() {
            return Err(StoreError::InvalidConnectionString(connection_string.to_string()));
        }
        Ok(Box::new(MemoryDatabase {
            connector: self.clone(),
            database: database.to_string(),
        }))
    }
}

struct MemoryDatabase {
    connector: MemoryConnector,
    database: String,
}

#[async_trait]
impl LogDatabase for MemoryDatabase {
    async fn list_collection_names(&self) -> Result<Vec<String>, StoreError> {
        self.connector.inner.list_calls.fetch_add(1, Ordering::SeqCst);
        let prefix = format!("{}.", self.database);
        Ok(self
            .connector
            .state()
            .collections
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    async fn create_collection(
        &self,
        name: &str,
        options: CollectionOptions,
    ) -> Result<(), StoreError> {
        self.connector.inner.create_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.connector.state().create_delay;
        if let Some(delay) = delay {
            sleep(delay).await;
        }

        let mut state = self.connector.state();
        let k = key(&self.database, name);
        if state.collections.contains_key(&k) {
            return Err(StoreError::Backend(format!("collection already exists: {}", k)));
        }
        state.collections.insert(
            k,
            MemoryCollection {
                options,
                ..MemoryCollection::default()
            },
        );
        Ok(())
    }

    async fn create_index(&self, name: &str, keys: &[&str]) -> Result<(), StoreError> {
        self.connector.inner.index_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.connector.state();
        let collection = state
            .collections
            .entry(key(&self.database, name))
            .or_default();
        collection.indexes.push(keys.iter().map(|k| k.to_string()).collect());
        Ok(())
    }

    fn collection(&self, name: &str) -> Arc<dyn LogCollection> {
        Arc::new(MemoryLogCollection {
            connector: self.connector.clone(),
            key: key(&self.database, name),
        })
    }
}

struct MemoryLogCollection {
    connector: MemoryConnector,
    key: String,
}

impl MemoryLogCollection {
    fn insert(&self, documents: Vec<Document>) -> Result<(), StoreError> {
        self.connector.inner.insert_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.connector.state();
        if let Some(message) = state.fail_insert.clone() {
            return Err(StoreError::Backend(message));
        }
        // Writing to a missing collection creates it implicitly, uncapped.
        state
            .collections
            .entry(self.key.clone())
            .or_default()
            .documents
            .extend(documents);
        Ok(())
    }
}

#[async_trait]
impl LogCollection for MemoryLogCollection {
    async fn insert_many(&self, documents: Vec<Document>) -> Result<(), StoreError> {
        self.insert(documents)
    }

    async fn insert_one(&self, document: Document) -> Result<(), StoreError> {
        self.insert(vec![document])
    }
}
