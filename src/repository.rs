use bson::Document;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::MongoTargetConfig;
use crate::provision::CollectionProvisioner;
use crate::store::{Connector, LogCollection, StoreError};

/// Provisioning outcome visible to callers, without the handle itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStatus {
    Unresolved,
    Ready,
    Failed,
}

enum Provisioning {
    Unresolved,
    Ready(Arc<dyn LogCollection>),
    Failed(Arc<StoreError>),
}

/// Configuration snapshot; `epoch` changes on every reset.
struct Generation {
    epoch: u64,
    config: Arc<MongoTargetConfig>,
}

/// Provisioning outcome and the epoch it was computed for. A cached value
/// whose epoch differs from the current generation counts as unresolved.
struct Cached {
    epoch: u64,
    state: Provisioning,
}

/// Owns the log collection handle for the current configuration.
///
/// The collection is provisioned lazily by the first insert. Success and
/// failure are both cached until [`LogRepository::reset`]: a failed
/// provisioning turns every insert into a silent no-op instead of hitting
/// the database again on each write.
pub struct LogRepository {
    provisioner: CollectionProvisioner,
    generation: RwLock<Generation>,
    cached: RwLock<Cached>,
    /// Serializes "check cache, provision, store outcome". Never held
    /// while inserting.
    provision_lock: Mutex<()>,
}

impl LogRepository {
    pub fn new(config: MongoTargetConfig, connector: Arc<dyn Connector>) -> Self {
        LogRepository {
            provisioner: CollectionProvisioner::new(connector),
            generation: RwLock::new(Generation {
                epoch: 0,
                config: Arc::new(config),
            }),
            cached: RwLock::new(Cached {
                epoch: 0,
                state: Provisioning::Unresolved,
            }),
            provision_lock: Mutex::new(()),
        }
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<MongoTargetConfig> {
        self.generation
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .config
            .clone()
    }

    pub fn epoch(&self) -> u64 {
        self.generation
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .epoch
    }

    /// Replace the configuration and reset.
    pub fn set_config(&self, config: MongoTargetConfig) {
        self.update_config(|current| *current = config);
    }

    /// Modify the configuration in place and reset.
    pub fn update_config(&self, update: impl FnOnce(&mut MongoTargetConfig)) {
        let epoch = {
            let mut generation = self.generation.write().unwrap_or_else(PoisonError::into_inner);
            let mut config = MongoTargetConfig::clone(&generation.config);
            update(&mut config);
            generation.config = Arc::new(config);
            generation.epoch += 1;
            generation.epoch
        };
        self.clear(epoch);
    }

    /// Forget the cached handle or error. The next insert provisions again
    /// against the configuration current at that time.
    pub fn reset(&self) {
        let epoch = {
            let mut generation = self.generation.write().unwrap_or_else(PoisonError::into_inner);
            generation.epoch += 1;
            generation.epoch
        };
        self.clear(epoch);
    }

    fn clear(&self, epoch: u64) {
        let mut cached = self.cached.write().unwrap_or_else(PoisonError::into_inner);
        // A later reset may already have landed and its outcome been cached.
        if cached.epoch > epoch {
            return;
        }
        *cached = Cached {
            epoch,
            state: Provisioning::Unresolved,
        };
        debug!(epoch, "log repository reset");
    }

    fn snapshot(&self) -> (u64, Arc<MongoTargetConfig>) {
        let generation = self.generation.read().unwrap_or_else(PoisonError::into_inner);
        (generation.epoch, generation.config.clone())
    }

    /// `Some(outcome)` when provisioning already resolved for `epoch`.
    fn lookup(&self, epoch: u64) -> Option<Option<Arc<dyn LogCollection>>> {
        let cached = self.cached.read().unwrap_or_else(PoisonError::into_inner);
        if cached.epoch != epoch {
            return None;
        }
        match &cached.state {
            Provisioning::Unresolved => None,
            Provisioning::Ready(handle) => Some(Some(handle.clone())),
            Provisioning::Failed(_) => Some(None),
        }
    }

    pub fn status(&self) -> ProvisioningStatus {
        let epoch = self.epoch();
        let cached = self.cached.read().unwrap_or_else(PoisonError::into_inner);
        if cached.epoch != epoch {
            return ProvisioningStatus::Unresolved;
        }
        match cached.state {
            Provisioning::Unresolved => ProvisioningStatus::Unresolved,
            Provisioning::Ready(_) => ProvisioningStatus::Ready,
            Provisioning::Failed(_) => ProvisioningStatus::Failed,
        }
    }

    /// The cached provisioning error of the current configuration, if any.
    pub fn provisioning_error(&self) -> Option<Arc<StoreError>> {
        let epoch = self.epoch();
        let cached = self.cached.read().unwrap_or_else(PoisonError::into_inner);
        match &cached.state {
            Provisioning::Failed(err) if cached.epoch == epoch => Some(err.clone()),
            _ => None,
        }
    }

    /// Return the collection handle, provisioning it on first use.
    ///
    /// `None` means provisioning failed for the current configuration and
    /// nothing should be written until the next reset. Concurrent callers
    /// wait for a single in-flight provisioning and share its outcome.
    pub async fn get_or_provision(&self) -> Option<Arc<dyn LogCollection>> {
        if let Some(resolved) = self.lookup(self.epoch()) {
            return resolved;
        }

        let _guard = self.provision_lock.lock().await;

        let (epoch, config) = self.snapshot();
        if let Some(resolved) = self.lookup(epoch) {
            return resolved;
        }

        let state = match self.provisioner.ensure(&config).await {
            Ok(handle) => Provisioning::Ready(handle),
            Err(err) => {
                warn!(
                    database = %config.database_name,
                    collection = %config.collection_name,
                    error = %err,
                    "log collection provisioning failed, writes are skipped until reset"
                );
                Provisioning::Failed(Arc::new(err))
            }
        };
        let resolved = match &state {
            Provisioning::Ready(handle) => Some(handle.clone()),
            _ => None,
        };

        if self.epoch() == epoch {
            *self.cached.write().unwrap_or_else(PoisonError::into_inner) = Cached { epoch, state };
        } else {
            // A reset raced this provisioning; the next caller starts over
            // with the new configuration.
            debug!(epoch, "configuration changed during provisioning, outcome not cached");
        }

        resolved
    }

    /// Insert `documents` with a single batch call, or do nothing when
    /// there is no collection to write to.
    pub async fn insert_many(&self, documents: Vec<Document>) -> Result<(), StoreError> {
        if documents.is_empty() {
            return Ok(());
        }
        match self.get_or_provision().await {
            Some(collection) => collection.insert_many(documents).await,
            None => Ok(()),
        }
    }

    /// Insert one document, or do nothing when there is no collection to
    /// write to.
    pub async fn insert_one(&self, document: Document) -> Result<(), StoreError> {
        match self.get_or_provision().await {
            Some(collection) => collection.insert_one(document).await,
            None => Ok(()),
        }
    }
}
