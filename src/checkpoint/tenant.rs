//! Realm-aware checkpoint store.
//!
//! Each realm gets exactly one backend for the life of the process, built on
//! first use. Construction takes two locks: the registry lock is held only
//! long enough to fetch or create the realm's own lock, and the realm lock
//! covers construction plus `setup`. The blocking task that builds the
//! backend owns the realm lock and publishes the result itself, so a caller
//! dropped mid-construction cannot cause a second build. Once built, a
//! backend is read from the cache without waiting on either lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;

use super::{
    validate_realm, BackendFactory, Checkpoint, CheckpointBackend, CheckpointError, CheckpointMetadata,
    CheckpointTuple, ListOptions, PendingWrite, RunConfig,
};

pub struct TenantCheckpointStore {
    factory: Arc<dyn BackendFactory>,
    /// realm → lock serializing that realm's construction.
    init_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    backends: Arc<RwLock<HashMap<String, Arc<dyn CheckpointBackend>>>>,
}

impl TenantCheckpointStore {
    pub fn new(factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            factory,
            init_locks: Mutex::new(HashMap::new()),
            backends: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn cached(&self, realm: &str) -> Result<Option<Arc<dyn CheckpointBackend>>, CheckpointError> {
        let backends = self.backends.read().map_err(|_| CheckpointError::LockPoisoned)?;
        Ok(backends.get(realm).cloned())
    }

    async fn realm_lock(&self, realm: &str) -> Arc<Mutex<()>> {
        let mut locks = self.init_locks.lock().await;
        Arc::clone(locks.entry(realm.to_string()).or_default())
    }

    /// The realm's backend, constructing and setting it up on first use.
    pub async fn acquire(&self, realm: &str) -> Result<Arc<dyn CheckpointBackend>, CheckpointError> {
        if let Some(backend) = self.cached(realm)? {
            return Ok(backend);
        }
        validate_realm(realm)?;

        let guard = self.realm_lock(realm).await.lock_owned().await;

        // Another task may have finished construction while we waited.
        if let Some(backend) = self.cached(realm)? {
            return Ok(backend);
        }

        let factory = Arc::clone(&self.factory);
        let backends = Arc::clone(&self.backends);
        let owned_realm = realm.to_string();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let built = factory.create(&owned_realm).and_then(|backend| {
                backend.setup()?;
                Ok(backend)
            });
            let backend = match built {
                Ok(backend) => backend,
                Err(e) => {
                    tracing::error!(realm = %owned_realm, error = %e, "Checkpoint backend construction failed");
                    return Err(e);
                }
            };

            backends
                .write()
                .map_err(|_| CheckpointError::LockPoisoned)?
                .insert(owned_realm.clone(), Arc::clone(&backend));
            tracing::info!(realm = %owned_realm, "Checkpoint backend initialized");
            Ok(backend)
        })
        .await
        .map_err(|e| CheckpointError::Task(e.to_string()))?
    }

    /// Realms with a constructed backend.
    pub fn initialized_realms(&self) -> Result<Vec<String>, CheckpointError> {
        let backends = self.backends.read().map_err(|_| CheckpointError::LockPoisoned)?;
        let mut realms: Vec<String> = backends.keys().cloned().collect();
        realms.sort();
        Ok(realms)
    }

    async fn run<T, F>(&self, realm: &str, op: F) -> Result<T, CheckpointError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn CheckpointBackend) -> Result<T, CheckpointError> + Send + 'static,
    {
        let backend = self.acquire(realm).await?;
        tokio::task::spawn_blocking(move || op(backend.as_ref()))
            .await
            .map_err(|e| CheckpointError::Task(e.to_string()))?
    }

    // ─── async operations ────────────────────────────────────

    pub async fn get_tuple(&self, config: &RunConfig) -> Result<Option<CheckpointTuple>, CheckpointError> {
        let config = config.clone();
        self.run(&config.realm.clone(), move |b| b.get_tuple(&config))
            .await
    }

    pub async fn put(
        &self,
        config: &RunConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<RunConfig, CheckpointError> {
        let config = config.clone();
        self.run(&config.realm.clone(), move |b| b.put(&config, checkpoint, metadata))
            .await
    }

    pub async fn put_writes(
        &self,
        config: &RunConfig,
        writes: Vec<PendingWrite>,
        task_id: &str,
    ) -> Result<(), CheckpointError> {
        let config = config.clone();
        let task_id = task_id.to_string();
        self.run(&config.realm.clone(), move |b| {
            b.put_writes(&config, &writes, &task_id)
        })
        .await
    }

    pub async fn list(
        &self,
        config: &RunConfig,
        options: ListOptions,
    ) -> Result<Vec<CheckpointTuple>, CheckpointError> {
        let config = config.clone();
        self.run(&config.realm.clone(), move |b| b.list(&config, &options))
            .await
    }

    pub async fn delete_thread(&self, realm: &str, thread_id: &str) -> Result<(), CheckpointError> {
        let thread_id = thread_id.to_string();
        self.run(realm, move |b| b.delete_thread(&thread_id)).await
    }

    // ─── blocking operations ─────────────────────────────────
    //
    // Only valid once `acquire` has built the realm's backend. These never
    // construct one themselves.

    pub fn blocking_backend(&self, realm: &str) -> Result<Arc<dyn CheckpointBackend>, CheckpointError> {
        self.cached(realm)?
            .ok_or_else(|| CheckpointError::NotInitialized(realm.to_string()))
    }

    pub fn get_tuple_blocking(
        &self,
        config: &RunConfig,
    ) -> Result<Option<CheckpointTuple>, CheckpointError> {
        self.blocking_backend(&config.realm)?.get_tuple(config)
    }

    pub fn put_blocking(
        &self,
        config: &RunConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<RunConfig, CheckpointError> {
        self.blocking_backend(&config.realm)?
            .put(config, checkpoint, metadata)
    }

    pub fn put_writes_blocking(
        &self,
        config: &RunConfig,
        writes: &[PendingWrite],
        task_id: &str,
    ) -> Result<(), CheckpointError> {
        self.blocking_backend(&config.realm)?
            .put_writes(config, writes, task_id)
    }

    pub fn list_blocking(
        &self,
        config: &RunConfig,
        options: &ListOptions,
    ) -> Result<Vec<CheckpointTuple>, CheckpointError> {
        self.blocking_backend(&config.realm)?.list(config, options)
    }

    pub fn delete_thread_blocking(&self, realm: &str, thread_id: &str) -> Result<(), CheckpointError> {
        self.blocking_backend(realm)?.delete_thread(thread_id)
    }
}
