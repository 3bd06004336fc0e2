use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

use chrono::{DateTime, Utc};
use regex::Regex;
use tokio::sync::{RwLock, mpsc};
use wisp_build::{FunctionManifest, SourceBundle, WorkerArtifact, build_worker};

use crate::config::{SessionMode, WispConfig};
use crate::error::RuntimeError;
use crate::event::InvocationEvent;
use crate::provider::ExecutionProvider;
use crate::session::{ScriptLayout, Session, with_session};
use crate::storage::{ArtifactStore, WorkerMeta};
use crate::transport::Completed;

static WORKER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("worker name pattern is valid"));

/// A deployed worker version.
struct DeployedWorker {
    meta: WorkerMeta,
    artifact: Arc<WorkerArtifact>,
    /// Present in long-lived mode only.
    session: Option<Arc<Session>>,
    last_invoked_at: Mutex<Option<DateTime<Utc>>>,
}

/// Registry of deployed workers and the single entry point for invoking
/// them.
///
/// # Threading
///
/// `LifecycleManager` is `Send + Sync` and is typically wrapped in `Arc`.
/// The registry is behind an `RwLock`; invocations only take the read lock
/// long enough to resolve the worker, so any number can run at once.
pub struct LifecycleManager {
    provider: Arc<dyn ExecutionProvider>,
    layout: ScriptLayout,
    mode: SessionMode,
    store: Option<ArtifactStore>,
    /// worker_id → deployed version
    workers: RwLock<HashMap<String, Arc<DeployedWorker>>>,
    /// worker name → worker_id of its current version
    names: RwLock<HashMap<String, String>>,
}

impl LifecycleManager {
    pub fn new(provider: Arc<dyn ExecutionProvider>, layout: ScriptLayout, mode: SessionMode) -> Self {
        Self {
            provider,
            layout,
            mode,
            store: None,
            workers: RwLock::new(HashMap::new()),
            names: RwLock::new(HashMap::new()),
        }
    }

    /// Persist deployments in `store`.
    pub fn with_store(mut self, store: ArtifactStore) -> Result<Self, RuntimeError> {
        store.init()?;
        self.store = Some(store);
        Ok(self)
    }

    /// Build a manager from configuration, with a disk store.
    pub fn from_config(config: &WispConfig) -> Result<Self, RuntimeError> {
        let store_dir = config
            .store
            .dir
            .clone()
            .unwrap_or_else(ArtifactStore::default_path);
        Self::new(config.build_provider(), config.layout(), config.runtime.mode)
            .with_store(ArtifactStore::new(store_dir))
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Generate the worker script for `source` and register it under `name`.
    ///
    /// Deploying the same source again is a no-op. Deploying different
    /// source under an existing name retires the previous version, stopping
    /// its runtime.
    pub async fn deploy(&self, name: &str, source: SourceBundle) -> Result<WorkerMeta, RuntimeError> {
        if !WORKER_NAME.is_match(name) {
            return Err(RuntimeError::InvalidWorkerName(name.to_string()));
        }

        let digest = source.digest();
        let worker_id = format!("{name}@{}", &digest[..12]);

        // Fast path: this version is already deployed
        if let Some(existing) = self.workers.read().await.get(&worker_id) {
            tracing::debug!(worker_id, "Worker version already deployed");
            return Ok(existing.meta.clone());
        }

        let artifact = build_worker(&source)?;
        let meta = WorkerMeta {
            worker_id: worker_id.clone(),
            name: name.to_string(),
            source_digest: artifact.source_digest.clone(),
            functions: artifact.manifest().names().to_vec(),
            deployed_at: Utc::now().timestamp_millis(),
        };

        if let Some(store) = &self.store {
            store.store(&source, &artifact, &meta)?;
        }

        if let Err(e) = self.register(meta.clone(), artifact).await {
            if let Some(store) = &self.store
                && let Err(cleanup) = store.remove(&worker_id)
            {
                tracing::warn!(worker_id, "Failed to remove stored artifacts: {cleanup}");
            }
            return Err(e);
        }
        tracing::info!(worker_id, functions = ?meta.functions, "Worker deployed");
        Ok(meta)
    }

    async fn register(&self, meta: WorkerMeta, artifact: WorkerArtifact) -> Result<(), RuntimeError> {
        let session = match self.mode {
            SessionMode::LongLived => Some(Arc::new(
                Session::open(self.provider.as_ref(), &artifact, self.layout.clone()).await?,
            )),
            SessionMode::PerInvocation => None,
        };

        let worker_id = meta.worker_id.clone();
        let name = meta.name.clone();
        let worker = Arc::new(DeployedWorker {
            meta,
            artifact: Arc::new(artifact),
            session,
            last_invoked_at: Mutex::new(None),
        });

        self.workers.write().await.insert(worker_id.clone(), worker);
        let previous = self.names.write().await.insert(name, worker_id.clone());

        if let Some(previous) = previous
            && previous != worker_id
        {
            tracing::info!(worker_id = previous, replaced_by = worker_id, "Retiring previous worker version");
            self.undeploy(&previous).await?;
        }
        Ok(())
    }

    /// Remove a worker version. Its runtime, if any, is stopped once no
    /// invocation is using it.
    pub async fn undeploy(&self, worker_id: &str) -> Result<(), RuntimeError> {
        let worker = self
            .workers
            .write()
            .await
            .remove(worker_id)
            .ok_or_else(|| RuntimeError::WorkerNotFound(worker_id.to_string()))?;

        {
            let mut names = self.names.write().await;
            if names.get(&worker.meta.name).map(String::as_str) == Some(worker_id) {
                names.remove(&worker.meta.name);
            }
        }

        if let Some(store) = &self.store {
            store.remove(worker_id)?;
        }
        if let Some(session) = worker.session.clone() {
            // The registry entry and this clone are the only owners unless an
            // invocation is in flight.
            drop(worker);
            release_shared(session).await;
        }

        tracing::info!(worker_id, "Worker undeployed");
        Ok(())
    }

    /// Metadata of every deployed worker version, ordered by ID.
    pub async fn list_workers(&self) -> Vec<WorkerMeta> {
        let workers = self.workers.read().await;
        let mut metas: Vec<WorkerMeta> = workers.values().map(|w| w.meta.clone()).collect();
        metas.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        metas
    }

    /// Resolve a worker by ID, or by name to its current version.
    pub async fn resolve(&self, worker: &str) -> Option<String> {
        if self.workers.read().await.contains_key(worker) {
            return Some(worker.to_string());
        }
        self.names.read().await.get(worker).cloned()
    }

    pub async fn functions(&self, worker: &str) -> Result<FunctionManifest, RuntimeError> {
        let deployed = self.lookup(worker).await?;
        Ok(deployed.artifact.manifest().clone())
    }

    pub async fn last_invoked_at(&self, worker: &str) -> Result<Option<DateTime<Utc>>, RuntimeError> {
        let deployed = self.lookup(worker).await?;
        Ok(*lock(&deployed.last_invoked_at))
    }

    async fn lookup(&self, worker: &str) -> Result<Arc<DeployedWorker>, RuntimeError> {
        let worker_id = self
            .resolve(worker)
            .await
            .ok_or_else(|| RuntimeError::WorkerNotFound(worker.to_string()))?;
        self.workers
            .read()
            .await
            .get(&worker_id)
            .cloned()
            .ok_or(RuntimeError::WorkerNotFound(worker_id))
    }

    /// Invoke `function` of a deployed worker.
    ///
    /// Log events are streamed to `events` as they are produced, followed
    /// by exactly one terminal `result` or `error` event carrying the same
    /// outcome as the return value.
    pub async fn invoke(
        &self,
        worker: &str,
        function: &str,
        payload: &serde_json::Value,
        events: &mpsc::Sender<InvocationEvent>,
    ) -> Result<Completed, RuntimeError> {
        let outcome = self.run_invocation(worker, function, payload, events).await;

        let terminal = match &outcome {
            Ok(completed) => InvocationEvent::Result {
                success: true,
                result: completed.value.clone(),
                duration: completed.duration.as_millis() as u64,
            },
            Err(e) => InvocationEvent::Error {
                error: e.event_message(),
            },
        };
        if events.send(terminal).await.is_err() {
            tracing::debug!(worker, function, "Caller disconnected before the terminal event");
        }
        outcome
    }

    async fn run_invocation(
        &self,
        worker: &str,
        function: &str,
        payload: &serde_json::Value,
        events: &mpsc::Sender<InvocationEvent>,
    ) -> Result<Completed, RuntimeError> {
        let deployed = self.lookup(worker).await?;
        let manifest = deployed.artifact.manifest();
        if !manifest.contains(function) {
            return Err(RuntimeError::FunctionNotFound {
                function: function.to_string(),
                available: manifest.names().join(", "),
            });
        }

        *lock(&deployed.last_invoked_at) = Some(Utc::now());
        let worker_id = deployed.meta.worker_id.as_str();
        tracing::info!(worker_id, function, mode = ?self.mode, "Invoking function");

        let outcome = match &deployed.session {
            Some(session) => session.invoke(function, payload, events).await,
            None => {
                with_session(
                    self.provider.as_ref(),
                    &deployed.artifact,
                    self.layout.clone(),
                    |handle| async move { handle.invoke(function, payload, events).await },
                )
                .await
            }
        };

        match &outcome {
            Ok(completed) => tracing::info!(
                worker_id,
                function,
                duration_ms = completed.duration.as_millis() as u64,
                "Invocation succeeded"
            ),
            Err(e) => tracing::info!(worker_id, function, "Invocation failed: {e}"),
        }
        outcome
    }

    /// Restore deployments persisted on disk (e.g. after a restart).
    ///
    /// Entries that fail to load are logged and skipped.
    pub async fn load_persisted(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let ids = match store.list_worker_ids() {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!("Failed to list persisted workers: {e}");
                return;
            }
        };

        for id in ids {
            if self.workers.read().await.contains_key(&id) {
                continue;
            }
            let meta = match store.load_meta(&id) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(worker_id = id, "Failed to load metadata: {e}");
                    continue;
                }
            };
            let source = match store.load_source(&id) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(worker_id = id, "Failed to load source: {e}");
                    continue;
                }
            };
            if source.digest() != meta.source_digest {
                tracing::warn!(worker_id = id, "Source digest mismatch, skipping");
                continue;
            }
            let artifact = match build_worker(&source) {
                Ok(a) => a,
                Err(e) => {
                    tracing::warn!(worker_id = id, "Failed to regenerate worker script: {e}");
                    continue;
                }
            };
            if let Err(e) = self.register(meta, artifact).await {
                tracing::warn!(worker_id = id, "Failed to restore worker: {e}");
                continue;
            }
            tracing::info!(worker_id = id, "Persisted worker restored");
        }
    }

    /// Stop every long-lived runtime. Deployments stay on disk.
    pub async fn shutdown(&self) {
        let workers: Vec<_> = self.workers.write().await.drain().map(|(_, w)| w).collect();
        self.names.write().await.clear();
        for worker in workers {
            if let Some(session) = worker.session.clone() {
                drop(worker);
                release_shared(session).await;
            }
        }
    }
}

/// Release a shared session now if nothing else holds it; otherwise the last
/// holder's drop stops the runtime.
async fn release_shared(session: Arc<Session>) {
    match Arc::try_unwrap(session) {
        Ok(session) => {
            if let Err(e) = session.release().await {
                tracing::warn!("{e}");
            }
        }
        Err(shared) => {
            tracing::debug!(
                runtime_id = shared.runtime_id(),
                "Runtime in use; it stops when the last invocation finishes"
            );
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
