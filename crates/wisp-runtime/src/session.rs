//! Scoped ownership of an isolated runtime.
//!
//! A [`Session`] exists only once its runtime has been created and the worker
//! files written into it. [`Session::release`] stops the runtime; a session
//! dropped without being released (a cancelled task, a caller that went
//! away) schedules the stop on the ambient tokio runtime instead.

use std::sync::Arc;

use tokio::sync::mpsc;
use wisp_build::{FunctionManifest, WorkerArtifact};

use crate::error::RuntimeError;
use crate::event::InvocationEvent;
use crate::provider::{CommandSpec, ExecutionProvider, IsolatedRuntime};
use crate::transport::{self, Completed};

/// Where the worker files go inside a runtime, and how the script is run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLayout {
    pub interpreter: String,
    /// Arguments placed between the interpreter and the script path.
    pub interpreter_args: Vec<String>,
    pub script_name: String,
    pub manifest_name: String,
}

impl Default for ScriptLayout {
    fn default() -> Self {
        Self {
            interpreter: "node".into(),
            interpreter_args: Vec::new(),
            script_name: "worker.mjs".into(),
            manifest_name: "manifest.json".into(),
        }
    }
}

impl ScriptLayout {
    /// `interpreter [args..] script function payload`
    pub fn command(&self, function: &str, payload: &str) -> CommandSpec {
        let mut args = self.interpreter_args.clone();
        args.push(self.script_name.clone());
        args.push(function.to_string());
        args.push(payload.to_string());
        CommandSpec {
            program: self.interpreter.clone(),
            args,
        }
    }
}

/// Owner of one isolated runtime holding one worker artifact.
pub struct Session {
    handle: SessionHandle,
    released: bool,
}

/// Cloneable view of a live session, used to run invocations.
#[derive(Clone)]
pub struct SessionHandle {
    runtime: Arc<dyn IsolatedRuntime>,
    layout: Arc<ScriptLayout>,
    manifest: Arc<FunctionManifest>,
    source_digest: Arc<str>,
}

impl Session {
    /// Create a runtime and write the script and manifest into it.
    ///
    /// If writing fails the runtime is stopped before the error is returned.
    pub async fn open(
        provider: &dyn ExecutionProvider,
        artifact: &WorkerArtifact,
        layout: ScriptLayout,
    ) -> Result<Self, RuntimeError> {
        let runtime = provider.create_runtime().await.map_err(|e| {
            RuntimeError::Session(format!("{}: failed to create runtime: {e:#}", provider.name()))
        })?;
        tracing::info!(
            provider = provider.name(),
            runtime_id = runtime.id(),
            source_digest = artifact.source_digest,
            "Runtime created"
        );

        let session = Session {
            handle: SessionHandle {
                runtime,
                layout: Arc::new(layout),
                manifest: Arc::new(artifact.manifest().clone()),
                source_digest: artifact.source_digest.as_str().into(),
            },
            released: false,
        };

        if let Err(e) = session.write_artifact(artifact).await {
            if let Err(stop_err) = session.release().await {
                tracing::warn!("Teardown after failed write also failed: {stop_err}");
            }
            return Err(e);
        }
        Ok(session)
    }

    async fn write_artifact(&self, artifact: &WorkerArtifact) -> Result<(), RuntimeError> {
        let handle = &self.handle;
        let manifest = artifact.manifest_json()?;
        let layout = &handle.layout;

        handle
            .runtime
            .write_file(&layout.script_name, artifact.script.source().as_bytes())
            .await
            .map_err(|e| RuntimeError::Session(format!("writing {}: {e:#}", layout.script_name)))?;
        handle
            .runtime
            .write_file(&layout.manifest_name, manifest.as_bytes())
            .await
            .map_err(|e| {
                RuntimeError::Session(format!("writing {}: {e:#}", layout.manifest_name))
            })?;
        Ok(())
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn runtime_id(&self) -> &str {
        self.handle.runtime_id()
    }

    pub async fn invoke(
        &self,
        function: &str,
        payload: &serde_json::Value,
        events: &mpsc::Sender<InvocationEvent>,
    ) -> Result<Completed, RuntimeError> {
        self.handle.invoke(function, payload, events).await
    }

    /// Stop the runtime and wait for it to be gone.
    pub async fn release(mut self) -> Result<(), RuntimeError> {
        self.released = true;
        let runtime = Arc::clone(&self.handle.runtime);
        let runtime_id = runtime.id().to_string();
        runtime
            .stop()
            .await
            .map_err(|e| RuntimeError::Session(format!("failed to stop runtime {runtime_id}: {e:#}")))?;
        tracing::info!(runtime_id, "Runtime stopped");
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let runtime = Arc::clone(&self.handle.runtime);
        let runtime_id = runtime.id().to_string();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                tracing::debug!(runtime_id, "Session dropped unreleased; stopping runtime");
                rt.spawn(async move {
                    match runtime.stop().await {
                        Ok(()) => tracing::info!(runtime_id, "Runtime stopped"),
                        Err(e) => tracing::warn!(runtime_id, "Failed to stop runtime: {e:#}"),
                    }
                });
            }
            Err(_) => {
                tracing::warn!(runtime_id, "Session dropped outside a tokio runtime; runtime not stopped");
            }
        }
    }
}

impl SessionHandle {
    pub fn runtime_id(&self) -> &str {
        self.runtime.id()
    }

    pub fn manifest(&self) -> &FunctionManifest {
        &self.manifest
    }

    pub fn source_digest(&self) -> &str {
        &self.source_digest
    }

    /// Run one function with `payload` and stream its logs to `events`.
    pub async fn invoke(
        &self,
        function: &str,
        payload: &serde_json::Value,
        events: &mpsc::Sender<InvocationEvent>,
    ) -> Result<Completed, RuntimeError> {
        let payload = serde_json::to_string(payload)?;
        let command = self.layout.command(function, &payload);
        transport::invoke(self.runtime.as_ref(), &command, events).await
    }
}

/// Open a session, run `body` against it, and release the session on every
/// exit path.
///
/// A teardown failure is logged; it never replaces the body's outcome.
pub async fn with_session<F, Fut, T>(
    provider: &dyn ExecutionProvider,
    artifact: &WorkerArtifact,
    layout: ScriptLayout,
    body: F,
) -> Result<T, RuntimeError>
where
    F: FnOnce(SessionHandle) -> Fut,
    Fut: Future<Output = Result<T, RuntimeError>>,
{
    let session = Session::open(provider, artifact, layout).await?;
    let outcome = body(session.handle().clone()).await;
    if let Err(e) = session.release().await {
        tracing::warn!("{e}");
    }
    outcome
}
