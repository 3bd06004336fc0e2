//! Invocation transport and session lifecycle for wisp workers.
//!
//! A worker script generated by `wisp-build` runs inside an isolated
//! runtime obtained from an [`ExecutionProvider`]. The runtime's output is
//! streamed back as [`InvocationEvent`]s: any number of `log` events, then
//! exactly one `result` or `error`.
//!
//! [`LifecycleManager`] is the usual entry point:
//!
//! ```rust,no_run
//! use wisp_build::SourceBundle;
//! use wisp_runtime::{LifecycleManager, WispConfig};
//!
//! # async fn run() -> Result<(), wisp_runtime::RuntimeError> {
//! let config = WispConfig::load(None)?;
//! let manager = LifecycleManager::from_config(&config)?;
//!
//! // Restore workers deployed in a previous session
//! manager.load_persisted().await;
//!
//! let meta = manager
//!     .deploy("math", SourceBundle::new("export const add = (p: { x: number; y: number }) => p.x + p.y;"))
//!     .await?;
//!
//! let (tx, mut rx) = tokio::sync::mpsc::channel(64);
//! let printer = tokio::spawn(async move {
//!     while let Some(event) = rx.recv().await {
//!         println!("{}", serde_json::to_string(&event).unwrap_or_default());
//!     }
//! });
//! manager
//!     .invoke(&meta.worker_id, "add", &serde_json::json!({ "x": 2, "y": 3 }), &tx)
//!     .await?;
//! drop(tx);
//! let _ = printer.await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod demux;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod local;
pub mod provider;
pub mod session;
pub mod storage;
pub mod transport;

pub use config::{SessionMode, WispConfig};
pub use error::RuntimeError;
pub use event::{Channel, InvocationEvent, LogLine, ResultEnvelope};
pub use lifecycle::LifecycleManager;
pub use local::LocalProcessProvider;
pub use provider::{
    BoxFuture, CommandSpec, ExecutionProvider, ExitStatus, IsolatedRuntime, OutputChunk,
    RunningProcess,
};
pub use session::{ScriptLayout, Session, SessionHandle, with_session};
pub use storage::{ArtifactStore, WorkerMeta};
pub use transport::Completed;
