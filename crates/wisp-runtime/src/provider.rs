//! The isolated-execution provider seam.
//!
//! A provider creates isolated runtimes; a runtime accepts files, runs
//! commands whose output arrives as channel-tagged chunks, and is stopped
//! when no longer needed. Process creation, sandboxing and resource limits
//! belong to the implementation behind these traits.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::event::Channel;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A raw write observed on one of the process's output channels.
///
/// Chunk boundaries carry no meaning: a line, or a result record, may be
/// split across any number of chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub channel: Channel,
    pub data: Vec<u8>,
}

impl OutputChunk {
    pub fn stdout(data: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: Channel::Stdout,
            data: data.into(),
        }
    }

    pub fn stderr(data: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: Channel::Stderr,
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

/// How the process ended. `code` is `None` when it was killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: Option<i32>,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A launched command: its output stream and its termination.
///
/// `output` closes once both channels are drained; `exit` resolves when the
/// process terminates.
pub struct RunningProcess {
    pub output: mpsc::Receiver<OutputChunk>,
    pub exit: BoxFuture<'static, anyhow::Result<ExitStatus>>,
}

/// Facade over the system that creates isolated runtimes.
pub trait ExecutionProvider: Send + Sync {
    fn name(&self) -> &str;

    fn create_runtime(&self) -> BoxFuture<'_, anyhow::Result<Arc<dyn IsolatedRuntime>>>;
}

/// One isolated runtime instance.
pub trait IsolatedRuntime: Send + Sync {
    fn id(&self) -> &str;

    /// Write a file at `path`, relative to the runtime's working directory.
    fn write_file<'a>(
        &'a self,
        path: &'a str,
        contents: &'a [u8],
    ) -> BoxFuture<'a, anyhow::Result<()>>;

    /// Launch a command, streaming its output.
    fn run<'a>(&'a self, command: &'a CommandSpec) -> BoxFuture<'a, anyhow::Result<RunningProcess>>;

    /// Tear the runtime down. Running processes are terminated.
    fn stop(&self) -> BoxFuture<'_, anyhow::Result<()>>;
}
