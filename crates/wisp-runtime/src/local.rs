//! Reference provider running workers as local child processes.
//!
//! Each runtime is a fresh temporary directory. Commands run with that
//! directory as their working directory, with stdin closed and both output
//! pipes pumped as chunks. This provides no sandboxing beyond process and
//! directory separation.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, bail};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

use crate::event::Channel;
use crate::provider::{
    BoxFuture, CommandSpec, ExecutionProvider, ExitStatus, IsolatedRuntime, OutputChunk,
    RunningProcess,
};

const CHUNK_SIZE: usize = 8 * 1024;
const OUTPUT_BUFFER: usize = 64;

#[derive(Debug, Clone, Default)]
pub struct LocalProcessProvider {
    work_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl LocalProcessProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create runtime directories under `dir` instead of the OS temp dir.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Kill processes still running after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn create(&self) -> anyhow::Result<Arc<dyn IsolatedRuntime>> {
        let dir = match &self.work_dir {
            Some(parent) => {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
                tempfile::Builder::new().prefix("wisp-").tempdir_in(parent)?
            }
            None => tempfile::Builder::new().prefix("wisp-").tempdir()?,
        };
        let runtime = LocalRuntime::new(dir, self.timeout);
        tracing::debug!(runtime_id = runtime.id, dir = %runtime.root.display(), "Local runtime directory created");
        Ok(Arc::new(runtime))
    }
}

impl ExecutionProvider for LocalProcessProvider {
    fn name(&self) -> &str {
        "local-process"
    }

    fn create_runtime(&self) -> BoxFuture<'_, anyhow::Result<Arc<dyn IsolatedRuntime>>> {
        Box::pin(self.create())
    }
}

struct LocalRuntime {
    id: String,
    root: PathBuf,
    dir: Mutex<Option<tempfile::TempDir>>,
    timeout: Option<Duration>,
    stopped: AtomicBool,
    stop_signal: watch::Sender<bool>,
}

impl LocalRuntime {
    fn new(dir: tempfile::TempDir, timeout: Option<Duration>) -> Self {
        let (stop_signal, _) = watch::channel(false);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            root: dir.path().to_path_buf(),
            dir: Mutex::new(Some(dir)),
            timeout,
            stopped: AtomicBool::new(false),
            stop_signal,
        }
    }

    fn ensure_running(&self) -> anyhow::Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            bail!("runtime {} has been stopped", self.id);
        }
        Ok(())
    }

    async fn write(&self, path: &str, contents: &[u8]) -> anyhow::Result<()> {
        self.ensure_running()?;
        let target = contained_path(&self.root, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, contents)
            .await
            .with_context(|| format!("writing {}", target.display()))?;
        Ok(())
    }

    async fn spawn(&self, command: &CommandSpec) -> anyhow::Result<RunningProcess> {
        self.ensure_running()?;
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&self.root)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", command.program))?;

        let (tx, output) = mpsc::channel(OUTPUT_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, Channel::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, Channel::Stderr, tx));
        }

        let exit = wait_child(
            child,
            self.timeout,
            self.stop_signal.subscribe(),
            self.id.clone(),
        );
        Ok(RunningProcess {
            output,
            exit: Box::pin(exit),
        })
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stop_signal.send_replace(true);

        let dir = match self.dir.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(dir) = dir {
            tokio::task::spawn_blocking(move || dir.close())
                .await?
                .with_context(|| format!("removing {}", self.root.display()))?;
        }
        Ok(())
    }
}

/// Resolve `path` inside `root`, rejecting anything that could escape it.
fn contained_path(root: &Path, path: &str) -> anyhow::Result<PathBuf> {
    let relative = Path::new(path);
    if path.is_empty()
        || !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        bail!("invalid runtime path: {path:?}");
    }
    Ok(root.join(relative))
}

impl IsolatedRuntime for LocalRuntime {
    fn id(&self) -> &str {
        &self.id
    }

    fn write_file<'a>(
        &'a self,
        path: &'a str,
        contents: &'a [u8],
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(self.write(path, contents))
    }

    fn run<'a>(&'a self, command: &'a CommandSpec) -> BoxFuture<'a, anyhow::Result<RunningProcess>> {
        Box::pin(self.spawn(command))
    }

    fn stop(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(self.shutdown())
    }
}

/// Reap `child`, killing it on timeout or when the runtime is stopped.
async fn wait_child(
    mut child: tokio::process::Child,
    timeout: Option<Duration>,
    mut stop: watch::Receiver<bool>,
    runtime_id: String,
) -> anyhow::Result<ExitStatus> {
    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    let stopped = async {
        // A dropped sender means the runtime itself is gone.
        let _ = stop.wait_for(|stopped| *stopped).await;
    };

    let waited = tokio::select! {
        status = child.wait() => Some(status),
        _ = deadline => {
            tracing::warn!(runtime_id, ?timeout, "Worker process timed out; killing");
            None
        }
        _ = stopped => {
            tracing::debug!(runtime_id, "Runtime stopped while process running; killing");
            None
        }
    };

    match waited {
        Some(status) => Ok(ExitStatus {
            code: status?.code(),
        }),
        None => {
            child.kill().await?;
            Ok(ExitStatus { code: None })
        }
    }
}

async fn pump<R>(mut reader: R, channel: Channel, tx: mpsc::Sender<OutputChunk>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = OutputChunk {
                    channel,
                    data: buf[..n].to_vec(),
                };
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(?channel, "Output pipe read failed: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_must_stay_inside_the_runtime() {
        let root = Path::new("/tmp/wisp-root");
        assert_eq!(
            contained_path(root, "worker.mjs").unwrap(),
            root.join("worker.mjs")
        );
        assert!(contained_path(root, "lib/util.mjs").is_ok());
        assert!(contained_path(root, "../escape.mjs").is_err());
        assert!(contained_path(root, "/etc/passwd").is_err());
        assert!(contained_path(root, "").is_err());
    }

    #[tokio::test]
    async fn stop_removes_the_runtime_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        let provider = LocalProcessProvider::new().with_work_dir(tmp.path());
        let runtime = provider.create_runtime().await.unwrap();
        runtime.write_file("worker.mjs", b"// empty").await.unwrap();

        let dirs: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(dirs.len(), 1);

        runtime.stop().await.unwrap();
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
        assert!(runtime.write_file("again.mjs", b"").await.is_err());
        // Stopping twice is harmless.
        runtime.stop().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streams_both_channels_and_reports_exit_code() {
        let provider = LocalProcessProvider::new();
        let runtime = provider.create_runtime().await.unwrap();
        let command = CommandSpec {
            program: "sh".into(),
            args: vec!["-c".into(), "echo out; echo err 1>&2; exit 3".into()],
        };
        let RunningProcess { mut output, exit } = runtime.run(&command).await.unwrap();

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Some(chunk) = output.recv().await {
            match chunk.channel {
                Channel::Stdout => stdout.extend(chunk.data),
                Channel::Stderr => stderr.extend(chunk.data),
            }
        }
        let status = exit.await.unwrap();

        assert_eq!(stdout, b"out\n");
        assert_eq!(stderr, b"err\n");
        assert_eq!(status.code, Some(3));
        runtime.stop().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn background_child_holding_the_pipes_does_not_stall_invocation() {
        let provider = LocalProcessProvider::new().with_timeout(Duration::from_secs(1));
        let runtime = provider.create_runtime().await.unwrap();
        let command = CommandSpec {
            program: "sh".into(),
            args: vec![
                "-c".into(),
                "sleep 6 & echo __RESULT__1__END_RESULT__".into(),
            ],
        };
        let (tx, _rx) = mpsc::channel(16);

        let started = std::time::Instant::now();
        let completed = crate::transport::invoke(runtime.as_ref(), &command, &tx)
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(completed.value, serde_json::json!(1));
        runtime.stop().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_the_process() {
        let provider = LocalProcessProvider::new().with_timeout(Duration::from_millis(100));
        let runtime = provider.create_runtime().await.unwrap();
        let command = CommandSpec {
            program: "sleep".into(),
            args: vec!["5".into()],
        };
        let running = runtime.run(&command).await.unwrap();
        let status = running.exit.await.unwrap();
        assert_eq!(status.code, None);
        runtime.stop().await.unwrap();
    }
}
