use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::demux::OutputDemux;
use crate::error::RuntimeError;
use crate::event::{InvocationEvent, LogLine, ResultEnvelope};
use crate::provider::{CommandSpec, ExitStatus, IsolatedRuntime, RunningProcess};

/// How long output is still read once the process has exited.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// A finished invocation whose function returned normally.
#[derive(Debug, Clone, PartialEq)]
pub struct Completed {
    pub value: serde_json::Value,
    /// From just before launch to just after the process was reaped.
    pub duration: Duration,
    pub exit: ExitStatus,
}

/// Run `command` in `runtime`, forwarding log lines to `events` as they
/// arrive, and decode the result record once the process has terminated.
///
/// Only `log` events are sent here; the terminal event is the caller's.
/// A closed `events` channel does not stop the invocation.
pub async fn invoke(
    runtime: &dyn IsolatedRuntime,
    command: &CommandSpec,
    events: &mpsc::Sender<InvocationEvent>,
) -> Result<Completed, RuntimeError> {
    let invocation_id = uuid::Uuid::new_v4().to_string();
    let runtime_id = runtime.id();
    tracing::debug!(invocation_id, runtime_id, program = %command.program, "Launching worker process");

    let started = Instant::now();
    let RunningProcess { mut output, mut exit } = runtime
        .run(command)
        .await
        .map_err(|e| RuntimeError::Session(format!("launch failed: {e:#}")))?;

    let mut forwarder = Forwarder::new(events, &invocation_id);
    let mut demux = OutputDemux::new();
    let mut output_open = true;

    let waited = loop {
        tokio::select! {
            chunk = output.recv(), if output_open => match chunk {
                Some(chunk) => {
                    for line in demux.push(&chunk) {
                        forwarder.send(line).await;
                    }
                }
                None => output_open = false,
            },
            status = &mut exit => break status,
        }
    };
    let duration = started.elapsed();

    // Output still buffered in the pipes is read for a bounded time only; a
    // descendant that inherited them must not keep the invocation alive.
    if output_open {
        let drained = tokio::time::timeout(OUTPUT_DRAIN_GRACE, async {
            while let Some(chunk) = output.recv().await {
                for line in demux.push(&chunk) {
                    forwarder.send(line).await;
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                invocation_id,
                runtime_id,
                "Worker output still open after exit; no longer reading it"
            );
        }
    }
    drop(output);

    let finished = demux.finish();
    for line in finished.lines {
        forwarder.send(line).await;
    }

    let status = waited.map_err(|e| {
        RuntimeError::Transport(format!("waiting for worker process failed: {e:#}"))
    })?;

    tracing::info!(
        invocation_id,
        runtime_id,
        exit_code = ?status.code,
        duration_ms = duration.as_millis() as u64,
        "Worker process finished"
    );

    match finished.result? {
        ResultEnvelope::Success(value) => Ok(Completed {
            value,
            duration,
            exit: status,
        }),
        ResultEnvelope::Error { message } => Err(RuntimeError::UserFunction { message }),
    }
}

/// Sends log events, tolerating a caller that went away.
struct Forwarder<'a> {
    events: &'a mpsc::Sender<InvocationEvent>,
    invocation_id: &'a str,
    caller_gone: bool,
}

impl<'a> Forwarder<'a> {
    fn new(events: &'a mpsc::Sender<InvocationEvent>, invocation_id: &'a str) -> Self {
        Self {
            events,
            invocation_id,
            caller_gone: false,
        }
    }

    async fn send(&mut self, line: LogLine) {
        if self.caller_gone {
            return;
        }
        if self.events.send(line.into()).await.is_err() {
            tracing::debug!(
                invocation_id = self.invocation_id,
                "Caller disconnected; draining output without forwarding"
            );
            self.caller_gone = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::event::Channel;
    use crate::provider::{BoxFuture, OutputChunk};

    /// Exits at once but keeps its output channel open, like a process whose
    /// background child inherited the pipes.
    #[derive(Default)]
    struct LingeringOutput {
        senders: Mutex<Vec<mpsc::Sender<OutputChunk>>>,
    }

    impl IsolatedRuntime for LingeringOutput {
        fn id(&self) -> &str {
            "lingering"
        }

        fn write_file<'a>(
            &'a self,
            _path: &'a str,
            _contents: &'a [u8],
        ) -> BoxFuture<'a, anyhow::Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn run<'a>(&'a self, _command: &'a CommandSpec) -> BoxFuture<'a, anyhow::Result<RunningProcess>> {
            Box::pin(async move {
                let (tx, output) = mpsc::channel(8);
                tx.send(OutputChunk::stdout("working\n__RESULT__{\"ok\":1}__END_RESULT__\n"))
                    .await?;
                self.senders.lock().unwrap().push(tx);
                Ok(RunningProcess {
                    output,
                    exit: Box::pin(async { Ok(ExitStatus { code: Some(0) }) }),
                })
            })
        }

        fn stop(&self) -> BoxFuture<'_, anyhow::Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn command() -> CommandSpec {
        CommandSpec {
            program: "worker".into(),
            args: Vec::new(),
        }
    }

    #[tokio::test]
    async fn open_output_after_exit_does_not_block_the_result() {
        let runtime = LingeringOutput::default();
        let (tx, mut rx) = mpsc::channel(16);

        let started = Instant::now();
        let completed = invoke(&runtime, &command(), &tx).await.unwrap();
        assert!(started.elapsed() < OUTPUT_DRAIN_GRACE * 3);
        assert_eq!(completed.value, json!({ "ok": 1 }));

        drop(tx);
        let mut messages = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                InvocationEvent::Log { stream, message, .. } => {
                    assert_eq!(stream, Channel::Stdout);
                    messages.push(message);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(messages, ["working"]);
    }
}
