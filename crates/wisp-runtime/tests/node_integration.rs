//! End-to-end tests running generated scripts with a real interpreter.
//!
//! They require `node` on PATH.
//!
//! Run with: `cargo test -p wisp-runtime --test node_integration -- --include-ignored`

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use wisp_build::SourceBundle;
use wisp_runtime::{
    CommandSpec, InvocationEvent, IsolatedRuntime, LifecycleManager, LocalProcessProvider,
    RunningProcess, RuntimeError, ScriptLayout, SessionMode,
};

const WORKER: &str = r#"
import type { Logger } from "./logger";

type Point = { x: number; y: number };

export async function echo(payload: unknown): Promise<unknown> {
  return payload;
}

export const add = (p: Point): { sum: number } => ({ sum: p.x + p.y });

export const boom = async function (): Promise<never> {
  throw new Error("boom");
};

export function chatty(): string {
  for (let i: number = 1; i <= 5; i++) {
    console.log(`line ${i}`);
  }
  console.error("warning!");
  return "done";
}
"#;

fn manager(mode: SessionMode) -> LifecycleManager {
    let provider = LocalProcessProvider::new().with_timeout(Duration::from_secs(30));
    LifecycleManager::new(Arc::new(provider), ScriptLayout::default(), mode)
}

async fn invoke(
    manager: &LifecycleManager,
    function: &str,
    payload: Value,
) -> (Result<Value, RuntimeError>, Vec<InvocationEvent>) {
    let (tx, mut rx) = mpsc::channel(64);
    let outcome = manager.invoke("demo", function, &payload, &tx).await;
    drop(tx);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (outcome.map(|c| c.value), events)
}

#[tokio::test]
#[ignore = "requires node on PATH"]
async fn scenarios_run_under_node() {
    for mode in [SessionMode::PerInvocation, SessionMode::LongLived] {
        let manager = manager(mode);
        manager.deploy("demo", SourceBundle::new(WORKER)).await.unwrap();

        let (echo, _) = invoke(&manager, "echo", json!({ "msg": "hi" })).await;
        assert_eq!(echo.unwrap(), json!({ "msg": "hi" }));

        let (add, _) = invoke(&manager, "add", json!({ "x": 2, "y": 3 })).await;
        assert_eq!(add.unwrap(), json!({ "sum": 5 }));

        let (boom, events) = invoke(&manager, "boom", json!({})).await;
        assert!(matches!(boom, Err(RuntimeError::UserFunction { ref message }) if message == "boom"));
        assert_eq!(
            events.last(),
            Some(&InvocationEvent::Error {
                error: "boom".into()
            })
        );

        let (chatty, events) = invoke(&manager, "chatty", json!({})).await;
        assert_eq!(chatty.unwrap(), json!("done"));
        let stdout: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                InvocationEvent::Log { stream, message, .. }
                    if *stream == wisp_runtime::Channel::Stdout =>
                {
                    Some(message.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(stdout, ["line 1", "line 2", "line 3", "line 4", "line 5"]);
        assert!(events.iter().any(|e| matches!(
            e,
            InvocationEvent::Log { message, .. } if message == "warning!"
        )));

        manager.shutdown().await;
    }
}

#[tokio::test]
#[ignore = "requires node on PATH"]
async fn unknown_function_exits_non_zero_without_result() {
    let artifact = wisp_build::build_worker(&SourceBundle::new(WORKER)).unwrap();
    let provider = LocalProcessProvider::new();
    let runtime = wisp_runtime::ExecutionProvider::create_runtime(&provider)
        .await
        .unwrap();
    runtime
        .write_file("worker.mjs", artifact.script.source().as_bytes())
        .await
        .unwrap();

    let command = CommandSpec {
        program: "node".into(),
        args: vec!["worker.mjs".into(), "nope".into(), "{}".into()],
    };
    let (stdout, stderr, code) = collect(runtime.as_ref(), &command).await;
    assert_eq!(code, Some(1));
    assert!(!stdout.contains("__RESULT__"));
    assert!(stderr.contains(r#"Function "nope" not found"#));
    assert!(stderr.contains("echo, add, boom, chatty"));

    let usage = CommandSpec {
        program: "node".into(),
        args: vec!["worker.mjs".into()],
    };
    let (stdout, stderr, code) = collect(runtime.as_ref(), &usage).await;
    assert_eq!(code, Some(1));
    assert!(stdout.is_empty());
    assert!(stderr.contains("Usage: run <functionName> [<jsonPayload>]"));

    runtime.stop().await.unwrap();
}

async fn collect(runtime: &dyn IsolatedRuntime, command: &CommandSpec) -> (String, String, Option<i32>) {
    let RunningProcess { mut output, exit } = runtime.run(command).await.unwrap();
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    while let Some(chunk) = output.recv().await {
        match chunk.channel {
            wisp_runtime::Channel::Stdout => stdout.extend(chunk.data),
            wisp_runtime::Channel::Stderr => stderr.extend(chunk.data),
        }
    }
    let status = exit.await.unwrap();
    (
        String::from_utf8_lossy(&stdout).into_owned(),
        String::from_utf8_lossy(&stderr).into_owned(),
        status.code,
    )
}
