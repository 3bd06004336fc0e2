use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt};
use wisp_build::{SourceBundle, build_worker, require_functions};
use wisp_runtime::{InvocationEvent, LifecycleManager, WispConfig};

#[derive(Parser)]
#[command(name = "wisp", about = "Build and invoke wisp function workers from exported source")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the exported function manifest of a source file
    Manifest {
        /// Worker source file
        file: PathBuf,
    },
    /// Generate the worker script and manifest
    Build {
        /// Worker source file
        file: PathBuf,
        /// Directory to write the script and manifest into; the script is
        /// printed to stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
        /// Path to wisp.toml (defaults to ./wisp.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run one exported function, printing events as JSON lines
    Invoke {
        /// Worker source file
        file: PathBuf,
        /// Exported function to call
        function: String,
        /// JSON payload passed to the function
        #[arg(default_value = "{}")]
        payload: String,
        /// Path to wisp.toml (defaults to ./wisp.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr so stdout carries only command output
    fmt()
        .with_env_filter(EnvFilter::from_env("WISP_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Manifest { file } => manifest(&file),
        Command::Build { file, out, config } => build(&file, out.as_deref(), config.as_deref()),
        Command::Invoke {
            file,
            function,
            payload,
            config,
        } => invoke(&file, &function, &payload, config.as_deref()).await,
    }
}

fn read_bundle(file: &Path) -> Result<SourceBundle> {
    SourceBundle::from_file(file).with_context(|| format!("Failed to read {}", file.display()))
}

fn manifest(file: &Path) -> Result<ExitCode> {
    let bundle = read_bundle(file)?;
    let manifest = require_functions(bundle.text())?;
    println!("{}", manifest.to_json()?);
    Ok(ExitCode::SUCCESS)
}

fn build(file: &Path, out: Option<&Path>, config: Option<&Path>) -> Result<ExitCode> {
    let bundle = read_bundle(file)?;
    let artifact = build_worker(&bundle)?;

    let Some(out) = out else {
        print!("{}", artifact.script.source());
        return Ok(ExitCode::SUCCESS);
    };

    let layout = WispConfig::load(config)?.layout();
    std::fs::create_dir_all(out).with_context(|| format!("Failed to create {}", out.display()))?;
    let script_path = out.join(&layout.script_name);
    let manifest_path = out.join(&layout.manifest_name);
    std::fs::write(&script_path, artifact.script.source())?;
    std::fs::write(&manifest_path, artifact.manifest_json()?)?;

    tracing::info!(
        script = %script_path.display(),
        manifest = %manifest_path.display(),
        source_digest = artifact.source_digest,
        "Worker script written"
    );
    eprintln!(
        "Wrote {} ({} functions)",
        script_path.display(),
        artifact.manifest().len()
    );
    Ok(ExitCode::SUCCESS)
}

async fn invoke(
    file: &Path,
    function: &str,
    payload: &str,
    config: Option<&Path>,
) -> Result<ExitCode> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("Payload is not valid JSON")?;
    let bundle = read_bundle(file)?;
    let config = WispConfig::load(config)?;

    let manager = LifecycleManager::new(
        config.build_provider(),
        config.layout(),
        config.runtime.mode,
    );
    let meta = manager.deploy(&worker_name(file), bundle).await?;

    let (tx, mut rx) = mpsc::channel::<InvocationEvent>(64);
    let printer = tokio::spawn(async move {
        let mut success = false;
        while let Some(event) = rx.recv().await {
            if let InvocationEvent::Result { success: ok, .. } = &event {
                success = *ok;
            }
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!("Failed to serialize event: {e}"),
            }
        }
        success
    });

    // The outcome is carried by the terminal event.
    let _ = manager.invoke(&meta.worker_id, function, &payload, &tx).await;
    drop(tx);
    let success = printer.await?;
    manager.shutdown().await;

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Worker name derived from the file stem, restricted to `[A-Za-z0-9_-]`.
fn worker_name(file: &Path) -> String {
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect();
    if name.is_empty() { "worker".into() } else { name }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_names_are_sanitized() {
        assert_eq!(worker_name(Path::new("src/math.ts")), "math");
        assert_eq!(worker_name(Path::new("my worker.v2.ts")), "my_worker_v2");
        assert_eq!(worker_name(Path::new("/")), "worker");
    }

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
