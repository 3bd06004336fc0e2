use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::RuntimeError;
use crate::local::LocalProcessProvider;
use crate::provider::ExecutionProvider;
use crate::session::ScriptLayout;

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "wisp.toml";

#[derive(Debug, Default, Deserialize)]
pub struct WispConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default)]
    pub interpreter_args: Vec<String>,
    #[serde(default = "default_script_name")]
    pub script_name: String,
    #[serde(default = "default_manifest_name")]
    pub manifest_name: String,
    pub work_dir: Option<PathBuf>,
    /// Zero disables the timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub mode: SessionMode,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            interpreter_args: Vec::new(),
            script_name: default_script_name(),
            manifest_name: default_manifest_name(),
            work_dir: None,
            timeout_secs: default_timeout_secs(),
            mode: SessionMode::default(),
        }
    }
}

fn default_interpreter() -> String {
    "node".into()
}
fn default_script_name() -> String {
    "worker.mjs".into()
}
fn default_manifest_name() -> String {
    "manifest.json".into()
}
fn default_timeout_secs() -> u64 {
    30
}

/// How long an isolated runtime lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionMode {
    /// A fresh runtime for every invocation, stopped when it completes.
    #[default]
    PerInvocation,
    /// One runtime per deployed worker version, stopped on undeploy.
    LongLived,
}

#[derive(Debug, Default, Deserialize)]
pub struct StoreConfig {
    /// Artifact directory; `~/.wisp/workers` when unset.
    pub dir: Option<PathBuf>,
}

impl WispConfig {
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, RuntimeError> {
        let mut config: WispConfig = toml::from_str(content)
            .map_err(|e| RuntimeError::Config(format!("Failed to parse config: {e}")))?;
        config.apply_env();
        Ok(config)
    }

    /// Load `path`, or `./wisp.toml` if present, or the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, RuntimeError> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::from_file(local);
        }
        let mut config = WispConfig::default();
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(interpreter) = std::env::var("WISP_INTERPRETER")
            && !interpreter.trim().is_empty()
        {
            self.runtime.interpreter = interpreter;
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.runtime.timeout_secs > 0).then(|| Duration::from_secs(self.runtime.timeout_secs))
    }

    pub fn layout(&self) -> ScriptLayout {
        ScriptLayout {
            interpreter: self.runtime.interpreter.clone(),
            interpreter_args: self.runtime.interpreter_args.clone(),
            script_name: self.runtime.script_name.clone(),
            manifest_name: self.runtime.manifest_name.clone(),
        }
    }

    pub fn build_provider(&self) -> Arc<dyn ExecutionProvider> {
        let mut provider = LocalProcessProvider::new();
        if let Some(dir) = &self.runtime.work_dir {
            provider = provider.with_work_dir(dir);
        }
        if let Some(timeout) = self.timeout() {
            provider = provider.with_timeout(timeout);
        }
        Arc::new(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: WispConfig = toml::from_str("").unwrap();
        assert_eq!(config.runtime.interpreter, "node");
        assert_eq!(config.runtime.script_name, "worker.mjs");
        assert_eq!(config.runtime.manifest_name, "manifest.json");
        assert_eq!(config.runtime.timeout_secs, 30);
        assert_eq!(config.runtime.mode, SessionMode::PerInvocation);
        assert!(config.store.dir.is_none());
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn parses_full_config() {
        let toml_str = r#"
[runtime]
interpreter = "deno"
interpreter_args = ["run", "--quiet"]
script_name = "main.js"
manifest_name = "functions.json"
work_dir = "/var/tmp/wisp"
timeout_secs = 0
mode = "long-lived"

[store]
dir = "/srv/wisp/workers"
"#;
        let config: WispConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.runtime.interpreter, "deno");
        assert_eq!(config.runtime.mode, SessionMode::LongLived);
        assert_eq!(config.runtime.work_dir, Some(PathBuf::from("/var/tmp/wisp")));
        assert_eq!(config.store.dir, Some(PathBuf::from("/srv/wisp/workers")));
        assert_eq!(config.timeout(), None);

        let command = config.layout().command("echo", "{}");
        assert_eq!(command.program, "deno");
        assert_eq!(command.args, ["run", "--quiet", "main.js", "echo", "{}"]);
    }

    #[test]
    fn rejects_unknown_mode() {
        let err = WispConfig::parse("[runtime]\nmode = \"forever\"\n").unwrap_err();
        assert!(matches!(err, RuntimeError::Config(_)));
    }

    #[test]
    fn reads_config_from_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("wisp.toml");
        std::fs::write(&path, "[runtime]\ntimeout_secs = 5\n").unwrap();
        let config = WispConfig::load(Some(&path)).unwrap();
        assert_eq!(config.timeout(), Some(Duration::from_secs(5)));
    }
}
