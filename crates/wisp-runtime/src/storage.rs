use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use wisp_build::{SourceBundle, WorkerArtifact};

use crate::error::RuntimeError;

const SOURCE_FILE: &str = "source.ts";
const SCRIPT_FILE: &str = "worker.mjs";
const MANIFEST_FILE: &str = "manifest.json";
const META_FILE: &str = "meta.json";

/// Record describing one deployed worker version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerMeta {
    /// `{name}@{first 12 hex of the source digest}`
    pub worker_id: String,
    pub name: String,
    /// SHA-256 hex of the source bundle.
    pub source_digest: String,
    pub functions: Vec<String>,
    /// Deployment timestamp (Unix ms)
    pub deployed_at: i64,
}

/// Disk-backed artifact cache.
///
/// Layout under `base_dir`:
/// ```text
/// {base_dir}/
///   {worker_id}/
///     source.ts      - the submitted bundle
///     worker.mjs     - generated script
///     manifest.json  - { "functions": [...] }
///     meta.json      - WorkerMeta
/// ```
pub struct ArtifactStore {
    base_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".wisp")
            .join("workers")
    }

    pub fn init(&self) -> Result<(), RuntimeError> {
        std::fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }

    pub fn worker_dir(&self, worker_id: &str) -> PathBuf {
        self.base_dir.join(worker_id)
    }

    /// Write the bundle, its generated artifacts and metadata.
    pub fn store(
        &self,
        bundle: &SourceBundle,
        artifact: &WorkerArtifact,
        meta: &WorkerMeta,
    ) -> Result<(), RuntimeError> {
        let dir = self.worker_dir(&meta.worker_id);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(SOURCE_FILE), bundle.text())?;
        std::fs::write(dir.join(SCRIPT_FILE), artifact.script.source())?;
        std::fs::write(dir.join(MANIFEST_FILE), artifact.manifest_json()?)?;
        // Metadata last: its presence marks a complete entry.
        std::fs::write(dir.join(META_FILE), serde_json::to_string_pretty(meta)?)?;
        Ok(())
    }

    pub fn load_meta(&self, worker_id: &str) -> Result<WorkerMeta, RuntimeError> {
        let path = self.worker_dir(worker_id).join(META_FILE);
        let content = std::fs::read_to_string(&path)
            .map_err(|_| RuntimeError::WorkerNotFound(worker_id.to_string()))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn load_source(&self, worker_id: &str) -> Result<SourceBundle, RuntimeError> {
        let path = self.worker_dir(worker_id).join(SOURCE_FILE);
        let text = std::fs::read_to_string(&path).map_err(|e| {
            RuntimeError::StorageError(format!("Cannot read {}: {e}", path.display()))
        })?;
        Ok(SourceBundle::new(text))
    }

    /// List all worker IDs on disk (directories with a `meta.json`).
    pub fn list_worker_ids(&self) -> Result<Vec<String>, RuntimeError> {
        let mut ids = Vec::new();
        if !self.base_dir.exists() {
            return Ok(ids);
        }
        for entry in std::fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            if entry.path().join(META_FILE).is_file() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn remove(&self, worker_id: &str) -> Result<(), RuntimeError> {
        let dir = self.worker_dir(worker_id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (SourceBundle, WorkerArtifact, WorkerMeta) {
        let bundle = SourceBundle::new("export function echo(p: unknown) { return p; }");
        let artifact = wisp_build::build_worker(&bundle).unwrap();
        let meta = WorkerMeta {
            worker_id: "echo@abc".into(),
            name: "echo".into(),
            source_digest: artifact.source_digest.clone(),
            functions: artifact.manifest().names().to_vec(),
            deployed_at: 0,
        };
        (bundle, artifact, meta)
    }

    #[test]
    fn stores_and_lists_workers() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ArtifactStore::new(tmp.path().to_path_buf());
        store.init().unwrap();
        let (bundle, artifact, meta) = sample();

        store.store(&bundle, &artifact, &meta).unwrap();

        let dir = store.worker_dir("echo@abc");
        assert!(dir.join("worker.mjs").is_file());
        let manifest = std::fs::read_to_string(dir.join("manifest.json")).unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&manifest).unwrap(),
            serde_json::json!({ "functions": ["echo"] })
        );
        assert_eq!(store.list_worker_ids().unwrap(), ["echo@abc"]);
        assert_eq!(store.load_meta("echo@abc").unwrap(), meta);
        assert_eq!(store.load_source("echo@abc").unwrap(), bundle);
    }

    #[test]
    fn incomplete_entries_are_not_listed() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ArtifactStore::new(tmp.path().to_path_buf());
        std::fs::create_dir_all(tmp.path().join("half@000")).unwrap();
        assert!(store.list_worker_ids().unwrap().is_empty());
        assert!(matches!(
            store.load_meta("half@000"),
            Err(RuntimeError::WorkerNotFound(_))
        ));
    }

    #[test]
    fn remove_deletes_the_entry() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ArtifactStore::new(tmp.path().to_path_buf());
        let (bundle, artifact, meta) = sample();
        store.store(&bundle, &artifact, &meta).unwrap();

        store.remove("echo@abc").unwrap();
        assert!(!store.worker_dir("echo@abc").exists());
        store.remove("echo@abc").unwrap();
    }
}
