use std::path::Path;

use sha2::{Digest, Sha256};

use crate::assemble::GeneratedScript;
use crate::manifest::FunctionManifest;

/// Raw user-submitted source text. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBundle {
    text: String,
}

impl SourceBundle {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        Ok(Self::new(std::fs::read_to_string(path)?))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// SHA-256 hex of the source text; identifies this version of the bundle.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.text.as_bytes()))
    }
}

/// Everything produced from one [`SourceBundle`] version.
#[derive(Debug, Clone)]
pub struct WorkerArtifact {
    pub source_digest: String,
    pub script: GeneratedScript,
}

impl WorkerArtifact {
    pub fn manifest(&self) -> &FunctionManifest {
        self.script.manifest()
    }

    /// The `{ "functions": [...] }` file written beside the script.
    pub fn manifest_json(&self) -> Result<String, serde_json::Error> {
        self.script.manifest().to_json()
    }
}
