//! Worker script generation for wisp.
//!
//! Turns a bundle of exported functions, written in a typed JavaScript
//! dialect, into a self-contained script that a plain JavaScript runtime can
//! execute:
//!
//! 1. [`extract`] finds the exported function names (the manifest);
//! 2. [`strip`] erases static-type syntax;
//! 3. [`assemble`] adds a dispatch registry and a command-line entry point.
//!
//! ```rust
//! use wisp_build::{SourceBundle, build_worker};
//!
//! let bundle = SourceBundle::new("export const add = (p: { x: number; y: number }) => ({ sum: p.x + p.y });");
//! let artifact = build_worker(&bundle)?;
//! assert_eq!(artifact.manifest().names(), ["add"]);
//! assert!(artifact.script.source().contains("const add = (p) =>"));
//! # Ok::<(), wisp_build::BuildError>(())
//! ```

pub mod assemble;
pub mod bundle;
pub mod error;
pub mod extract;
pub mod lexer;
pub mod manifest;
pub mod protocol;
pub mod strip;
pub mod syntax;

pub use assemble::{GeneratedScript, assemble};
pub use bundle::{SourceBundle, WorkerArtifact};
pub use error::BuildError;
pub use extract::{extract_functions, require_functions};
pub use manifest::FunctionManifest;
pub use strip::strip_types;

/// Run the whole generation pipeline over one source bundle.
///
/// Fails with [`BuildError::NoExports`] before anything is generated if the
/// bundle exports no functions.
pub fn build_worker(bundle: &SourceBundle) -> Result<WorkerArtifact, BuildError> {
    let manifest = require_functions(bundle.text())?;
    let stripped = strip_types(bundle.text());
    let script = assemble(&stripped, &manifest);
    tracing::debug!(
        functions = manifest.len(),
        script_bytes = script.source().len(),
        "Generated worker script"
    );
    Ok(WorkerArtifact {
        source_digest: bundle.digest(),
        script,
    })
}
