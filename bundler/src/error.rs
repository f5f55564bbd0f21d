//! Error taxonomy of the compilation engine.
//!
//! Transformer failures are captured on the owning module rather than thrown
//! through the scheduler, so sibling modules keep compiling; the closure
//! await at `module_finished` surfaces the first captured error and ends the
//! compile. Runtime exceptions are caught at the evaluate call site only.

use std::sync::Arc;

use thiserror::Error;

use sandpit_registry::RegistryError;
use sandpit_vfs::VfsError;

/// Clonable handle for errors that travel through shared futures and module
/// records.
pub type SharedError = Arc<BundleError>;

#[derive(Debug, Error)]
pub enum BundleError {
    /// FS miss or resolver miss. Non-fatal to modules outside the failing
    /// closure.
    #[error("Cannot find module '{specifier}' (required from {origin})")]
    ModuleNotFound { specifier: String, origin: String },

    /// A transformer rejected the module.
    #[error("Failed to transpile {path}: {message}")]
    Transform { path: String, message: String },

    /// Neither package.json `main` nor any preset candidate resolved. The
    /// orchestrator special-cases this into the empty-state surface.
    #[error("Could not find an entry point for this project")]
    EntryPointUnresolved,

    /// Manifest or package fetch exhausted retries and fallbacks.
    #[error("{0}")]
    Registry(Arc<RegistryError>),

    /// Exception thrown while evaluating the linked program.
    #[error("Runtime exception: {message}")]
    Evaluation {
        message: String,
        stack: Option<String>,
    },

    /// Compile attempted before preset initialization.
    #[error("Compile was attempted before the preset was initialized")]
    PresetMissing,

    #[error("Unknown template '{0}'")]
    UnknownTemplate(String),

    #[error(transparent)]
    Fs(#[from] VfsError),

    /// The embedded engine failed outside of script execution.
    #[error("Evaluation engine error: {0}")]
    Engine(String),
}

impl BundleError {
    pub fn not_found(specifier: impl Into<String>, origin: impl Into<String>) -> Self {
        BundleError::ModuleNotFound {
            specifier: specifier.into(),
            origin: origin.into(),
        }
    }

    pub fn is_entry_point_unresolved(&self) -> bool {
        matches!(self, BundleError::EntryPointUnresolved)
    }
}

impl From<Arc<RegistryError>> for BundleError {
    fn from(err: Arc<RegistryError>) -> Self {
        BundleError::Registry(err)
    }
}
