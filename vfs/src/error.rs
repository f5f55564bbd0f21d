//! Error types for virtual file system operations

use thiserror::Error;

/// Result type for file system operations
pub type VfsResult<T> = Result<T, VfsError>;

#[derive(Debug, Error)]
pub enum VfsError {
    /// No layer could satisfy the read. Carries the requested path.
    #[error("Module {path} not found")]
    NotFound { path: String },

    /// A write was attempted against a stack with no in-memory layer.
    #[error("File system has no writable layer for {path}")]
    NoWritableLayer { path: String },
}

impl VfsError {
    pub fn not_found(path: impl Into<String>) -> Self {
        VfsError::NotFound { path: path.into() }
    }
}
