//! # sandpit-vfs - layered virtual file system
//!
//! The bundler never touches the host disk: every source file, shim and
//! fetched package lives in an ordered stack of layers behind [`FileSystem`].
//! A read walks the stack top-down and is satisfied by the first layer that
//! reports existence; writes always land in the topmost in-memory layer.
//!
//! Three layer kinds exist:
//!
//! - [`fs::MemoryLayer`] - hash map of user files and built-in shims.
//! - [`bridge::BridgeLayer`] - forwards missed async reads to an external
//!   file resolver over a request/response channel.
//! - a package layer over a [`fs::FileSource`], implemented by the package
//!   registry for everything under `/node_modules`.

pub mod bridge;
pub mod error;
pub mod fs;
pub mod path;

pub use bridge::{serve_file_requests, BridgeLayer, FileRequest};
pub use error::{VfsError, VfsResult};
pub use fs::{FileSource, FileSystem, FileSystemBuilder, Layer, MemoryLayer};
