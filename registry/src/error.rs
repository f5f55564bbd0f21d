//! Error types for registry operations

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Every configured CDN (primary plus fallbacks) was exhausted.
    #[error("Could not fetch {name}@{version} from any configured CDN")]
    PackageFetch { name: String, version: String },

    /// A CDN answered but the payload did not parse.
    #[error("Malformed package payload for {name}@{version}: {message}")]
    MalformedPackage {
        name: String,
        version: String,
        message: String,
    },
}
