//! Transformer contract.
//!
//! A transformer is a pure function from `(code, config)` to compiled code
//! plus the dependencies it discovered; the module handle is provided for
//! path inspection only. Configs are a tagged union with one variant per
//! known transformer, so a chain is validated when the preset registers it
//! rather than when a module compiles.

use std::fmt;

pub mod css;
pub mod javascript;
pub mod json;
pub mod raw;
pub mod typescript;

pub use css::CssTransformer;
pub use javascript::JavascriptTransformer;
pub use json::JsonTransformer;
pub use raw::RawTransformer;
pub use typescript::TypescriptTransformer;

pub struct TransformCtx<'a> {
    pub path: &'a str,
}

#[derive(Debug, Clone, Default)]
pub struct TransformOutput {
    pub code: String,
    pub dependencies: Vec<String>,
}

/// A transformer rejected its input. Captured on the module by the
/// scheduler; never thrown across sibling compiles.
#[derive(Debug, Clone)]
pub struct TransformFailure {
    pub message: String,
}

impl TransformFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for TransformFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone)]
pub struct JavascriptConfig {
    /// Substituted for `process.env.NODE_ENV` during lowering.
    pub node_env: String,
}

impl Default for JavascriptConfig {
    fn default() -> Self {
        Self {
            node_env: "development".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TransformerConfig {
    Javascript(JavascriptConfig),
    Typescript,
    Css,
    Json,
    Raw {
        /// Dependency specifiers reported by the packager for this file.
        known_deps: Vec<String>,
    },
}

impl TransformerConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            TransformerConfig::Javascript(_) => "js",
            TransformerConfig::Typescript => "ts",
            TransformerConfig::Css => "css",
            TransformerConfig::Json => "json",
            TransformerConfig::Raw { .. } => "raw",
        }
    }
}

pub trait Transformer: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Whether a config variant belongs to this transformer; checked at
    /// preset registration.
    fn accepts(&self, config: &TransformerConfig) -> bool {
        config.kind() == self.name()
    }

    fn transform(
        &self,
        ctx: &TransformCtx<'_>,
        code: String,
        config: &TransformerConfig,
    ) -> Result<TransformOutput, TransformFailure>;
}

pub(crate) fn config_mismatch(name: &str, config: &TransformerConfig) -> TransformFailure {
    TransformFailure::new(format!(
        "transformer '{name}' received config for '{}'",
        config.kind()
    ))
}
