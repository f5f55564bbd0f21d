//! Raw transformer: pass-through for files the packager already transpiled.
//! Dependencies come from the packager's per-file metadata when present,
//! otherwise from a `require()` scan of the code itself.

use super::{
    config_mismatch, javascript, TransformCtx, TransformFailure, TransformOutput, Transformer,
    TransformerConfig,
};

#[derive(Debug)]
pub struct RawTransformer;

impl Transformer for RawTransformer {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn transform(
        &self,
        _ctx: &TransformCtx<'_>,
        code: String,
        config: &TransformerConfig,
    ) -> Result<TransformOutput, TransformFailure> {
        let TransformerConfig::Raw { known_deps } = config else {
            return Err(config_mismatch(self.name(), config));
        };
        let dependencies = if known_deps.is_empty() {
            javascript::collect_dependencies(&code)
        } else {
            known_deps.clone()
        };
        Ok(TransformOutput { code, dependencies })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_requires_when_no_metadata_is_present() {
        let out = RawTransformer
            .transform(
                &TransformCtx {
                    path: "/node_modules/a/index.js",
                },
                "var b = require(\"b\");".to_string(),
                &TransformerConfig::Raw { known_deps: vec![] },
            )
            .unwrap();
        assert_eq!(out.dependencies, vec!["b".to_string()]);
        assert_eq!(out.code, "var b = require(\"b\");");
    }

    #[test]
    fn prefers_packager_metadata() {
        let out = RawTransformer
            .transform(
                &TransformCtx {
                    path: "/node_modules/a/index.js",
                },
                "whatever".to_string(),
                &TransformerConfig::Raw {
                    known_deps: vec!["./lib".to_string()],
                },
            )
            .unwrap();
        assert_eq!(out.dependencies, vec!["./lib".to_string()]);
    }
}
