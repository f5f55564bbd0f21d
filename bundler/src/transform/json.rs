//! JSON transformer: validates the document and exposes it as the module's
//! exports.

use super::{
    config_mismatch, TransformCtx, TransformFailure, TransformOutput, Transformer,
    TransformerConfig,
};

#[derive(Debug)]
pub struct JsonTransformer;

impl Transformer for JsonTransformer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn transform(
        &self,
        ctx: &TransformCtx<'_>,
        code: String,
        config: &TransformerConfig,
    ) -> Result<TransformOutput, TransformFailure> {
        if !matches!(config, TransformerConfig::Json) {
            return Err(config_mismatch(self.name(), config));
        }
        if let Err(err) = serde_json::from_str::<serde_json::Value>(&code) {
            return Err(TransformFailure::new(format!(
                "{} is not valid JSON: {err}",
                ctx.path
            )));
        }
        Ok(TransformOutput {
            code: format!("module.exports = {};\n", code.trim()),
            dependencies: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_json_becomes_module_exports() {
        let out = JsonTransformer
            .transform(
                &TransformCtx { path: "/data.json" },
                "{\"answer\": 42}".to_string(),
                &TransformerConfig::Json,
            )
            .unwrap();
        assert_eq!(out.code, "module.exports = {\"answer\": 42};\n");
    }

    #[test]
    fn invalid_json_is_rejected_with_the_path() {
        let err = JsonTransformer
            .transform(
                &TransformCtx { path: "/data.json" },
                "{broken".to_string(),
                &TransformerConfig::Json,
            )
            .unwrap_err();
        assert!(err.message.contains("/data.json"));
    }
}
