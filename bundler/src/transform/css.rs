//! CSS transformer: wraps a stylesheet into a module that injects a
//! `<style>` element into the page on evaluation. `@import` statements are
//! hoisted into module dependencies so imported sheets inject first.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{
    config_mismatch, TransformCtx, TransformFailure, TransformOutput, Transformer,
    TransformerConfig,
};

static RE_CSS_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"@import\s+(?:url\s*\(\s*)?['"]([^'"]+)['"]\s*\)?\s*;?"#).unwrap()
});

#[derive(Debug)]
pub struct CssTransformer;

impl Transformer for CssTransformer {
    fn name(&self) -> &'static str {
        "css"
    }

    fn transform(
        &self,
        _ctx: &TransformCtx<'_>,
        code: String,
        config: &TransformerConfig,
    ) -> Result<TransformOutput, TransformFailure> {
        if !matches!(config, TransformerConfig::Css) {
            return Err(config_mismatch(self.name(), config));
        }
        let mut dependencies = Vec::new();
        for caps in RE_CSS_IMPORT.captures_iter(&code) {
            let spec = caps[1].to_string();
            if !dependencies.contains(&spec) {
                dependencies.push(spec);
            }
        }
        let stripped = RE_CSS_IMPORT.replace_all(&code, "").into_owned();
        let mut out = String::new();
        for dep in &dependencies {
            out.push_str(&format!("require({});\n", js_string(dep)));
        }
        out.push_str(&format!("var css = {};\n", js_string(stripped.trim())));
        out.push_str("__sandpit.injectStyle(module.id, css);\n");
        out.push_str("module.exports = {};\n");
        Ok(TransformOutput {
            code: out,
            dependencies,
        })
    }
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(code: &str) -> TransformOutput {
        CssTransformer
            .transform(
                &TransformCtx { path: "/styles.css" },
                code.to_string(),
                &TransformerConfig::Css,
            )
            .unwrap()
    }

    #[test]
    fn wraps_css_into_a_style_injecting_module() {
        let out = run("body { color: red; }");
        assert!(out.code.contains("var css = \"body { color: red; }\";"));
        assert!(out.code.contains("__sandpit.injectStyle(module.id, css);"));
        assert!(out.dependencies.is_empty());
    }

    #[test]
    fn at_imports_become_dependencies() {
        let out = run("@import \"./reset.css\";\nbody { margin: 0; }");
        assert_eq!(out.dependencies, vec!["./reset.css".to_string()]);
        assert!(out.code.contains("require(\"./reset.css\");"));
        assert!(!out.code.contains("@import"));
    }
}
