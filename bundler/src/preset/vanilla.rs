//! The vanilla preset: plain JavaScript/TypeScript projects, no framework
//! packages, hot replacement disabled (edits reload the page).

use std::sync::Arc;

use crate::error::BundleError;
use crate::transform::{
    CssTransformer, JavascriptTransformer, JsonTransformer, RawTransformer,
    TypescriptTransformer, TransformerConfig,
};

use super::Preset;

pub(super) const CONSOLE_RUNTIME: &str = include_str!("runtime/console.js");

const DEFAULT_HTML: &str = "<!DOCTYPE html>\n<html>\n  <head></head>\n  <body>\n    <div id=\"app\"></div>\n  </body>\n</html>\n";

const ENTRIES: &[&str] = &[
    "/index.js",
    "/src/index.js",
    "/index.ts",
    "/src/index.ts",
];

pub fn vanilla() -> Result<Preset, BundleError> {
    Preset::builder("vanilla")
        .entries(ENTRIES)
        .default_html(DEFAULT_HTML)
        .hmr(false)
        .runtime("/.sandpit/console.js", CONSOLE_RUNTIME)
        .register(Arc::new(JavascriptTransformer))
        .register(Arc::new(TypescriptTransformer))
        .register(Arc::new(CssTransformer))
        .register(Arc::new(JsonTransformer))
        .register(Arc::new(RawTransformer))
        .rule(
            &["js", "jsx", "mjs", "cjs"],
            vec![("js", TransformerConfig::Javascript(Default::default()))],
        )
        .rule(
            &["ts", "tsx"],
            vec![
                ("ts", TransformerConfig::Typescript),
                ("js", TransformerConfig::Javascript(Default::default())),
            ],
        )
        .rule(&["css"], vec![("css", TransformerConfig::Css)])
        .rule(&["json"], vec![("json", TransformerConfig::Json)])
        .build()
}
