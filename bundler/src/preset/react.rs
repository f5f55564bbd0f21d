//! The react preset: JSX entry candidates, framework packages injected with
//! default versions, hot replacement enabled.

use std::sync::Arc;

use sandpit_registry::DependencySet;

use crate::error::BundleError;
use crate::transform::{
    CssTransformer, JavascriptTransformer, JsonTransformer, RawTransformer,
    TypescriptTransformer, TransformerConfig,
};

use super::vanilla::CONSOLE_RUNTIME;
use super::Preset;

const REFRESH_RUNTIME: &str = include_str!("runtime/refresh.js");

const DEFAULT_HTML: &str = "<!DOCTYPE html>\n<html>\n  <head></head>\n  <body>\n    <div id=\"root\"></div>\n  </body>\n</html>\n";

const ENTRIES: &[&str] = &[
    "/index.js",
    "/src/index.js",
    "/index.jsx",
    "/src/index.jsx",
    "/index.tsx",
    "/src/index.tsx",
];

fn augment(deps: &mut DependencySet) {
    if !deps.contains_key("react") {
        deps.insert("react".to_string(), "^18.2.0".to_string());
    }
    if !deps.contains_key("react-dom") {
        deps.insert("react-dom".to_string(), "^18.2.0".to_string());
    }
}

pub fn react() -> Result<Preset, BundleError> {
    Preset::builder("react")
        .entries(ENTRIES)
        .default_html(DEFAULT_HTML)
        .hmr(true)
        .runtime("/.sandpit/console.js", CONSOLE_RUNTIME)
        .runtime("/.sandpit/refresh.js", REFRESH_RUNTIME)
        .augment(augment)
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
