//! JavaScript transformer: lowers ES module syntax to the CommonJS shape the
//! linker executes, substitutes `process.env.NODE_ENV`, and collects the
//! module's dependency specifiers from the lowered output.
//!
//! The lowering is pattern-based over precompiled regexes. It covers the
//! import/export forms that appear in application code; module syntax inside
//! string literals is the known trade-off of this approach.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::{
    config_mismatch, TransformCtx, TransformFailure, TransformOutput, Transformer,
    TransformerConfig,
};

static RE_DYNAMIC_IMPORT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bimport\s*\(").unwrap());
static RE_IMPORT_NS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)\bimport\s*\*\s*as\s+([A-Za-z_$][\w$]*)\s+from\s*['"]([^'"]+)['"]\s*;?"#)
        .unwrap()
});
static RE_IMPORT_DEFAULT_AND_NS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)\bimport\s+([A-Za-z_$][\w$]*)\s*,\s*\*\s*as\s+([A-Za-z_$][\w$]*)\s+from\s*['"]([^'"]+)['"]\s*;?"#,
    )
    .unwrap()
});
static RE_IMPORT_DEFAULT_AND_NAMED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)\bimport\s+([A-Za-z_$][\w$]*)\s*,\s*\{([^}]*)\}\s*from\s*['"]([^'"]+)['"]\s*;?"#,
    )
    .unwrap()
});
static RE_IMPORT_NAMED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)\bimport\s*\{([^}]*)\}\s*from\s*['"]([^'"]+)['"]\s*;?"#).unwrap()
});
static RE_IMPORT_DEFAULT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bimport\s+([A-Za-z_$][\w$]*)\s+from\s*['"]([^'"]+)['"]\s*;?"#).unwrap()
});
static RE_IMPORT_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bimport\s*['"]([^'"]+)['"]\s*;?"#).unwrap());
static RE_EXPORT_NAMED_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)\bexport\s*\{([^}]*)\}\s*from\s*['"]([^'"]+)['"]\s*;?"#).unwrap()
});
static RE_EXPORT_STAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bexport\s*\*\s*from\s*['"]([^'"]+)['"]\s*;?"#).unwrap());
static RE_EXPORT_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bexport\s+(async\s+function|function|class|const|let|var)\s+([A-Za-z_$][\w$]*)")
        .unwrap()
});
static RE_EXPORT_DEFAULT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bexport\s+default\s+").unwrap());
static RE_EXPORT_BRACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\bexport\s*\{([^}]*)\}\s*;?").unwrap());
static RE_NODE_ENV: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bprocess\.env\.NODE_ENV\b").unwrap());
static RE_REQUIRE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\brequire\s*\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap());
static RE_DYNAMIC_DEP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"dynamicImport\s*\(\s*require\s*,\s*['"]([^'"]+)['"]"#).unwrap()
});

/// Rewrite ESM syntax into the `(require, module, exports)` shape.
pub fn lower(code: &str, node_env: &str) -> String {
    let mut saw_exports = false;
    let mut tail: Vec<String> = Vec::new();
    let mut reexport_counter = 0usize;

    let out = RE_DYNAMIC_IMPORT
        .replace_all(code, "__sandpit.dynamicImport(require, ")
        .into_owned();

    let out = RE_IMPORT_DEFAULT_AND_NS.replace_all(&out, |caps: &Captures| {
        format!(
            "var {} = __sandpit.interopDefault(require(\"{}\")); var {} = require(\"{}\");",
            &caps[1], &caps[3], &caps[2], &caps[3]
        )
    });
    let out = RE_IMPORT_DEFAULT_AND_NAMED.replace_all(&out, |caps: &Captures| {
        format!(
            "var {} = __sandpit.interopDefault(require(\"{}\")); var {{ {} }} = require(\"{}\");",
            &caps[1],
            &caps[3],
            destructure_list(&caps[2]),
            &caps[3]
        )
    });
    let out = RE_IMPORT_NS.replace_all(&out, |caps: &Captures| {
        format!("var {} = require(\"{}\");", &caps[1], &caps[2])
    });
    let out = RE_IMPORT_NAMED.replace_all(&out, |caps: &Captures| {
        format!(
            "var {{ {} }} = require(\"{}\");",
            destructure_list(&caps[1]),
            &caps[2]
        )
    });
    let out = RE_IMPORT_DEFAULT.replace_all(&out, |caps: &Captures| {
        format!(
            "var {} = __sandpit.interopDefault(require(\"{}\"));",
            &caps[1], &caps[2]
        )
    });
    let out = RE_IMPORT_BARE.replace_all(&out, |caps: &Captures| {
        format!("require(\"{}\");", &caps[1])
    });

    let out = RE_EXPORT_NAMED_FROM.replace_all(&out, |caps: &Captures| {
        saw_exports = true;
        reexport_counter += 1;
        let source = format!("__reexport{reexport_counter}");
        let mut stmts = format!("var {} = require(\"{}\");", source, &caps[2]);
        for (local, exported) in export_list(&caps[1]) {
            stmts.push_str(&format!(" exports.{exported} = {source}.{local};"));
        }
        stmts
    });
    let out = RE_EXPORT_STAR.replace_all(&out, |caps: &Captures| {
        saw_exports = true;
        format!("__sandpit.reexport(exports, require(\"{}\"));", &caps[1])
    });
    let out = RE_EXPORT_DECL.replace_all(&out, |caps: &Captures| {
        saw_exports = true;
        let name = caps[2].to_string();
        tail.push(format!("exports.{name} = {name};"));
        format!("{} {}", &caps[1], name)
    });
    let out = RE_EXPORT_DEFAULT.replace_all(&out, |_caps: &Captures| {
        saw_exports = true;
        "exports.default = ".to_string()
    });
    let out = RE_EXPORT_BRACE.replace_all(&out, |caps: &Captures| {
        saw_exports = true;
        export_list(&caps[1])
            .into_iter()
            .map(|(local, exported)| format!("exports.{exported} = {local};"))
            .collect::<Vec<_>>()
            .join(" ")
    });

    let env_literal =
        serde_json::Value::String(node_env.to_string()).to_string();
    let mut out = RE_NODE_ENV.replace_all(&out, env_literal.as_str()).into_owned();

    if saw_exports {
        out = format!("exports.__esModule = true;\n{out}");
    }
    if !tail.is_empty() {
        out.push('\n');
        out.push_str(&tail.join("\n"));
        out.push('\n');
    }
    out
}

/// Dependency specifiers of lowered code: `require("...")` calls plus
/// lowered dynamic imports, deduplicated in discovery order.
pub fn collect_dependencies(code: &str) -> Vec<String> {
    let mut deps: Vec<String> = Vec::new();
    for caps in RE_REQUIRE
        .captures_iter(code)
        .chain(RE_DYNAMIC_DEP.captures_iter(code))
    {
        let spec = caps[1].to_string();
        if !deps.contains(&spec) {
            deps.push(spec);
        }
    }
    deps
}

/// `a, b as c` to `a, b: c` for destructuring.
fn destructure_list(list: &str) -> String {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| match split_as(item) {
            Some((from, to)) => format!("{from}: {to}"),
            None => item.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `a, b as c` to `[(a, a), (b, c)]` as (local, exported) pairs.
fn export_list(list: &str) -> Vec<(String, String)> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| match split_as(item) {
            Some((from, to)) => (from.to_string(), to.to_string()),
            None => (item.to_string(), item.to_string()),
        })
        .collect()
}

fn split_as(item: &str) -> Option<(&str, &str)> {
    let mut parts = item.split_whitespace();
    let from = parts.next()?;
    let kw = parts.next()?;
    let to = parts.next()?;
    (kw == "as" && parts.next().is_none()).then_some((from, to))
}

#[derive(Debug)]
pub struct JavascriptTransformer;

impl Transformer for JavascriptTransformer {
    fn name(&self) -> &'static str {
        "js"
    }

    fn transform(
        &self,
        _ctx: &TransformCtx<'_>,
        code: String,
        config: &TransformerConfig,
    ) -> Result<TransformOutput, TransformFailure> {
        let TransformerConfig::Javascript(config) = config else {
            return Err(config_mismatch(self.name(), config));
        };
        let lowered = lower(&code, &config.node_env);
        let dependencies = collect_dependencies(&lowered);
        Ok(TransformOutput {
            code: lowered,
            dependencies,
        })
    }
}
