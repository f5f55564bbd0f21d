//! TypeScript transformer: strips erasable type syntax so the JavaScript
//! transformer can lower what remains. This is type *removal*, not type
//! checking; declarations the type system alone consumes (interfaces, type
//! aliases, `import type`) disappear, annotations are erased in the
//! declaration positions application code uses them in.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{
    config_mismatch, TransformCtx, TransformFailure, TransformOutput, Transformer,
    TransformerConfig,
};

static RE_IMPORT_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*import\s+type\s[^;]*;\s*$").unwrap());
static RE_EXPORT_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*export\s+type\s+[A-Za-z_$][\w$]*\s*(?:<[^>]*>)?\s*=").unwrap());
static RE_TYPE_ALIAS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*type\s+[A-Za-z_$][\w$]*\s*(?:<[^>]*>)?\s*=").unwrap());
static RE_INTERFACE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:export\s+)?interface\s+[A-Za-z_$][\w$]*[^{\n]*\{").unwrap()
});
static RE_AS_CAST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s+as\s+(?:const\b|[A-Za-z_$][\w$.]*(?:<[^<>]*>)?(?:\[\])*)").unwrap()
});
static RE_RETURN_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\)\s*:\s*[A-Za-z_$][\w$.<>\[\], |&]*?\s*(\{|=>)").unwrap()
});
static RE_PARAM_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([(,]\s*[A-Za-z_$][\w$]*)\??\s*:\s*[A-Za-z_$][\w$.<>\[\]]*(?:\[\])*").unwrap()
});
static RE_VAR_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(const|let|var)\s+([A-Za-z_$][\w$]*)\s*:\s*[^=;\n]+=").unwrap()
});
static RE_FN_GENERICS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(function\s+[A-Za-z_$][\w$]*)\s*<[^<>]*>").unwrap());
static RE_NON_NULL: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\.").unwrap());

pub fn strip_types(code: &str) -> String {
    let mut out = RE_IMPORT_TYPE.replace_all(code, "").into_owned();
    out = remove_balanced_statements(&out, &RE_INTERFACE, Terminator::Brace);
    out = remove_balanced_statements(&out, &RE_EXPORT_TYPE, Terminator::Semicolon);
    out = remove_balanced_statements(&out, &RE_TYPE_ALIAS, Terminator::Semicolon);
    out = RE_AS_CAST.replace_all(&out, "").into_owned();
    out = RE_RETURN_TYPE.replace_all(&out, ") $1").into_owned();
    out = RE_PARAM_TYPE.replace_all(&out, "$1").into_owned();
    out = RE_VAR_TYPE.replace_all(&out, "$1 $2 =").into_owned();
    out = RE_FN_GENERICS.replace_all(&out, "$1").into_owned();
    out = RE_NON_NULL.replace_all(&out, ".").into_owned();
    out
}

enum Terminator {
    /// Consume up to the matching close of the brace the pattern opened.
    Brace,
    /// Consume up to the first `;` at zero nesting depth.
    Semicolon,
}

fn remove_balanced_statements(code: &str, pattern: &Regex, terminator: Terminator) -> String {
    let mut out = String::with_capacity(code.len());
    let mut cursor = 0usize;
    while let Some(found) = pattern.find(&code[cursor..]) {
        let start = cursor + found.start();
        let mut idx = cursor + found.end();
        let bytes = code.as_bytes();
        let mut depth = match terminator {
            Terminator::Brace => 1i32,
            Terminator::Semicolon => 0i32,
        };
        while idx < bytes.len() {
            match bytes[idx] {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if matches!(terminator, Terminator::Brace) && depth == 0 {
                        idx += 1;
                        break;
                    }
                }
                b';' if matches!(terminator, Terminator::Semicolon) && depth == 0 => {
                    idx += 1;
                    break;
                }
                _ => {}
            }
            idx += 1;
        }
        out.push_str(&code[cursor..start]);
        cursor = idx;
    }
    out.push_str(&code[cursor..]);
    out
}

#[derive(Debug)]
pub struct TypescriptTransformer;

impl Transformer for TypescriptTransformer {
    fn name(&self) -> &'static str {
        "ts"
    }

    fn transform(
        &self,
        _ctx: &TransformCtx<'_>,
        code: String,
        config: &TransformerConfig,
    ) -> Result<TransformOutput, TransformFailure> {
        if !matches!(config, TransformerConfig::Typescript) {
            return Err(config_mismatch(self.name(), config));
        }
        Ok(TransformOutput {
            code: strip_types(&code),
            dependencies: Vec::new(),
        })
    }
}
