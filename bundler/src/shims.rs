//! Built-in shim provider.
//!
//! The memory layer is seeded at bundler construction with browser-safe
//! substitutes for the host-environment standard modules. Each shim lives at
//! `/node_modules/<name>/index.js` next to a skeletal `package.json`, so the
//! resolver and the runtime `require` both find them under the plain name
//! and under `node:<name>`.

use sandpit_vfs::{FileSystem, VfsResult};

const EVENTS_JS: &str = include_str!("shims/events.js");
const STREAM_JS: &str = include_str!("shims/stream.js");
const UTIL_JS: &str = include_str!("shims/util.js");
const PROCESS_JS: &str = include_str!("shims/process.js");
const BUFFER_JS: &str = include_str!("shims/buffer.js");
const ASSERT_JS: &str = include_str!("shims/assert.js");
const PATH_JS: &str = include_str!("shims/path.js");
const OS_JS: &str = include_str!("shims/os.js");
const URL_JS: &str = include_str!("shims/url.js");
const QUERYSTRING_JS: &str = include_str!("shims/querystring.js");
const STRING_DECODER_JS: &str = include_str!("shims/string_decoder.js");
const TIMERS_JS: &str = include_str!("shims/timers.js");
const CONSOLE_JS: &str = include_str!("shims/console.js");
const EMPTY_JS: &str = include_str!("shims/empty.js");

/// Shims with real substance.
const SHIMS: &[(&str, &str)] = &[
    ("events", EVENTS_JS),
    ("stream", STREAM_JS),
    ("util", UTIL_JS),
    ("process", PROCESS_JS),
    ("buffer", BUFFER_JS),
    ("assert", ASSERT_JS),
    ("path", PATH_JS),
    ("os", OS_JS),
    ("url", URL_JS),
    ("querystring", QUERYSTRING_JS),
    ("string_decoder", STRING_DECODER_JS),
    ("timers", TIMERS_JS),
    ("console", CONSOLE_JS),
];

/// Built-ins with no browser-safe equivalent; they resolve to an empty
/// module so imports do not break the compile.
const EMPTY_SHIMS: &[&str] = &[
    "fs",
    "net",
    "tls",
    "http",
    "https",
    "http2",
    "crypto",
    "child_process",
    "zlib",
    "dgram",
    "dns",
    "readline",
    "repl",
    "tty",
    "vm",
    "cluster",
    "worker_threads",
    "perf_hooks",
    "v8",
    "inspector",
    "module",
    "constants",
];

/// Whether the specifier names a built-in module, with or without the
/// `node:` prefix.
pub fn is_builtin(specifier: &str) -> bool {
    let name = specifier.strip_prefix("node:").unwrap_or(specifier);
    SHIMS.iter().any(|(shim, _)| *shim == name) || EMPTY_SHIMS.contains(&name)
}

/// Map a built-in specifier to its shim path.
pub fn shim_path(specifier: &str) -> Option<String> {
    let name = specifier.strip_prefix("node:").unwrap_or(specifier);
    is_builtin(name).then(|| format!("/node_modules/{name}/index.js"))
}

/// Seed the memory layer with every shim and its skeletal `package.json`.
pub fn seed(fs: &FileSystem) -> VfsResult<()> {
    for (name, source) in SHIMS {
        write_shim(fs, name, source)?;
    }
    for name in EMPTY_SHIMS {
        write_shim(fs, name, EMPTY_JS)?;
    }
    Ok(())
}

fn write_shim(fs: &FileSystem, name: &str, source: &str) -> VfsResult<()> {
    fs.write_sync(&format!("/node_modules/{name}/index.js"), source)?;
    fs.write_sync(
        &format!("/node_modules/{name}/package.json"),
        format!("{{\"name\":\"{name}\",\"version\":\"1.0.0\",\"main\":\"index.js\"}}"),
    )
}
