//! Absolute-path helpers for the virtual file system.
//!
//! Every path the bundler handles is absolute, `/`-separated and normalized
//! before lookup. There is deliberately no `std::path` here: virtual paths
//! never touch the host file system and must behave identically on every
//! platform.

/// Normalize a path to absolute form: `/`-separated, `.` and `..` collapsed,
/// no trailing slash (except the root itself).
pub fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut out = String::with_capacity(path.len());
    for segment in &segments {
        out.push('/');
        out.push_str(segment);
    }
    out
}

/// Parent directory of a normalized path. The root is its own parent.
pub fn dirname(path: &str) -> String {
    let path = normalize(path);
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Join a possibly-relative specifier onto a base directory and normalize.
pub fn join(base: &str, rel: &str) -> String {
    if rel.starts_with('/') {
        normalize(rel)
    } else {
        normalize(&format!("{}/{}", base, rel))
    }
}

/// Final path segment.
pub fn file_name(path: &str) -> String {
    let path = normalize(path);
    match path.rfind('/') {
        Some(idx) => path[idx + 1..].to_string(),
        None => path,
    }
}

/// Extension of the final segment, without the leading dot.
pub fn extension(path: &str) -> Option<String> {
    let name = file_name(path);
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) => Some(name[idx + 1..].to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_segments() {
        assert_eq!(normalize("/a/./b/../c"), "/a/c");
        assert_eq!(normalize("a/b"), "/a/b");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("/../.."), "/");
        assert_eq!(normalize("/a//b/"), "/a/b");
        assert_eq!(normalize("\\win\\style"), "/win/style");
    }

    #[test]
    fn dirname_and_join() {
        assert_eq!(dirname("/a/b/c.js"), "/a/b");
        assert_eq!(dirname("/a"), "/");
        assert_eq!(dirname("/"), "/");
        assert_eq!(join("/a/b", "./c"), "/a/b/c");
        assert_eq!(join("/a/b", "../c"), "/a/c");
        assert_eq!(join("/a/b", "/c"), "/c");
    }

    #[test]
    fn extension_of_final_segment() {
        assert_eq!(extension("/a/b.ts"), Some("ts".to_string()));
        assert_eq!(extension("/a/.gitignore"), None);
        assert_eq!(extension("/a/b"), None);
        assert_eq!(extension("/a.dir/b"), None);
    }
}
