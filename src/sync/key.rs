// src/sync/key.rs

//! Object keys for local paths

use std::path::{Component, Path};

/// Join a prefix and a relative path into an object key
///
/// `.` and empty segments are dropped, `..` removes the previous segment
/// and never climbs above the bucket root. Separators are always `/`.
pub fn normalize_key(prefix: &str, rel: &Path) -> String {
    let mut segments: Vec<String> = Vec::new();

    let prefix_parts = prefix.split(['/', '\\']).map(str::to_string);
    let path_parts = rel.components().filter_map(|c| match c {
        Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
        Component::ParentDir => Some("..".to_string()),
        _ => None,
    });

    for segment in prefix_parts.chain(path_parts) {
        match segment.as_str() {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }
    segments.join("/")
}

/// Key prefix used when listing a bucket, with a trailing `/` unless empty
pub fn list_prefix(prefix: &str) -> String {
    let key = normalize_key(prefix, Path::new(""));
    if key.is_empty() { key } else { format!("{}/", key) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("", Path::new("a/b.txt")), "a/b.txt");
        assert_eq!(normalize_key("repo/", Path::new("a/b.txt")), "repo/a/b.txt");
        assert_eq!(normalize_key("/repo//x/", Path::new("./b.txt")), "repo/x/b.txt");
        assert_eq!(normalize_key("repo", Path::new("a/../b.txt")), "repo/b.txt");
    }

    #[test]
    fn test_never_escapes_root() {
        assert_eq!(normalize_key("", Path::new("../../etc/passwd")), "etc/passwd");
        assert_eq!(normalize_key("..", Path::new("b")), "b");
    }

    #[test]
    fn test_list_prefix() {
        assert_eq!(list_prefix(""), "");
        assert_eq!(list_prefix("/repo/stable"), "repo/stable/");
    }
}
