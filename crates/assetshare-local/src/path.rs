//! Helpers for share-relative, forward-slash paths. Paths always start with
//! `/` and are case-sensitive; `/` is the share root.

/// Parent of a path. The parent of the root is the root itself.
pub fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Last component of a path. Empty for the root.
pub fn name_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Join a parent path and a child name.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// True when `path` equals `prefix` or lies beneath it.
pub fn is_within(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    path == prefix || path.starts_with(&format!("{}/", prefix))
}

/// Rewrite `path` from `old_prefix` onto `new_prefix`. Returns `None` when
/// `path` is outside `old_prefix`.
pub fn rebase(path: &str, old_prefix: &str, new_prefix: &str) -> Option<String> {
    if path == old_prefix {
        return Some(new_prefix.to_string());
    }
    path.strip_prefix(&format!("{}/", old_prefix))
        .map(|rest| format!("{}/{}", new_prefix, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_of() {
        assert_eq!(parent_of("/docs/a.txt"), "/docs");
        assert_eq!(parent_of("/a.txt"), "/");
        assert_eq!(parent_of("/"), "/");
    }

    #[test]
    fn test_name_of() {
        assert_eq!(name_of("/docs/a.txt"), "a.txt");
        assert_eq!(name_of("/a.txt"), "a.txt");
        assert_eq!(name_of("/"), "");
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/", "a.txt"), "/a.txt");
        assert_eq!(join_path("/docs", "a.txt"), "/docs/a.txt");
    }

    #[test]
    fn test_is_within() {
        assert!(is_within("/docs", "/docs"));
        assert!(is_within("/docs", "/docs/a.txt"));
        assert!(is_within("/", "/anything"));
        assert!(!is_within("/docs", "/docs2/a.txt"));
        assert!(!is_within("/docs", "/other"));
    }

    #[test]
    fn test_rebase() {
        assert_eq!(rebase("/a/x.txt", "/a", "/b"), Some("/b/x.txt".to_string()));
        assert_eq!(rebase("/a", "/a", "/b"), Some("/b".to_string()));
        assert_eq!(rebase("/ab/x", "/a", "/b"), None);
    }
}
