//! Helpers for canonical virtual paths.
//!
//! Canonical form is `/`-prefixed with no empty segments: `src//app.js`,
//! `/src/app.js` and `src/app.js/` all canonicalize to `/src/app.js`.

/// Split a virtual path into its non-empty segments.
///
/// Returns `None` when the path has no segments or contains `.` / `..`
/// segments, which cannot be placed in the tree.
pub fn segments(path: &str) -> Option<Vec<&str>> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() || segments.iter().any(|s| *s == "." || *s == "..") {
        return None;
    }
    Some(segments)
}

/// Canonicalize `path`, or `None` if it is not a placeable path.
pub fn normalize(path: &str) -> Option<String> {
    segments(path).map(|segments| join_all(&segments))
}

/// Join a canonical parent path (empty for the implicit root) and a name.
pub fn join(parent: &str, name: &str) -> String {
    format!("{parent}/{name}")
}

/// Canonical path for a run of segments.
pub fn join_all(segments: &[&str]) -> String {
    segments.iter().fold(String::new(), |acc, s| join(&acc, s))
}

/// Parent of a canonical path; the implicit root is the empty string.
pub fn parent(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(parent, _)| parent)
}

/// Last segment of a canonical path.
pub fn file_name(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

/// True if `path` lies strictly below `ancestor`.
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    path.strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_skips_empty_segments() {
        assert_eq!(normalize("/a/b/c.txt").as_deref(), Some("/a/b/c.txt"));
        assert_eq!(normalize("a//b/").as_deref(), Some("/a/b"));
        assert_eq!(normalize("package.json").as_deref(), Some("/package.json"));
    }

    #[test]
    fn normalize_rejects_unplaceable_paths() {
        assert_eq!(normalize(""), None);
        assert_eq!(normalize("///"), None);
        assert_eq!(normalize("/src/../etc"), None);
        assert_eq!(normalize("./a"), None);
    }

    #[test]
    fn parent_and_file_name_split_canonical_paths() {
        assert_eq!(parent("/src/app.js"), "/src");
        assert_eq!(parent("/index.html"), "");
        assert_eq!(file_name("/src/app.js"), "app.js");
    }

    #[test]
    fn descendant_requires_segment_boundary() {
        assert!(is_descendant("/src/app.js", "/src"));
        assert!(!is_descendant("/srcs/app.js", "/src"));
        assert!(!is_descendant("/src", "/src"));
    }
}
