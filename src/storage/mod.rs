//! Storage module - array container backend
//!
//! The table engine never touches file bytes. It talks to an
//! [`ArrayBackend`]: a tree of named nodes where leaves are growable,
//! fixed-width typed arrays and every node carries binary attributes.
//! [`ContainerFile`] is the single-file implementation shipped with the crate.

pub mod backend;
pub mod file;
pub mod header;

pub use backend::{ArrayBackend, ArraySpec, Atom, Cells};
pub use file::{ContainerFile, OpenMode};
pub use header::{Compression, ContainerHeader};

// ============================================================================
// Node paths
// ============================================================================

/// Normalize a node path: leading slash, no trailing slash, root is `/`
pub fn norm_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Path of a child node under `parent`
pub fn join_path(parent: &str, name: &str) -> String {
    let parent = norm_path(parent);
    let name = name.trim_matches('/');
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Parent of a normalized path (`/` for top level nodes)
pub fn parent_path(path: &str) -> String {
    let path = norm_path(path);
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Last component of a path
pub fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(join_path("/hello", "world"), "/hello/world");
        assert_eq!(join_path("hello", "world"), "/hello/world");
        assert_eq!(join_path("/", "world"), "/world");
        assert_eq!(join_path("/", "/world"), "/world");
        assert_eq!(join_path("", "world"), "/world");
        assert_eq!(norm_path("a/b/"), "/a/b");
        assert_eq!(norm_path(""), "/");
        assert_eq!(parent_path("/a/b/c"), "/a/b");
        assert_eq!(parent_path("/a"), "/");
        assert_eq!(base_name("/a/b/c"), "c");
    }
}
