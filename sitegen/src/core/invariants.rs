//! Structural invariants of the file tree.

use std::collections::HashSet;

use crate::core::path;
use crate::tree::{FileItem, FileKind, FileTree};

/// Check structural invariants the type system does not enforce:
/// - Every path is its parent's path joined with its name
/// - No two nodes share a path
/// - Names are single non-empty segments
/// - Files have no children, folders have no content
pub fn validate_tree(tree: &FileTree) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for item in &tree.items {
        validate_node(item, "", &mut seen, &mut errors);
    }
    errors
}

fn validate_node<'a>(
    node: &'a FileItem,
    parent: &str,
    seen: &mut HashSet<&'a str>,
    errors: &mut Vec<String>,
) {
    if !seen.insert(node.path.as_str()) {
        errors.push(format!("duplicate path '{}'", node.path));
    }

    if node.name.is_empty() || node.name.contains('/') {
        errors.push(format!("{}: invalid name '{}'", node.path, node.name));
    }

    let expected = path::join(parent, &node.name);
    if node.path != expected {
        errors.push(format!("{}: path should be '{}'", node.path, expected));
    }

    match node.kind {
        FileKind::File => {
            if !node.children.is_empty() {
                errors.push(format!("{}: file has children", node.path));
            }
        }
        FileKind::Folder => {
            if node.content.is_some() {
                errors.push(format!("{}: folder has content", node.path));
            }
        }
    }

    for child in &node.children {
        validate_node(child, &node.path, seen, errors);
    }
}
