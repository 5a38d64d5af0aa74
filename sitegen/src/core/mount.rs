//! Projection of the file tree into the sandbox mount structure.
//!
//! The sandbox filesystem API expects nested maps keyed by entry name:
//!
//! ```json
//! { "src": { "directory": { "app.js": { "file": { "contents": "..." } } } } }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::path;
use crate::tree::{FileItem, FileKind, FileTree};

pub type MountTree = BTreeMap<String, MountEntry>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountEntry {
    File { contents: String },
    Directory(MountTree),
}

/// Project `tree` into a mount structure.
///
/// Pure and deterministic: an unchanged tree always projects to the same
/// bytes. Files without content project to an empty string.
pub fn project(tree: &FileTree) -> MountTree {
    project_items(&tree.items)
}

fn project_items(items: &[FileItem]) -> MountTree {
    items
        .iter()
        .map(|item| (item.name.clone(), project_item(item)))
        .collect()
}

fn project_item(item: &FileItem) -> MountEntry {
    match item.kind {
        FileKind::File => MountEntry::File {
            contents: item.content.clone().unwrap_or_default(),
        },
        FileKind::Folder => MountEntry::Directory(project_items(&item.children)),
    }
}

/// Flatten a mount structure into its directory paths (parents first) and a
/// canonical `path -> contents` map of its files.
pub fn flatten(mount: &MountTree) -> (Vec<String>, BTreeMap<String, String>) {
    let mut dirs = Vec::new();
    let mut files = BTreeMap::new();
    flatten_into(mount, "", &mut dirs, &mut files);
    (dirs, files)
}

fn flatten_into(
    mount: &MountTree,
    parent: &str,
    dirs: &mut Vec<String>,
    files: &mut BTreeMap<String, String>,
) {
    for (name, entry) in mount {
        let full = path::join(parent, name);
        match entry {
            MountEntry::File { contents } => {
                files.insert(full, contents.clone());
            }
            MountEntry::Directory(children) => {
                dirs.push(full.clone());
                flatten_into(children, &full, dirs, files);
            }
        }
    }
}
