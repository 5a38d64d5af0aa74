use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Folder,
}

/// One file or folder of the generated project.
///
/// `path` is canonical (`/`-prefixed, no empty segments) and always equals the
/// parent's path joined with `name`. Files carry `content`, folders carry
/// `children`; the other field stays empty.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileItem {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileItem>,
}

impl FileItem {
    pub fn file(name: &str, path: &str, content: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            kind: FileKind::File,
            content,
            children: Vec::new(),
        }
    }

    pub fn folder(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            kind: FileKind::Folder,
            content: None,
            children: Vec::new(),
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == FileKind::Folder
    }

    /// Move this node to `path`, rewriting every descendant path to match.
    pub fn relocate(&mut self, path: &str) {
        self.path = path.to_string();
        for child in &mut self.children {
            let child_path = format!("{}/{}", path, child.name);
            child.relocate(&child_path);
        }
    }
}

/// The project's file hierarchy. Root-level items hang off an implicit root.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct FileTree {
    pub items: Vec<FileItem>,
}

impl FileTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Depth-first lookup by canonical path.
    pub fn find(&self, path: &str) -> Option<&FileItem> {
        find_in(&self.items, path)
    }

    pub fn find_mut(&mut self, path: &str) -> Option<&mut FileItem> {
        find_in_mut(&mut self.items, path)
    }

    /// Every file in depth-first order as `(path, content)`.
    pub fn files(&self) -> Vec<(&str, &str)> {
        let mut out = Vec::new();
        collect_files(&self.items, &mut out);
        out
    }

    /// Total node count (files and folders).
    pub fn len(&self) -> usize {
        count(&self.items)
    }
}

fn find_in<'a>(items: &'a [FileItem], path: &str) -> Option<&'a FileItem> {
    for item in items {
        if item.path == path {
            return Some(item);
        }
        if let Some(found) = find_in(&item.children, path) {
            return Some(found);
        }
    }
    None
}

fn find_in_mut<'a>(items: &'a mut [FileItem], path: &str) -> Option<&'a mut FileItem> {
    for item in items {
        if item.path == path {
            return Some(item);
        }
        if let Some(found) = find_in_mut(&mut item.children, path) {
            return Some(found);
        }
    }
    None
}

fn collect_files<'a>(items: &'a [FileItem], out: &mut Vec<(&'a str, &'a str)>) {
    for item in items {
        match item.kind {
            FileKind::File => out.push((
                item.path.as_str(),
                item.content.as_deref().unwrap_or_default(),
            )),
            FileKind::Folder => collect_files(&item.children, out),
        }
    }
}

fn count(items: &[FileItem]) -> usize {
    items.iter().map(|item| 1 + count(&item.children)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{file, folder};

    #[test]
    fn relocate_rewrites_descendant_paths() {
        let mut src = folder(
            "/src",
            vec![folder("/src/lib", vec![file("/src/lib/a.ts", "a")])],
        );
        src.name = "app".to_string();
        src.relocate("/app");

        assert_eq!(src.children[0].path, "/app/lib");
        assert_eq!(src.children[0].children[0].path, "/app/lib/a.ts");
    }

    #[test]
    fn find_descends_into_folders() {
        let tree = FileTree {
            items: vec![folder("/src", vec![file("/src/app.js", "x")])],
        };
        assert_eq!(
            tree.find("/src/app.js").and_then(|f| f.content.as_deref()),
            Some("x")
        );
        assert!(tree.find("/missing").is_none());
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn serializes_kind_as_type() {
        let item = FileItem::file("a.txt", "/a.txt", Some("hi".to_string()));
        let json = serde_json::to_value(&item).expect("serialize");
        assert_eq!(json["type"], "file");
        assert!(json.get("children").is_none());
    }
}
