//! Tree reconciliation: applies pending steps to the file tree.
//!
//! Steps are applied strictly in arrival order so a later step observes the
//! folders and files created by earlier ones. Every step either applies
//! completely or leaves the tree untouched and is reported as failed; one
//! failing step never aborts the rest of the batch.

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::path;
use crate::core::types::{
    Operation, ScriptRequest, Step, StepKind, StepStatus, StepTransition,
};
use crate::tree::{FileItem, FileTree};

/// Why a single step could not be applied.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error("step has no path")]
    MissingPath,
    #[error("invalid path {0:?}")]
    InvalidPath(String),
    #[error("path conflict: {path} is an existing {existing}")]
    Conflict { path: String, existing: &'static str },
    #[error("node not found: {0}")]
    NotFound(String),
    #[error("destination already exists: {0}")]
    DestinationExists(String),
    #[error("cannot move {0} into itself")]
    MoveIntoSelf(String),
    #[error("run-script step has no command")]
    MissingCommand,
}

/// Result of reconciling one batch of pending steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// The tree after every applicable step.
    pub tree: FileTree,
    /// Sandbox side effects, one per applied file step, in step order.
    pub operations: Vec<Operation>,
    /// Status changes for every step of the batch, to be recorded together.
    pub transitions: Vec<StepTransition>,
    /// Run-script steps left in progress until the sandbox reports an exit code.
    pub scripts: Vec<ScriptRequest>,
}

impl Reconciliation {
    pub fn failed_count(&self) -> usize {
        self.transitions
            .iter()
            .filter(|t| t.status == StepStatus::Failed)
            .count()
    }
}

enum Effect {
    Operation(Operation),
    Script(ScriptRequest),
    Nothing,
}

/// Apply `pending` to a copy of `tree`.
///
/// Each applied file step emits exactly one operation; create and edit of the
/// same path in one batch are not coalesced.
#[instrument(skip_all, fields(steps = pending.len()))]
pub fn apply(tree: &FileTree, pending: &[Step]) -> Reconciliation {
    let mut next = tree.clone();
    let mut operations = Vec::new();
    let mut transitions = Vec::with_capacity(pending.len());
    let mut scripts = Vec::new();

    for step in pending {
        match apply_step(&mut next, step) {
            Ok(effect) => {
                debug!(id = step.id, kind = ?step.kind, path = ?step.path, "applied step");
                let status = match effect {
                    Effect::Operation(op) => {
                        operations.push(op);
                        StepStatus::Completed
                    }
                    Effect::Script(request) => {
                        scripts.push(request);
                        StepStatus::InProgress
                    }
                    Effect::Nothing => StepStatus::Completed,
                };
                transitions.push(StepTransition {
                    id: step.id,
                    status,
                    reason: None,
                });
            }
            Err(err) => {
                warn!(
                    id = step.id,
                    kind = ?step.kind,
                    path = ?step.path,
                    error = %err,
                    "step failed"
                );
                transitions.push(StepTransition {
                    id: step.id,
                    status: StepStatus::Failed,
                    reason: Some(err.to_string()),
                });
            }
        }
    }

    let reconciliation = Reconciliation {
        tree: next,
        operations,
        transitions,
        scripts,
    };
    info!(
        operations = reconciliation.operations.len(),
        failed = reconciliation.failed_count(),
        scripts = reconciliation.scripts.len(),
        "reconciled batch"
    );
    reconciliation
}

fn apply_step(tree: &mut FileTree, step: &Step) -> Result<Effect, ApplyError> {
    match step.kind {
        StepKind::CreateFile | StepKind::EditFile => {
            let (full, segments) = target(step.path.as_deref())?;
            let content = step.payload.as_deref().unwrap_or_default();
            upsert_file(&mut tree.items, &segments, content)?;
            let op = if step.kind == StepKind::CreateFile {
                Operation::create_file(&full, content)
            } else {
                Operation::edit(&full, content)
            };
            Ok(Effect::Operation(op))
        }
        StepKind::CreateFolder => {
            let (full, segments) = target(step.path.as_deref())?;
            ensure_folders(&mut tree.items, &segments)?;
            Ok(Effect::Operation(Operation::create_folder(&full)))
        }
        StepKind::DeleteFile => {
            let (full, _) = target(step.path.as_deref())?;
            if remove_node(&mut tree.items, &full).is_none() {
                debug!(path = %full, "delete target absent, nothing to remove");
            }
            Ok(Effect::Operation(Operation::delete(&full)))
        }
        StepKind::RenameFile => rename(tree, step),
        StepKind::RunScript => {
            let command = step
                .payload
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .ok_or(ApplyError::MissingCommand)?;
            Ok(Effect::Script(ScriptRequest {
                step_id: step.id,
                command: command.to_string(),
            }))
        }
        StepKind::Generic => Ok(Effect::Nothing),
    }
}

/// Canonical path and segments for a step target.
fn target(raw: Option<&str>) -> Result<(String, Vec<&str>), ApplyError> {
    let raw = raw.ok_or(ApplyError::MissingPath)?;
    let segments = path::segments(raw).ok_or_else(|| ApplyError::InvalidPath(raw.to_string()))?;
    Ok((path::join_all(&segments), segments))
}

/// Walk `segments` from the root as folders, creating missing ones.
///
/// Returns the children list of the deepest folder. A conflict can only be
/// found on an existing node, and nothing below a freshly created folder
/// exists yet, so a conflicting walk never leaves partial folders behind.
fn ensure_folders<'a>(
    items: &'a mut Vec<FileItem>,
    segments: &[&str],
) -> Result<&'a mut Vec<FileItem>, ApplyError> {
    let mut level = items;
    let mut prefix = String::new();
    for segment in segments {
        prefix = path::join(&prefix, segment);
        let idx = match level.iter().position(|item| item.path == prefix) {
            Some(idx) if level[idx].is_folder() => idx,
            Some(_) => {
                return Err(ApplyError::Conflict {
                    path: prefix,
                    existing: "file",
                });
            }
            None => {
                level.push(FileItem::folder(segment, &prefix));
                level.len() - 1
            }
        };
        level = &mut level[idx].children;
    }
    Ok(level)
}

fn upsert_file(
    items: &mut Vec<FileItem>,
    segments: &[&str],
    content: &str,
) -> Result<(), ApplyError> {
    let Some((name, folders)) = segments.split_last() else {
        return Err(ApplyError::MissingPath);
    };
    let full = path::join_all(segments);
    let level = ensure_folders(items, folders)?;
    match level.iter().position(|item| item.path == full) {
        Some(idx) if level[idx].is_folder() => Err(ApplyError::Conflict {
            path: full,
            existing: "folder",
        }),
        Some(idx) => {
            level[idx].content = Some(content.to_string());
            Ok(())
        }
        None => {
            level.push(FileItem::file(name, &full, Some(content.to_string())));
            Ok(())
        }
    }
}

/// Remove the node at `target` wherever it sits, returning it.
fn remove_node(items: &mut Vec<FileItem>, target: &str) -> Option<FileItem> {
    if let Some(idx) = items.iter().position(|item| item.path == target) {
        return Some(items.remove(idx));
    }
    items
        .iter_mut()
        .filter(|item| path::is_descendant(target, &item.path))
        .find_map(|item| remove_node(&mut item.children, target))
}

fn rename(tree: &mut FileTree, step: &Step) -> Result<Effect, ApplyError> {
    let (from, _) = target(step.path.as_deref())?;
    let (to, to_segments) = target(step.payload.as_deref())?;

    if tree.find(&from).is_none() {
        return Err(ApplyError::NotFound(from));
    }
    if from == to {
        return Ok(Effect::Nothing);
    }
    if path::is_descendant(&to, &from) {
        return Err(ApplyError::MoveIntoSelf(from));
    }
    if tree.find(&to).is_some() {
        return Err(ApplyError::DestinationExists(to));
    }

    let Some((name, parents)) = to_segments.split_last() else {
        return Err(ApplyError::MissingPath);
    };
    // Check the destination chain before detaching anything.
    for depth in 1..=parents.len() {
        let prefix = path::join_all(&parents[..depth]);
        if tree.find(&prefix).is_some_and(|node| !node.is_folder()) {
            return Err(ApplyError::Conflict {
                path: prefix,
                existing: "file",
            });
        }
    }

    if path::parent(&from) == path::parent(&to) {
        let node = tree
            .find_mut(&from)
            .ok_or_else(|| ApplyError::NotFound(from.clone()))?;
        node.name = (*name).to_string();
        node.relocate(&to);
    } else {
        let mut node =
            remove_node(&mut tree.items, &from).ok_or_else(|| ApplyError::NotFound(from.clone()))?;
        node.name = (*name).to_string();
        node.relocate(&to);
        ensure_folders(&mut tree.items, parents)?.push(node);
    }

    Ok(Effect::Operation(Operation::rename(&from, &to)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::invariants::validate_tree;
    use crate::core::types::OperationKind;
    use crate::test_support::{create_step, file, folder, step};
    use crate::tree::FileKind;

    fn statuses(rec: &Reconciliation) -> Vec<StepStatus> {
        rec.transitions.iter().map(|t| t.status).collect()
    }

    #[test]
    fn create_builds_intermediate_folders() {
        let rec = apply(&FileTree::new(), &[create_step(1, "/a/b/c.txt", "hello")]);

        assert_eq!(rec.tree.items.len(), 1);
        let a = &rec.tree.items[0];
        assert_eq!((a.name.as_str(), a.path.as_str(), a.kind), ("a", "/a", FileKind::Folder));
        let b = &a.children[0];
        assert_eq!((b.path.as_str(), b.kind), ("/a/b", FileKind::Folder));
        assert_eq!(b.children.len(), 1);
        let c = &b.children[0];
        assert_eq!(c.path, "/a/b/c.txt");
        assert_eq!(c.content.as_deref(), Some("hello"));
        assert_eq!(rec.tree.len(), 3);
        assert_eq!(statuses(&rec), vec![StepStatus::Completed]);
    }

    #[test]
    fn leading_slash_does_not_create_root_named_folder() {
        let with_slash = apply(&FileTree::new(), &[create_step(1, "/index.html", "x")]);
        let without = apply(&FileTree::new(), &[create_step(1, "index.html", "x")]);

        assert_eq!(with_slash.tree, without.tree);
        assert_eq!(with_slash.tree.items[0].path, "/index.html");
        assert_eq!(with_slash.tree.items[0].kind, FileKind::File);
    }

    #[test]
    fn create_twice_is_idempotent() {
        let step = create_step(1, "/src/app.js", "console.log(1)");
        let once = apply(&FileTree::new(), std::slice::from_ref(&step));
        let twice = apply(&once.tree, &[step]);
        assert_eq!(once.tree, twice.tree);
    }

    #[test]
    fn batch_scenario_overwrites_in_place_and_emits_each_operation() {
        let batch = [
            create_step(1, "/index.html", "<html></html>"),
            create_step(2, "/src/app.js", "console.log(1)"),
            step(3, StepKind::EditFile, "/index.html", Some("<html>v2</html>")),
        ];
        let rec = apply(&FileTree::new(), &batch);

        assert_eq!(
            rec.tree.items,
            vec![
                file("/index.html", "<html>v2</html>"),
                folder("/src", vec![file("/src/app.js", "console.log(1)")]),
            ]
        );
        assert_eq!(statuses(&rec), vec![StepStatus::Completed; 3]);
        let kinds: Vec<_> = rec.operations.iter().map(|op| (op.kind, op.path.as_str())).collect();
        assert_eq!(
            kinds,
            vec![
                (OperationKind::Create, "/index.html"),
                (OperationKind::Create, "/src/app.js"),
                (OperationKind::Edit, "/index.html"),
            ]
        );
        assert_eq!(rec.operations[2].content.as_deref(), Some("<html>v2</html>"));

        let rec = apply(&rec.tree, &[step(4, StepKind::DeleteFile, "/src/app.js", None)]);
        assert_eq!(rec.tree.items[1], folder("/src", Vec::new()));
        assert!(rec.tree.find("/src/app.js").is_none());
    }

    #[test]
    fn delete_missing_path_is_a_no_op() {
        let tree = apply(&FileTree::new(), &[create_step(1, "/a.txt", "a")]).tree;
        let rec = apply(&tree, &[step(2, StepKind::DeleteFile, "/nope/b.txt", None)]);

        assert_eq!(rec.tree, tree);
        assert_eq!(statuses(&rec), vec![StepStatus::Completed]);
        assert_eq!(rec.operations[0].kind, OperationKind::Delete);
    }

    #[test]
    fn delete_folder_removes_subtree() {
        let tree = apply(
            &FileTree::new(),
            &[create_step(1, "/src/a.ts", "a"), create_step(2, "/src/lib/b.ts", "b")],
        )
        .tree;
        let rec = apply(&tree, &[step(3, StepKind::DeleteFile, "/src", None)]);
        assert!(rec.tree.is_empty());
    }

    #[test]
    fn rename_folder_rewrites_descendants() {
        let tree = apply(
            &FileTree::new(),
            &[create_step(1, "/src/index.ts", "x"), create_step(2, "/src/lib/util.ts", "y")],
        )
        .tree;
        let rec = apply(&tree, &[step(3, StepKind::RenameFile, "/src", Some("/app"))]);

        assert!(rec.tree.find("/src/index.ts").is_none());
        assert_eq!(
            rec.tree.find("/app/index.ts").and_then(|f| f.content.as_deref()),
            Some("x")
        );
        assert_eq!(rec.tree.items[0].name, "app");
        assert!(rec.tree.find("/app/lib/util.ts").is_some());
        assert!(validate_tree(&rec.tree).is_empty());
        assert_eq!(rec.operations, vec![Operation::rename("/src", "/app")]);
    }

    #[test]
    fn rename_across_folders_moves_node() {
        let tree = apply(
            &FileTree::new(),
            &[create_step(1, "/a/x.txt", "x"), create_step(2, "/b.txt", "b")],
        )
        .tree;
        let rec = apply(&tree, &[step(3, StepKind::RenameFile, "/a/x.txt", Some("/c/d/y.txt"))]);

        assert_eq!(statuses(&rec), vec![StepStatus::Completed]);
        assert_eq!(rec.tree.find("/a").map(|a| a.children.len()), Some(0));
        assert_eq!(
            rec.tree.find("/c/d/y.txt").map(|f| f.name.as_str()),
            Some("y.txt")
        );
        assert!(validate_tree(&rec.tree).is_empty());
    }

    #[test]
    fn rename_missing_node_fails() {
        let rec = apply(&FileTree::new(), &[step(1, StepKind::RenameFile, "/a", Some("/b"))]);
        assert_eq!(statuses(&rec), vec![StepStatus::Failed]);
        assert_eq!(rec.transitions[0].reason.as_deref(), Some("node not found: /a"));
        assert!(rec.operations.is_empty());
    }

    #[test]
    fn rename_into_existing_or_self_fails() {
        let tree = apply(
            &FileTree::new(),
            &[create_step(1, "/src/a.ts", "a"), create_step(2, "/b.ts", "b")],
        )
        .tree;
        let rec = apply(
            &tree,
            &[
                step(3, StepKind::RenameFile, "/b.ts", Some("/src/a.ts")),
                step(4, StepKind::RenameFile, "/src", Some("/src/inner")),
            ],
        );
        assert_eq!(statuses(&rec), vec![StepStatus::Failed, StepStatus::Failed]);
        assert_eq!(rec.tree, tree);
    }

    #[test]
    fn file_over_folder_conflict_fails_without_touching_tree() {
        let tree = apply(&FileTree::new(), &[create_step(1, "/src/app.js", "x")]).tree;
        let rec = apply(
            &tree,
            &[
                create_step(2, "/src", "oops"),
                create_step(3, "/src/app.js/inner.js", "oops"),
                create_step(4, "/ok.txt", "fine"),
            ],
        );

        assert_eq!(
            statuses(&rec),
            vec![StepStatus::Failed, StepStatus::Failed, StepStatus::Completed]
        );
        assert_eq!(
            rec.transitions[0].reason.as_deref(),
            Some("path conflict: /src is an existing folder")
        );
        assert_eq!(
            rec.transitions[1].reason.as_deref(),
            Some("path conflict: /src/app.js is an existing file")
        );
        assert_eq!(rec.tree.find("/src/app.js").and_then(|f| f.content.as_deref()), Some("x"));
        assert_eq!(rec.operations, vec![Operation::create_file("/ok.txt", "fine")]);
    }

    #[test]
    fn invalid_and_missing_paths_fail() {
        let mut no_path = create_step(2, "x", "x");
        no_path.path = None;
        let rec = apply(&FileTree::new(), &[create_step(1, "/../etc/passwd", "x"), no_path]);
        assert_eq!(statuses(&rec), vec![StepStatus::Failed, StepStatus::Failed]);
        assert!(rec.tree.is_empty());
    }

    #[test]
    fn create_folder_and_scripts() {
        let rec = apply(
            &FileTree::new(),
            &[
                step(1, StepKind::CreateFolder, "/public/img", None),
                step(2, StepKind::RunScript, "", Some("npm install")),
                step(3, StepKind::RunScript, "", Some("  ")),
                step(4, StepKind::Generic, "", Some("Installing dependencies")),
            ],
        );

        assert_eq!(rec.tree.find("/public/img").map(|f| f.kind), Some(FileKind::Folder));
        assert_eq!(
            statuses(&rec),
            vec![
                StepStatus::Completed,
                StepStatus::InProgress,
                StepStatus::Failed,
                StepStatus::Completed,
            ]
        );
        assert_eq!(
            rec.scripts,
            vec![ScriptRequest {
                step_id: 2,
                command: "npm install".to_string(),
            }]
        );
        assert_eq!(rec.operations, vec![Operation::create_folder("/public/img")]);
    }

    #[test]
    fn path_invariant_holds_after_mixed_sequence() {
        let batches = [
            vec![
                create_step(1, "package.json", "{}"),
                create_step(2, "src/app/page.tsx", "page"),
                create_step(3, "src/app/layout.tsx", "layout"),
            ],
            vec![
                step(4, StepKind::RenameFile, "src/app", Some("src/routes")),
                step(5, StepKind::EditFile, "/src/routes/page.tsx", Some("v2")),
                step(6, StepKind::DeleteFile, "package.json", None),
                create_step(7, "//src//components/Button.tsx", "btn"),
            ],
        ];
        let mut tree = FileTree::new();
        for batch in &batches {
            tree = apply(&tree, batch).tree;
            assert!(validate_tree(&tree).is_empty(), "{:?}", validate_tree(&tree));
        }
        assert_eq!(
            tree.find("/src/routes/page.tsx").and_then(|f| f.content.as_deref()),
            Some("v2")
        );
        assert!(tree.find("/package.json").is_none());
        assert!(tree.find("/src/components/Button.tsx").is_some());
    }
}
