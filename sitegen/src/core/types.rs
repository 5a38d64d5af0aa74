//! Shared deterministic types for the interpreter core.
//!
//! These types define stable contracts between core components and are the
//! serialized shapes exposed to the CLI and the preview server.

use serde::{Deserialize, Serialize};

pub type StepId = u64;

/// What a step does to the project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    CreateFile,
    CreateFolder,
    EditFile,
    DeleteFile,
    RenameFile,
    RunScript,
    Generic,
}

impl StepKind {
    /// Kinds that require a `path`.
    pub fn affects_files(self) -> bool {
        match self {
            StepKind::CreateFile
            | StepKind::CreateFolder
            | StepKind::EditFile
            | StepKind::DeleteFile
            | StepKind::RenameFile => true,
            StepKind::RunScript | StepKind::Generic => false,
        }
    }
}

/// Lifecycle status of a step.
///
/// `Completed` and `Failed` are terminal. A step never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }

    /// True if moving from `self` to `next` is a forward transition.
    pub fn can_transition_to(self, next: StepStatus) -> bool {
        match (self, next) {
            (StepStatus::Pending, StepStatus::InProgress | StepStatus::Completed)
            | (StepStatus::Pending | StepStatus::InProgress, StepStatus::Failed)
            | (StepStatus::InProgress, StepStatus::Completed) => true,
            (StepStatus::Pending, StepStatus::Pending)
            | (StepStatus::InProgress, StepStatus::Pending | StepStatus::InProgress)
            | (StepStatus::Completed | StepStatus::Failed, _) => false,
        }
    }
}

/// A single planned mutation or action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub title: String,
    pub description: String,
    pub kind: StepKind,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// File content (create/edit), new path (rename) or command (run-script).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    /// Why the step failed. Only set on `Failed` steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Step {
    /// Build a pending step with a title/description derived from kind and path.
    pub fn new(id: StepId, kind: StepKind, path: Option<&str>, payload: Option<&str>) -> Self {
        let target = path.or(payload).unwrap_or_default();
        let (title, description) = match kind {
            StepKind::CreateFile => (
                format!("Create {target}"),
                format!("Creating file: {target}"),
            ),
            StepKind::CreateFolder => (
                format!("Create folder {target}"),
                format!("Creating folder: {target}"),
            ),
            StepKind::EditFile => (format!("Edit {target}"), format!("Editing file: {target}")),
            StepKind::DeleteFile => (format!("Delete {target}"), format!("Deleting: {target}")),
            StepKind::RenameFile => (
                format!("Rename {target}"),
                format!("Renaming {target} to {}", payload.unwrap_or_default()),
            ),
            StepKind::RunScript => (
                format!("Run {}", payload.unwrap_or_default()),
                format!("Running command: {}", payload.unwrap_or_default()),
            ),
            StepKind::Generic => (target.to_string(), target.to_string()),
        };
        Self {
            id,
            title,
            description,
            kind,
            status: StepStatus::Pending,
            path: path.map(str::to_string),
            payload: payload.map(str::to_string),
            reason: None,
        }
    }
}

/// Status change the reconciler asks the step store to record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTransition {
    pub id: StepId,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Edit,
    Delete,
    Rename,
}

/// Deferred side effect against the live sandbox filesystem.
///
/// A `Create` without `content` creates a folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub kind: OperationKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_path: Option<String>,
}

impl Operation {
    pub fn create_file(path: &str, content: &str) -> Self {
        Self {
            kind: OperationKind::Create,
            path: path.to_string(),
            content: Some(content.to_string()),
            new_path: None,
        }
    }

    pub fn create_folder(path: &str) -> Self {
        Self {
            kind: OperationKind::Create,
            path: path.to_string(),
            content: None,
            new_path: None,
        }
    }

    pub fn edit(path: &str, content: &str) -> Self {
        Self {
            kind: OperationKind::Edit,
            path: path.to_string(),
            content: Some(content.to_string()),
            new_path: None,
        }
    }

    pub fn delete(path: &str) -> Self {
        Self {
            kind: OperationKind::Delete,
            path: path.to_string(),
            content: None,
            new_path: None,
        }
    }

    pub fn rename(path: &str, new_path: &str) -> Self {
        Self {
            kind: OperationKind::Rename,
            path: path.to_string(),
            content: None,
            new_path: Some(new_path.to_string()),
        }
    }
}

/// A run-script step handed to the sandbox for execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRequest {
    pub step_id: StepId,
    pub command: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_never_transition() {
        for next in [
            StepStatus::Pending,
            StepStatus::InProgress,
            StepStatus::Completed,
            StepStatus::Failed,
        ] {
            assert!(!StepStatus::Completed.can_transition_to(next));
            assert!(!StepStatus::Failed.can_transition_to(next));
        }
    }

    #[test]
    fn forward_transitions_are_allowed() {
        assert!(StepStatus::Pending.can_transition_to(StepStatus::InProgress));
        assert!(StepStatus::Pending.can_transition_to(StepStatus::Completed));
        assert!(StepStatus::InProgress.can_transition_to(StepStatus::Failed));
        assert!(!StepStatus::InProgress.can_transition_to(StepStatus::Pending));
    }

    #[test]
    fn status_serializes_kebab_case() {
        let json = serde_json::to_string(&StepStatus::InProgress).expect("serialize");
        assert_eq!(json, "\"in-progress\"");
    }

    #[test]
    fn rename_operation_uses_camel_case_new_path() {
        let json = serde_json::to_value(Operation::rename("/a", "/b")).expect("serialize");
        assert_eq!(json["newPath"], "/b");
        assert_eq!(json["kind"], "rename");
    }
}
