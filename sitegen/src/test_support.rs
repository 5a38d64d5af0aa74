//! Test-only builders and scripted collaborators.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::mount::{MountTree, flatten};
use crate::core::path;
use crate::core::types::{Operation, Step, StepId, StepKind};
use crate::io::generator::{GenerateRequest, Generator};
use crate::io::operation_queue::OperationObserver;
use crate::io::sandbox::{MkdirOptions, RmOptions, SandboxFs};
use crate::tree::FileItem;

/// File node at canonical `path` with `content`.
pub fn file(path: &str, content: &str) -> FileItem {
    FileItem::file(path::file_name(path), path, Some(content.to_string()))
}

/// Folder node at canonical `path` holding `children`.
pub fn folder(path: &str, children: Vec<FileItem>) -> FileItem {
    FileItem {
        children,
        ..FileItem::folder(path::file_name(path), path)
    }
}

/// Pending create-file step, as the directive parser would emit it.
pub fn create_step(id: StepId, path: &str, content: &str) -> Step {
    Step::new(id, StepKind::CreateFile, Some(path), Some(content))
}

/// Pending step of any kind. An empty `path` means no path.
pub fn step(id: StepId, kind: StepKind, path: &str, payload: Option<&str>) -> Step {
    let path = (!path.is_empty()).then_some(path);
    Step::new(id, kind, path, payload)
}

/// Artifact markup with one file action per `(path, content)` pair.
pub fn artifact(files: &[(&str, &str)]) -> String {
    let mut out = String::from("<boltArtifact id=\"test\" title=\"Test\">\n");
    for (file_path, content) in files {
        out.push_str(&format!(
            "<boltAction type=\"file\" filePath=\"{file_path}\">{content}</boltAction>\n"
        ));
    }
    out.push_str("</boltArtifact>\n");
    out
}

/// Fresh directory for a sandbox root.
pub fn sandbox_dir() -> TempDir {
    tempfile::tempdir().expect("tempdir")
}

/// Generator that replays queued responses and records every request.
#[derive(Default)]
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response.
    pub fn respond(self, response: impl Into<String>) -> Self {
        self.push(Ok(response.into()))
    }

    /// Queue an upstream failure.
    pub fn fail(self, message: impl Into<String>) -> Self {
        self.push(Err(message.into()))
    }

    fn push(self, entry: Result<String, String>) -> Self {
        self.responses.lock().expect("lock").push_back(entry);
        self
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().expect("lock").clone()
    }
}

impl Generator for ScriptedGenerator {
    fn complete(&self, request: &GenerateRequest) -> Result<String> {
        self.requests.lock().expect("lock").push(request.clone());
        match self.responses.lock().expect("lock").pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted response left")),
        }
    }
}

/// Sandbox that records calls as short strings instead of touching disk.
///
/// Writes to paths listed in `failing` return an error.
#[derive(Default)]
pub struct RecordingSandbox {
    calls: Mutex<Vec<String>>,
    failing: HashSet<String>,
}

impl RecordingSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(paths: &[&str]) -> Self {
        Self {
            failing: paths.iter().map(|p| (*p).to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }

    fn record(&self, call: String, target: &str) -> Result<()> {
        self.calls.lock().expect("lock").push(call);
        if self.failing.contains(target) {
            return Err(anyhow!("scripted failure for {target}"));
        }
        Ok(())
    }
}

impl SandboxFs for RecordingSandbox {
    async fn mount(&self, tree: &MountTree) -> Result<()> {
        let (_, files) = flatten(tree);
        self.record(format!("mount {} files", files.len()), "")
    }

    async fn write_file(&self, target: &str, _contents: &str) -> Result<()> {
        self.record(format!("write {target}"), target)
    }

    async fn mkdir(&self, target: &str, _opts: MkdirOptions) -> Result<()> {
        self.record(format!("mkdir {target}"), target)
    }

    async fn rm(&self, target: &str, _opts: RmOptions) -> Result<()> {
        self.record(format!("rm {target}"), target)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.record(format!("rename {from} {to}"), from)
    }

    async fn exec(&self, command: &str) -> Result<i32> {
        self.record(format!("exec {command}"), command)?;
        Ok(0)
    }
}

/// Observer that keeps the paths of applied and failed operations.
#[derive(Default)]
pub struct RecordingObserver {
    applied: Mutex<Vec<String>>,
    failed: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn applied_paths(&self) -> Vec<String> {
        self.applied.lock().expect("lock").clone()
    }

    pub fn failed_paths(&self) -> Vec<String> {
        self.failed.lock().expect("lock").clone()
    }
}

impl OperationObserver for RecordingObserver {
    fn applied(&self, op: &Operation) {
        self.applied.lock().expect("lock").push(op.path.clone());
    }

    fn failed(&self, op: &Operation, _error: &anyhow::Error) {
        self.failed.lock().expect("lock").push(op.path.clone());
    }
}
