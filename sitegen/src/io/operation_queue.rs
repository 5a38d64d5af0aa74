//! FIFO buffer of sandbox operations and its drain loop.

use std::collections::VecDeque;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::path;
use crate::core::types::{Operation, OperationKind};
use crate::io::sandbox::{MkdirOptions, RmOptions, SandboxFs};

/// Receives per-operation outcomes while a drain runs.
pub trait OperationObserver {
    fn applied(&self, _op: &Operation) {}

    fn failed(&self, op: &Operation, error: &anyhow::Error);
}

/// Observer that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl OperationObserver for TracingObserver {
    fn applied(&self, op: &Operation) {
        debug!(kind = ?op.kind, path = %op.path, "operation applied");
    }

    fn failed(&self, op: &Operation, error: &anyhow::Error) {
        warn!(kind = ?op.kind, path = %op.path, error = %format!("{error:#}"), "operation failed");
    }
}

/// Outcome counts of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    pub failed: usize,
}

/// Operations waiting to be applied to the sandbox, oldest first.
#[derive(Debug, Clone, Default)]
pub struct OperationQueue {
    pending: VecDeque<Operation>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, op: Operation) {
        self.pending.push_back(op);
    }

    pub fn extend(&mut self, ops: impl IntoIterator<Item = Operation>) {
        self.pending.extend(ops);
    }

    /// Hand every queued operation to the caller, leaving the queue empty.
    pub fn take(&mut self) -> Vec<Operation> {
        self.pending.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Apply every queued operation to `sandbox`, one at a time, in order.
    ///
    /// Each operation is removed before it is attempted, so nothing is retried.
    /// A failure is reported to `observer` and the drain moves on.
    #[instrument(skip_all, fields(queued = self.pending.len()))]
    pub async fn drain<S, O>(&mut self, sandbox: &S, observer: &O) -> DrainReport
    where
        S: SandboxFs,
        O: OperationObserver + ?Sized,
    {
        let mut report = DrainReport::default();
        while let Some(op) = self.pending.pop_front() {
            match apply_operation(sandbox, &op).await {
                Ok(()) => {
                    report.applied += 1;
                    observer.applied(&op);
                }
                Err(err) => {
                    report.failed += 1;
                    observer.failed(&op, &err);
                }
            }
        }
        info!(applied = report.applied, failed = report.failed, "drained operations");
        report
    }
}

/// Mirror one operation onto the sandbox filesystem.
pub async fn apply_operation<S: SandboxFs>(sandbox: &S, op: &Operation) -> Result<()> {
    let recursive = MkdirOptions { recursive: true };
    match (op.kind, op.content.as_deref()) {
        (OperationKind::Create, None) => sandbox
            .mkdir(&op.path, recursive)
            .await
            .with_context(|| format!("create folder {}", op.path)),
        (OperationKind::Create | OperationKind::Edit, content) => {
            ensure_parent(sandbox, &op.path).await?;
            sandbox
                .write_file(&op.path, content.unwrap_or_default())
                .await
                .with_context(|| format!("write {}", op.path))
        }
        (OperationKind::Delete, _) => sandbox
            .rm(
                &op.path,
                RmOptions {
                    recursive: true,
                    force: true,
                },
            )
            .await
            .with_context(|| format!("delete {}", op.path)),
        (OperationKind::Rename, _) => {
            let new_path = op
                .new_path
                .as_deref()
                .ok_or_else(|| anyhow!("rename of {} has no new path", op.path))?;
            ensure_parent(sandbox, new_path).await?;
            sandbox
                .rename(&op.path, new_path)
                .await
                .with_context(|| format!("rename {} to {new_path}", op.path))
        }
    }
}

async fn ensure_parent<S: SandboxFs>(sandbox: &S, target: &str) -> Result<()> {
    let parent = path::parent(target);
    if parent.is_empty() {
        return Ok(());
    }
    sandbox
        .mkdir(parent, MkdirOptions { recursive: true })
        .await
        .with_context(|| format!("create parent {parent}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingObserver, RecordingSandbox};

    #[tokio::test]
    async fn drain_applies_in_fifo_order() {
        let sandbox = RecordingSandbox::new();
        let observer = RecordingObserver::default();
        let mut queue = OperationQueue::new();
        queue.extend([
            Operation::create_file("/index.html", "<html></html>"),
            Operation::create_folder("/assets"),
            Operation::edit("/src/app.js", "x"),
            Operation::rename("/src/app.js", "/lib/app.js"),
            Operation::delete("/assets"),
        ]);

        let report = queue.drain(&sandbox, &observer).await;

        assert_eq!(report, DrainReport { applied: 5, failed: 0 });
        assert!(queue.is_empty());
        assert_eq!(
            sandbox.calls(),
            vec![
                "write /index.html",
                "mkdir /assets",
                "mkdir /src",
                "write /src/app.js",
                "mkdir /lib",
                "rename /src/app.js /lib/app.js",
                "rm /assets",
            ]
        );
        assert_eq!(
            observer.applied_paths(),
            vec!["/index.html", "/assets", "/src/app.js", "/src/app.js", "/assets"]
        );
    }

    /// A failing write must not stop later operations.
    #[tokio::test]
    async fn failure_is_reported_and_drain_continues() {
        let sandbox = RecordingSandbox::failing(&["/broken.txt"]);
        let observer = RecordingObserver::default();
        let mut queue = OperationQueue::new();
        queue.enqueue(Operation::create_file("/broken.txt", "x"));
        queue.enqueue(Operation::create_file("/ok.txt", "y"));

        let report = queue.drain(&sandbox, &observer).await;

        assert_eq!(report, DrainReport { applied: 1, failed: 1 });
        assert_eq!(observer.failed_paths(), vec!["/broken.txt"]);
        assert_eq!(observer.applied_paths(), vec!["/ok.txt"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn take_empties_the_queue() {
        let mut queue = OperationQueue::new();
        queue.enqueue(Operation::delete("/a"));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.take(), vec![Operation::delete("/a")]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn rename_without_new_path_fails() {
        let sandbox = RecordingSandbox::new();
        let mut op = Operation::rename("/a", "/b");
        op.new_path = None;
        assert!(apply_operation(&sandbox, &op).await.is_err());
        assert!(sandbox.calls().is_empty());
    }
}
