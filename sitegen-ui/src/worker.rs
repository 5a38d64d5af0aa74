//! Background worker mirroring session changes into the sandbox.
//!
//! This is the only task that writes to the sandbox, so remounts, queued
//! operations and scripts never interleave.

use std::sync::atomic::Ordering;

use sitegen::core::types::Operation;
use sitegen::io::operation_queue::{DrainReport, OperationObserver, OperationQueue};
use sitegen::io::sandbox::SandboxFs;
use tracing::{debug, info, warn};

use crate::state::{AppState, ChangeEvent};

/// Broadcasts every failed operation to SSE clients.
struct BroadcastObserver<'a> {
    state: &'a AppState,
}

impl BroadcastObserver<'_> {
    fn report(&self, path: &str, error: &anyhow::Error) {
        let error = format!("{error:#}");
        warn!(path, error = %error, "sandbox write failed");
        self.state.publish(ChangeEvent::OperationFailed {
            path: path.to_string(),
            error,
        });
    }
}

impl OperationObserver for BroadcastObserver<'_> {
    fn applied(&self, op: &Operation) {
        debug!(path = %op.path, "operation applied");
    }

    fn failed(&self, op: &Operation, error: &anyhow::Error) {
        self.report(&op.path, error);
    }
}

/// Start the drain worker in a background task.
pub fn start_worker(state: AppState) {
    tokio::spawn(async move {
        loop {
            state.work.notified().await;
            drain_once(&state).await;
        }
    });
}

/// Remount if requested, drain queued operations, then run queued scripts
/// and settle their steps.
///
/// The session lock is only held to take work and to record results, never
/// across sandbox calls.
pub async fn drain_once(state: &AppState) -> DrainReport {
    let (mount, operations, scripts) = {
        let mut session = state.session.lock().await;
        let mount = state
            .remount
            .swap(false, Ordering::SeqCst)
            .then(|| session.mount_structure());
        (mount, session.take_operations(), session.take_scripts())
    };

    let observer = BroadcastObserver { state };
    if let Some(mount) = mount {
        match state.sandbox.mount(&mount).await {
            Ok(()) => info!("remounted sandbox"),
            Err(err) => observer.report("/", &err),
        }
    }

    let mut queue = OperationQueue::new();
    queue.extend(operations);
    let report = queue.drain(state.sandbox.as_ref(), &observer).await;

    if scripts.is_empty() {
        return report;
    }
    for script in scripts {
        let code = match state.sandbox.exec(&script.command).await {
            Ok(code) => code,
            Err(err) => {
                let error = format!("{err:#}");
                warn!(command = %script.command, error = %error, "script did not start");
                -1
            }
        };
        info!(command = %script.command, code, "script finished");
        state.session.lock().await.finish_script(script.step_id, code);
    }
    state.publish(ChangeEvent::StepsChanged);
    report
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;

    use sitegen::core::template::Stack;
    use sitegen::core::types::StepStatus;
    use sitegen::io::sandbox::LocalSandbox;
    use sitegen::session::Session;
    use sitegen::test_support::{ScriptedGenerator, sandbox_dir};

    use super::*;

    async fn state_in(dir: &std::path::Path) -> AppState {
        let sandbox = LocalSandbox::open(dir).await.expect("open");
        AppState::new(
            Session::new(Stack::NextJs),
            Arc::new(sandbox),
            Arc::new(ScriptedGenerator::new()),
            PathBuf::from("project.json"),
            Stack::NextJs,
        )
    }

    #[tokio::test]
    async fn drain_writes_saved_files() {
        let dir = sandbox_dir();
        let state = state_in(dir.path()).await;
        state.session.lock().await.save_file("/src/app.js", "run()");

        let report = drain_once(&state).await;

        assert_eq!(report.failed, 0);
        assert_eq!(
            fs::read_to_string(dir.path().join("src/app.js")).expect("read"),
            "run()"
        );
        assert_eq!(state.session.lock().await.queued_operations(), 0);
    }

    #[tokio::test]
    async fn failed_operation_is_broadcast() {
        let dir = sandbox_dir();
        let state = state_in(dir.path()).await;
        let mut rx = state.event_tx.subscribe();
        fs::create_dir(dir.path().join("notes.txt")).expect("mkdir");
        state.session.lock().await.save_file("/notes.txt", "n");

        let report = drain_once(&state).await;

        assert_eq!(report.failed, 1);
        let event = rx.try_recv().expect("event");
        assert!(
            matches!(event, ChangeEvent::OperationFailed { ref path, .. } if path == "/notes.txt")
        );
    }

    #[tokio::test]
    async fn remount_writes_the_session_tree() {
        let dir = sandbox_dir();
        let state = state_in(dir.path()).await;
        {
            let mut session = state.session.lock().await;
            session.save_file("/index.html", "v1");
            session.save_file("/index.html", "v2");
            session.take_operations();
        }
        state.request_remount();

        let report = drain_once(&state).await;

        assert_eq!(report, DrainReport::default());
        assert!(!state.remount.load(Ordering::SeqCst));
        assert_eq!(
            fs::read_to_string(dir.path().join("index.html")).expect("read"),
            "v2"
        );
    }

    #[tokio::test]
    async fn scripts_are_settled_by_exit_code() {
        let dir = sandbox_dir();
        let state = state_in(dir.path()).await;
        state.session.lock().await.run_script("exit 2");

        drain_once(&state).await;

        let session = state.session.lock().await;
        let step = session.steps().last().expect("step");
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.reason.as_deref(), Some("exited with code 2"));
    }
}
