//! Shared application state for the UI server.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sitegen::core::template::Stack;
use sitegen::io::generator::Generator;
use sitegen::io::sandbox::LocalSandbox;
use sitegen::session::Session;
use tokio::sync::{Mutex, Notify, broadcast};

/// Events broadcast to SSE clients.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    StepsChanged,
    TreeChanged,
    OperationFailed { path: String, error: String },
    ServerReady { url: String },
    GenerationFailed { error: String },
    /// The project record was replaced on disk and reloaded.
    ProjectReloaded,
}

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The single writer over steps, tree and history.
    pub session: Arc<Mutex<Session>>,
    pub sandbox: Arc<LocalSandbox>,
    pub generator: Arc<dyn Generator>,
    /// Where `POST /api/save` writes the project record.
    pub project_path: PathBuf,
    pub default_stack: Stack,
    /// Broadcast sender for change events.
    pub event_tx: Arc<broadcast::Sender<ChangeEvent>>,
    /// Wakes the drain worker.
    pub work: Arc<Notify>,
    /// Set when the sandbox must be remounted from the session tree before
    /// the next drain.
    pub remount: Arc<AtomicBool>,
    /// Held for a whole generator round trip so prompts run one at a time.
    pub generation: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        session: Session,
        sandbox: Arc<LocalSandbox>,
        generator: Arc<dyn Generator>,
        project_path: PathBuf,
        default_stack: Stack,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            session: Arc::new(Mutex::new(session)),
            sandbox,
            generator,
            project_path,
            default_stack,
            event_tx: Arc::new(event_tx),
            work: Arc::new(Notify::new()),
            remount: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(Mutex::new(())),
        }
    }

    /// Broadcast `event`. No subscribers is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Tell clients the session changed and wake the drain worker.
    pub fn session_changed(&self) {
        self.publish(ChangeEvent::StepsChanged);
        self.publish(ChangeEvent::TreeChanged);
        self.work.notify_one();
    }

    /// Ask the drain worker to remount the sandbox from the current tree.
    pub fn request_remount(&self) {
        self.remount.store(true, Ordering::SeqCst);
        self.work.notify_one();
    }
}
