//! Server-Sent Events stream and background watchers.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use notify::{Event as NotifyEvent, EventKind, PollWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use sitegen::io::project_store::load_record;
use sitegen::session::Session;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::state::{AppState, ChangeEvent};

#[derive(Serialize)]
struct SsePayload {
    #[serde(rename = "type")]
    event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SsePayload {
    fn bare(event_type: &'static str) -> Self {
        SsePayload {
            event_type,
            path: None,
            url: None,
            error: None,
        }
    }
}

impl From<&ChangeEvent> for SsePayload {
    fn from(event: &ChangeEvent) -> Self {
        match event {
            ChangeEvent::StepsChanged => SsePayload::bare("steps_changed"),
            ChangeEvent::TreeChanged => SsePayload::bare("tree_changed"),
            ChangeEvent::OperationFailed { path, error } => SsePayload {
                path: Some(path.clone()),
                error: Some(error.clone()),
                ..SsePayload::bare("operation_failed")
            },
            ChangeEvent::ServerReady { url } => SsePayload {
                url: Some(url.clone()),
                ..SsePayload::bare("server_ready")
            },
            ChangeEvent::GenerationFailed { error } => SsePayload {
                error: Some(error.clone()),
                ..SsePayload::bare("generation_failed")
            },
            ChangeEvent::ProjectReloaded => SsePayload::bare("project_reloaded"),
        }
    }
}

/// SSE endpoint handler.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.event_tx.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            match rx.recv().await {
                Ok(change_event) => {
                    let payload = SsePayload::from(&change_event);
                    if let Ok(json) = serde_json::to_string(&payload) {
                        yield Ok(Event::default().event("change").data(json));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

/// Forward sandbox server-ready notifications to SSE clients.
pub fn forward_server_ready(state: AppState) {
    let mut ready = state.sandbox.server_ready();
    tokio::spawn(async move {
        while ready.changed().await.is_ok() {
            let url = ready.borrow_and_update().as_ref().map(|r| r.url.clone());
            if let Some(url) = url {
                state.publish(ChangeEvent::ServerReady { url });
            }
        }
    });
}

/// Watch the project record and reload the session when it changes on disk.
pub fn start_record_watcher(state: AppState) {
    tokio::spawn(async move {
        if let Err(e) = run_record_watcher(state).await {
            warn!(error = %e, "record watcher failed");
        }
    });
}

async fn run_record_watcher(state: AppState) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel::<NotifyEvent>(100);

    let mut watcher = PollWatcher::new(
        move |res: Result<NotifyEvent, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.try_send(event);
            }
        },
        notify::Config::default().with_poll_interval(Duration::from_millis(500)),
    )?;

    // Watch the directory so the record may be created after startup.
    let Some(dir) = state.project_path.parent().filter(|d| d.exists()) else {
        info!(path = %state.project_path.display(), "record directory missing, not watching");
        return Ok(());
    };
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    info!(path = %state.project_path.display(), "watching project record");

    while let Some(event) = rx.recv().await {
        if !touches_record(&state, &event) {
            continue;
        }
        match reload_if_changed(&state).await {
            Ok(true) => info!("reloaded project record"),
            Ok(false) => debug!("project record unchanged"),
            Err(e) => warn!(error = %format!("{e:#}"), "project record reload failed"),
        }
    }
    Ok(())
}

fn touches_record(state: &AppState, event: &NotifyEvent) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event.paths.iter().any(|p| p == &state.project_path)
}

/// Replace the session with the record on disk if it differs from the live one.
///
/// Saves made by this server leave the record equal to the session, so they
/// do not trigger a reload. A reload asks the drain worker to remount the
/// sandbox from the new tree.
pub async fn reload_if_changed(state: &AppState) -> anyhow::Result<bool> {
    let record = load_record(&state.project_path)?;
    {
        let mut session = state.session.lock().await;
        if session.to_record() == record {
            return Ok(false);
        }
        *session = Session::from_record(record, state.default_stack)?;
        state.request_remount();
    }
    state.publish(ChangeEvent::ProjectReloaded);
    state.publish(ChangeEvent::StepsChanged);
    state.publish(ChangeEvent::TreeChanged);
    Ok(true)
}
