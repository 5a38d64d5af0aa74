//! HTTP route handlers for the UI API.

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post, put};
use serde::{Deserialize, Serialize};
use sitegen::core::mount::MountTree;
use sitegen::core::types::Step;
use sitegen::io::generator::{ChatMessage, GenerateRequest};
use sitegen::io::project_store::write_record;
use sitegen::io::sandbox::ServerReady;
use sitegen::session::BatchOutcome;
use sitegen::tree::FileTree;
use tracing::warn;

use crate::state::{AppState, ChangeEvent};

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/steps", get(get_steps))
        .route("/tree", get(get_tree))
        .route("/mount", get(get_mount))
        .route("/messages", get(get_messages))
        .route("/preview", get(get_preview))
        .route("/start", post(start))
        .route("/prompt", post(prompt))
        .route("/files", put(put_file))
        .route("/run", post(run))
        .route("/save", post(save))
}

type ApiError = (StatusCode, String);

async fn health() -> &'static str {
    "ok"
}

async fn get_steps(State(state): State<AppState>) -> Json<Vec<Step>> {
    Json(state.session.lock().await.steps().to_vec())
}

async fn get_tree(State(state): State<AppState>) -> Json<FileTree> {
    Json(state.session.lock().await.tree().clone())
}

/// GET /api/mount - the tree in sandbox mount shape.
async fn get_mount(State(state): State<AppState>) -> Json<MountTree> {
    Json(state.session.lock().await.mount_structure())
}

async fn get_messages(State(state): State<AppState>) -> Json<Vec<ChatMessage>> {
    Json(state.session.lock().await.messages().to_vec())
}

/// GET /api/preview - dev server address, `null` until the sandbox is ready.
async fn get_preview(State(state): State<AppState>) -> Json<Option<ServerReady>> {
    Json(state.sandbox.server_ready().borrow().clone())
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct OutcomeResponse {
    steps: usize,
    operations: usize,
    failed: usize,
    scripts: usize,
}

impl From<&BatchOutcome> for OutcomeResponse {
    fn from(outcome: &BatchOutcome) -> Self {
        Self {
            steps: outcome.steps.len(),
            operations: outcome.operations,
            failed: outcome.failed,
            scripts: outcome.scripts,
        }
    }
}

#[derive(Deserialize)]
struct StartRequest {
    prompt: String,
}

/// POST /api/start - initial flow for an empty project.
///
/// The session lock is only taken between generator calls. Results land in
/// the live session, after any edits saved while the generator ran.
async fn start(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> Result<Json<OutcomeResponse>, ApiError> {
    let _generation = state.generation.lock().await;
    let classify = {
        let session = state.session.lock().await;
        if session.is_started() {
            return Err((StatusCode::CONFLICT, "project already started".to_string()));
        }
        session.start_request(&req.prompt).map_err(bad_request)?
    };

    let answer = complete_blocking(&state, classify).await?;
    let plan = state
        .session
        .lock()
        .await
        .plan_start(&req.prompt, &answer)
        .map_err(internal)?;
    let response = complete_blocking(&state, plan.request().clone()).await?;

    let outcome = state
        .session
        .lock()
        .await
        .accept_start(plan, &response)
        .map_err(|e| (StatusCode::CONFLICT, format!("{e:#}")))?;
    state.session_changed();
    Ok(Json(OutcomeResponse::from(&outcome)))
}

#[derive(Deserialize)]
struct PromptRequest {
    instruction: String,
}

/// POST /api/prompt - follow-up instruction.
///
/// The session lock is released while the generator runs, so reads and
/// editor saves stay responsive.
async fn prompt(
    State(state): State<AppState>,
    Json(req): Json<PromptRequest>,
) -> Result<Json<OutcomeResponse>, ApiError> {
    let _generation = state.generation.lock().await;
    let request = state
        .session
        .lock()
        .await
        .follow_up_request(&req.instruction)
        .map_err(bad_request)?;

    let response = complete_blocking(&state, request).await?;

    let outcome = state
        .session
        .lock()
        .await
        .accept_follow_up(&req.instruction, &response);
    state.session_changed();
    Ok(Json(OutcomeResponse::from(&outcome)))
}

/// Run one generator call on the blocking pool.
async fn complete_blocking(state: &AppState, request: GenerateRequest) -> Result<String, ApiError> {
    let generator = state.generator.clone();
    tokio::task::spawn_blocking(move || generator.complete(&request))
        .await
        .map_err(internal)?
        .map_err(|e| generation_failed(state, &e))
}

#[derive(Deserialize)]
struct FileSave {
    path: String,
    content: String,
}

/// PUT /api/files - editor save.
async fn put_file(
    State(state): State<AppState>,
    Json(req): Json<FileSave>,
) -> Json<OutcomeResponse> {
    let outcome = state.session.lock().await.save_file(&req.path, &req.content);
    state.session_changed();
    Json(OutcomeResponse::from(&outcome))
}

#[derive(Deserialize)]
struct RunRequest {
    command: String,
}

/// POST /api/run - queue a command for the sandbox as a run-script step.
async fn run(
    State(state): State<AppState>,
    Json(req): Json<RunRequest>,
) -> Result<Json<OutcomeResponse>, ApiError> {
    if req.command.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "command is empty".to_string()));
    }
    let outcome = state.session.lock().await.run_script(req.command.trim());
    state.session_changed();
    Ok(Json(OutcomeResponse::from(&outcome)))
}

/// POST /api/save - persist the project record.
async fn save(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    let record = state.session.lock().await.to_record();
    write_record(&state.project_path, &record).map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

fn generation_failed(state: &AppState, err: &anyhow::Error) -> ApiError {
    let error = format!("{err:#}");
    warn!(error = %error, "generation failed");
    state.publish(ChangeEvent::GenerationFailed {
        error: error.clone(),
    });
    (StatusCode::BAD_GATEWAY, error)
}

fn bad_request(err: anyhow::Error) -> ApiError {
    (StatusCode::BAD_REQUEST, format!("{err:#}"))
}

fn internal(err: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sitegen::core::template::Stack;
    use sitegen::core::types::{StepKind, StepStatus};
    use sitegen::io::generator::Generator;
    use sitegen::io::project_store::load_record;
    use sitegen::io::sandbox::LocalSandbox;
    use sitegen::session::Session;
    use sitegen::test_support::{ScriptedGenerator, artifact, sandbox_dir};
    use tokio::sync::Mutex;

    use super::*;
    use crate::worker::drain_once;

    /// Saves a file into the live session on every call, like an editor
    /// save landing while the generator runs.
    struct EditingGenerator {
        inner: ScriptedGenerator,
        session: Arc<Mutex<Session>>,
    }

    impl Generator for EditingGenerator {
        fn complete(&self, request: &GenerateRequest) -> anyhow::Result<String> {
            self.session.blocking_lock().save_file("/notes.md", "mine");
            self.inner.complete(request)
        }
    }

    async fn state(dir: &std::path::Path, generator: ScriptedGenerator) -> AppState {
        let sandbox = LocalSandbox::open(&dir.join("sandbox")).await.expect("open");
        AppState::new(
            Session::new(Stack::NextJs),
            Arc::new(sandbox),
            Arc::new(generator),
            dir.join("project.json"),
            Stack::NextJs,
        )
    }

    #[tokio::test]
    async fn start_then_prompt_grows_history() {
        let dir = sandbox_dir();
        let generator = ScriptedGenerator::new()
            .respond("node")
            .respond(artifact(&[("src/server.ts", "listen()")]))
            .respond(artifact(&[("src/routes.ts", "routes()")]));
        let state = state(dir.path(), generator).await;

        let started = start(
            State(state.clone()),
            Json(StartRequest {
                prompt: "an api".to_string(),
            }),
        )
        .await
        .expect("start");
        assert_eq!(started.0.failed, 0);

        let followed = prompt(
            State(state.clone()),
            Json(PromptRequest {
                instruction: "add routes".to_string(),
            }),
        )
        .await
        .expect("prompt");
        assert_eq!(followed.0.steps, 1);

        let session = state.session.lock().await;
        assert_eq!(session.messages().len(), 6);
        assert!(session.tree().find("/src/routes.ts").is_some());
    }

    #[tokio::test]
    async fn second_start_conflicts() {
        let dir = sandbox_dir();
        let state = state(dir.path(), ScriptedGenerator::new()).await;
        state.session.lock().await.save_file("/a.txt", "a");

        let err = start(
            State(state),
            Json(StartRequest {
                prompt: "again".to_string(),
            }),
        )
        .await
        .expect_err("conflict");
        assert_eq!(err.0, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn edits_saved_during_start_are_kept() {
        let dir = sandbox_dir();
        let mut state = state(dir.path(), ScriptedGenerator::new()).await;
        state.generator = Arc::new(EditingGenerator {
            inner: ScriptedGenerator::new()
                .respond("react")
                .respond(artifact(&[("src/generated.ts", "gen()")])),
            session: state.session.clone(),
        });

        let started = start(
            State(state.clone()),
            Json(StartRequest {
                prompt: "a landing page".to_string(),
            }),
        )
        .await
        .expect("start");
        assert_eq!(started.0.failed, 0);

        let session = state.session.lock().await;
        let notes = session.tree().find("/notes.md").expect("edit kept");
        assert_eq!(notes.content.as_deref(), Some("mine"));
        assert!(session.tree().find("/src/generated.ts").is_some());
        assert_eq!(session.stack(), Some(Stack::React));
        assert_eq!(session.messages().len(), 4);
    }

    #[tokio::test]
    async fn start_with_empty_prompt_is_rejected() {
        let dir = sandbox_dir();
        let state = state(dir.path(), ScriptedGenerator::new()).await;

        let err = start(
            State(state.clone()),
            Json(StartRequest {
                prompt: " ".to_string(),
            }),
        )
        .await
        .expect_err("rejected");
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert!(!state.session.lock().await.is_started());
    }

    #[tokio::test]
    async fn run_queues_a_script_settled_by_the_worker() {
        let dir = sandbox_dir();
        let state = state(dir.path(), ScriptedGenerator::new()).await;

        let queued = run(
            State(state.clone()),
            Json(RunRequest {
                command: "exit 3".to_string(),
            }),
        )
        .await
        .expect("run");
        assert_eq!(queued.0.scripts, 1);

        drain_once(&state).await;

        let steps = get_steps(State(state)).await.0;
        let step = steps.last().expect("step");
        assert_eq!(step.kind, StepKind::RunScript);
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.reason.as_deref(), Some("exited with code 3"));
    }

    #[tokio::test]
    async fn run_rejects_an_empty_command() {
        let dir = sandbox_dir();
        let state = state(dir.path(), ScriptedGenerator::new()).await;

        let err = run(
            State(state.clone()),
            Json(RunRequest {
                command: String::new(),
            }),
        )
        .await
        .expect_err("rejected");
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert!(state.session.lock().await.steps().is_empty());
    }

    #[tokio::test]
    async fn generator_failure_is_broadcast_and_state_kept() {
        let dir = sandbox_dir();
        let state = state(dir.path(), ScriptedGenerator::new().fail("overloaded")).await;
        let mut rx = state.event_tx.subscribe();

        let err = prompt(
            State(state.clone()),
            Json(PromptRequest {
                instruction: "add a footer".to_string(),
            }),
        )
        .await
        .expect_err("upstream failure");

        assert_eq!(err.0, StatusCode::BAD_GATEWAY);
        assert!(err.1.contains("overloaded"));
        assert!(matches!(rx.try_recv(), Ok(ChangeEvent::GenerationFailed { .. })));
        assert!(state.session.lock().await.messages().is_empty());
    }

    #[tokio::test]
    async fn empty_instruction_is_rejected() {
        let dir = sandbox_dir();
        let state = state(dir.path(), ScriptedGenerator::new()).await;

        let err = prompt(
            State(state),
            Json(PromptRequest {
                instruction: "  ".to_string(),
            }),
        )
        .await
        .expect_err("rejected");
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn save_onto_folder_reports_failed_step() {
        let dir = sandbox_dir();
        let state = state(dir.path(), ScriptedGenerator::new()).await;
        state.session.lock().await.save_file("/src/app.js", "x");

        let outcome = put_file(
            State(state.clone()),
            Json(FileSave {
                path: "/src".to_string(),
                content: "oops".to_string(),
            }),
        )
        .await;

        assert_eq!(outcome.0.failed, 1);
        let steps = get_steps(State(state)).await.0;
        assert_eq!(steps.last().map(|s| s.status), Some(StepStatus::Failed));
    }

    #[tokio::test]
    async fn save_writes_record() {
        let dir = sandbox_dir();
        let state = state(dir.path(), ScriptedGenerator::new()).await;
        state.session.lock().await.save_file("/index.html", "<p/>");

        let status = save(State(state.clone())).await.expect("save");

        assert_eq!(status, StatusCode::NO_CONTENT);
        let record = load_record(&state.project_path).expect("load");
        assert_eq!(record.current_step, Some(1));
    }

    #[tokio::test]
    async fn preview_is_null_until_ready() {
        let dir = sandbox_dir();
        let state = state(dir.path(), ScriptedGenerator::new()).await;
        assert_eq!(get_preview(State(state.clone())).await.0, None);

        state.sandbox.notify_server_ready(3001, "http://127.0.0.1:3001/sandbox/");
        let ready = get_preview(State(state)).await.0.expect("ready");
        assert_eq!(ready.port, 3001);
    }

    #[test]
    fn outcome_response_counts_steps() {
        let outcome = BatchOutcome {
            steps: vec![4, 5],
            operations: 1,
            failed: 1,
            scripts: 0,
        };
        assert_eq!(
            OutcomeResponse::from(&outcome),
            OutcomeResponse {
                steps: 2,
                operations: 1,
                failed: 1,
                scripts: 0,
            }
        );
    }
}
