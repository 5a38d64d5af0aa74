//! Sitegen UI server - prompt, edit and preview a generated project.

mod routes;
mod sse;
mod state;
mod worker;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::routing::get;
use clap::Parser;
use sitegen::io::config::{CONFIG_PATH, PROJECT_PATH, load_config};
use sitegen::io::generator::CommandGenerator;
use sitegen::io::project_store::load_record;
use sitegen::io::sandbox::{LocalSandbox, SandboxFs, SandboxRegistry};
use sitegen::session::Session;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "sitegen-ui")]
#[command(about = "Web UI for prompting, editing and previewing a generated site")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Project record (created on first save)
    #[arg(long, default_value = PROJECT_PATH)]
    project: PathBuf,

    /// Config file (missing file means defaults)
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Directory containing UI static files (defaults to ./ui/dist)
    #[arg(long)]
    ui_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sitegen_ui=info".parse()?)
                .add_directive("sitegen=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let cfg = load_config(&args.config)?;
    let project_path = std::path::absolute(&args.project)
        .with_context(|| format!("resolve {}", args.project.display()))?;

    let session = if project_path.exists() {
        Session::from_record(load_record(&project_path)?, cfg.default_stack)?
    } else {
        info!(project = %project_path.display(), "no project record, starting empty");
        Session::new(cfg.default_stack)
    };

    let registry = SandboxRegistry::new();
    let sandbox_root = cfg.sandbox.root.clone();
    let sandbox: Arc<LocalSandbox> = registry
        .acquire_or_create(|| async move { LocalSandbox::open(&sandbox_root).await })
        .await?;
    sandbox.mount(&session.mount_structure()).await?;

    let generator = Arc::new(CommandGenerator::from_config(&cfg.generator)?);
    let state = AppState::new(
        session,
        Arc::clone(&sandbox),
        generator,
        project_path.clone(),
        cfg.default_stack,
    );

    worker::start_worker(state.clone());
    sse::forward_server_ready(state.clone());
    sse::start_record_watcher(state.clone());

    let api_router = routes::api_router();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .nest("/api", api_router)
        .route("/events", get(sse::events_handler))
        .nest_service(
            "/sandbox",
            ServeDir::new(sandbox.root()).append_index_html_on_directories(true),
        )
        .layer(cors)
        .with_state(state);

    let ui_dir = args.ui_dir.unwrap_or_else(|| PathBuf::from("ui").join("dist"));
    if ui_dir.exists() {
        info!(ui_dir = %ui_dir.display(), "serving static UI files");
        app = app.fallback_service(ServeDir::new(ui_dir).append_index_html_on_directories(true));
    } else {
        info!(ui_dir = %ui_dir.display(), "UI directory not found, API-only mode");
    }

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "listening");
    sandbox.notify_server_ready(addr.port(), &format!("http://{addr}/sandbox/"));

    axum::serve(listener, app).await?;

    registry.release().await;
    Ok(())
}
