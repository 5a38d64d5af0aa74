//! Incremental site generator CLI.
//!
//! Turns generator output into steps, reconciles them into the project tree
//! stored in `.sitegen/project.json`, and mirrors the tree into a local
//! sandbox directory.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use sitegen::core::directive;
use sitegen::core::types::Step;
use sitegen::exit_codes;
use sitegen::io::config::{CONFIG_PATH, PROJECT_PATH, SitegenConfig, load_config};
use sitegen::io::generator::{CommandGenerator, FragmentSink};
use sitegen::io::project_store::{load_record, write_record};
use sitegen::io::sandbox::{LocalSandbox, SandboxFs};
use sitegen::logging;
use sitegen::session::{BatchOutcome, Session};

#[derive(Parser)]
#[command(
    name = "sitegen",
    version,
    about = "Incremental build-plan interpreter for generated websites"
)]
struct Cli {
    /// Project record to read and update.
    #[arg(long, global = true, default_value = PROJECT_PATH)]
    project: PathBuf,

    /// Config file (missing file means defaults).
    #[arg(long, global = true, default_value = CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse generator output and print the steps as JSON (stdin when FILE is omitted).
    Parse { file: Option<PathBuf> },
    /// Start a new project from a prompt.
    New {
        #[arg(short, long)]
        prompt: String,
        /// Overwrite an existing project record.
        #[arg(short, long)]
        force: bool,
    },
    /// Send an additional instruction for the existing project.
    Prompt {
        #[arg(short, long)]
        instruction: String,
    },
    /// Save a local file's content at a project path, as an editor save would.
    Edit {
        #[arg(long)]
        path: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Print the sandbox mount structure of the project.
    Mount,
    /// Mount the project into a local sandbox directory.
    Sync {
        /// Sandbox directory (defaults to `sandbox.root` from config).
        #[arg(long)]
        out: Option<PathBuf>,
        /// Command to run in the sandbox after mounting.
        #[arg(long)]
        run: Option<String>,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Parse { file } => cmd_parse(file.as_deref()),
        Command::New { prompt, force } => {
            let cfg = load_config(&cli.config)?;
            cmd_new(&cfg, &cli.project, &prompt, force)
        }
        Command::Prompt { instruction } => {
            let cfg = load_config(&cli.config)?;
            cmd_prompt(&cfg, &cli.project, &instruction)
        }
        Command::Edit { path, file } => {
            let cfg = load_config(&cli.config)?;
            cmd_edit(&cfg, &cli.project, &path, &file)
        }
        Command::Mount => {
            let cfg = load_config(&cli.config)?;
            cmd_mount(&cfg, &cli.project)
        }
        Command::Sync { out, run } => {
            let cfg = load_config(&cli.config)?;
            let out = out.unwrap_or_else(|| cfg.sandbox.root.clone());
            cmd_sync(&cfg, &cli.project, &out, run.as_deref())
        }
    }
}

fn cmd_parse(file: Option<&Path>) -> Result<i32> {
    let raw = match file {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
        }
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read stdin")?;
            buf
        }
    };
    let steps: Vec<Step> = directive::parse(&raw).collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&steps).context("serialize steps")?
    );
    if steps.is_empty() {
        eprintln!("no changes produced");
        return Ok(exit_codes::NO_CHANGES);
    }
    Ok(exit_codes::OK)
}

fn cmd_new(cfg: &SitegenConfig, project: &Path, prompt: &str, force: bool) -> Result<i32> {
    if project.exists() && !force {
        bail!(
            "project {} already exists (use --force to overwrite)",
            project.display()
        );
    }
    let generator = CommandGenerator::from_config(&cfg.generator)?;
    let mut session = with_stream(cfg, Session::new(cfg.default_stack));
    let outcome = session.start(&generator, prompt)?;
    write_record(project, &session.to_record())?;
    Ok(report(&outcome))
}

fn cmd_prompt(cfg: &SitegenConfig, project: &Path, instruction: &str) -> Result<i32> {
    let generator = CommandGenerator::from_config(&cfg.generator)?;
    let mut session = with_stream(cfg, open_session(cfg, project)?);
    let outcome = session.follow_up(&generator, instruction)?;
    write_record(project, &session.to_record())?;
    if outcome.is_empty() {
        eprintln!("no changes produced");
        return Ok(exit_codes::NO_CHANGES);
    }
    Ok(report(&outcome))
}

fn cmd_edit(cfg: &SitegenConfig, project: &Path, path: &str, file: &Path) -> Result<i32> {
    let content =
        fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let mut session = open_session(cfg, project)?;
    let outcome = session.save_file(path, &content);
    if outcome.failed == 0 {
        write_record(project, &session.to_record())?;
    }
    Ok(report(&outcome))
}

fn cmd_mount(cfg: &SitegenConfig, project: &Path) -> Result<i32> {
    let session = open_session(cfg, project)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&session.mount_structure()).context("serialize mount")?
    );
    Ok(exit_codes::OK)
}

fn cmd_sync(cfg: &SitegenConfig, project: &Path, out: &Path, command: Option<&str>) -> Result<i32> {
    let mut session = open_session(cfg, project)?;
    let runtime = tokio::runtime::Runtime::new().context("start async runtime")?;
    let failed = runtime.block_on(sync_sandbox(&mut session, out, command))?;
    if command.is_some() {
        write_record(project, &session.to_record())?;
    }
    info!(out = %out.display(), "synced project");
    println!("{}", out.display());
    if failed > 0 {
        return Ok(exit_codes::STEPS_FAILED);
    }
    Ok(exit_codes::OK)
}

/// Mount the session into `out`, then run `command` there. Returns the number of failed scripts.
async fn sync_sandbox(session: &mut Session, out: &Path, command: Option<&str>) -> Result<usize> {
    let sandbox = LocalSandbox::open(out).await?;
    sandbox.mount(&session.mount_structure()).await?;
    let Some(command) = command else {
        return Ok(0);
    };
    session.run_script(command);
    let mut failed = 0;
    for script in session.take_scripts() {
        let code = sandbox.exec(&script.command).await?;
        session.finish_script(script.step_id, code);
        if code != 0 {
            eprintln!("{} exited with code {code}", script.command);
            failed += 1;
        }
    }
    Ok(failed)
}

fn open_session(cfg: &SitegenConfig, project: &Path) -> Result<Session> {
    let record = load_record(project)?;
    Session::from_record(record, cfg.default_stack)
}

fn with_stream(cfg: &SitegenConfig, session: Session) -> Session {
    if !cfg.generator.stream {
        return session;
    }
    let sink: FragmentSink = Arc::new(|fragment: &str| {
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(fragment.as_bytes());
        let _ = stderr.flush();
    });
    session.with_fragment_sink(sink)
}

/// Print a one-line batch summary and pick the exit code.
fn report(outcome: &BatchOutcome) -> i32 {
    println!(
        "{} steps, {} operations, {} failed",
        outcome.steps.len(),
        outcome.operations,
        outcome.failed
    );
    if outcome.failed > 0 {
        return exit_codes::STEPS_FAILED;
    }
    exit_codes::OK
}
