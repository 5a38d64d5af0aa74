//! Generator abstraction for the chat completion collaborator.
//!
//! The [`Generator`] trait decouples the generation flows from the actual
//! model backend. [`CommandGenerator`] talks to any chat adapter command that
//! reads a JSON message list on stdin and answers on stdout. Tests use scripted
//! generators that return predetermined responses without spawning processes.

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::io::config::GeneratorConfig;
use crate::io::process::{CommandOutput, LineSink, run_command_with_lines, run_command_with_timeout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Parameters for one generator call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub messages: Vec<ChatMessage>,
}

/// Receives response fragments as they arrive.
pub type FragmentSink = LineSink;

/// Abstraction over chat completion backends.
pub trait Generator: Send + Sync {
    /// Run one completion and return the full response text.
    fn complete(&self, request: &GenerateRequest) -> Result<String>;

    /// Like [`Generator::complete`], delivering fragments to `sink` as they arrive.
    ///
    /// Backends without streaming deliver the whole response as one fragment.
    fn complete_streaming(&self, request: &GenerateRequest, sink: FragmentSink) -> Result<String> {
        let response = self.complete(request)?;
        sink(&response);
        Ok(response)
    }
}

impl<G: Generator + ?Sized> Generator for Arc<G> {
    fn complete(&self, request: &GenerateRequest) -> Result<String> {
        (**self).complete(request)
    }

    fn complete_streaming(&self, request: &GenerateRequest, sink: FragmentSink) -> Result<String> {
        (**self).complete_streaming(request, sink)
    }
}

/// Generator that spawns a chat adapter command per call.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandGenerator {
    pub fn from_config(cfg: &GeneratorConfig) -> Result<Self> {
        let (program, args) = cfg
            .command
            .split_first()
            .ok_or_else(|| anyhow!("generator.command must be a non-empty array"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
        })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    fn input(request: &GenerateRequest) -> Result<Vec<u8>> {
        serde_json::to_vec(request).context("serialize generator request")
    }

    fn finish(&self, output: &CommandOutput) -> Result<String> {
        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "generator timed out");
            return Err(anyhow!("generator timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "generator failed");
            return Err(anyhow!(
                "generator failed with status {:?}: {}",
                output.status.code(),
                output.stderr_tail(5)
            ));
        }
        if output.stdout_truncated > 0 {
            warn!(truncated = output.stdout_truncated, "generator response truncated");
        }
        let response = output.stdout_lossy();
        if response.trim().is_empty() {
            return Err(anyhow!("generator returned an empty response"));
        }
        debug!(bytes = response.len(), "generator responded");
        Ok(response)
    }
}

impl Generator for CommandGenerator {
    #[instrument(skip_all, fields(program = %self.program, messages = request.messages.len()))]
    fn complete(&self, request: &GenerateRequest) -> Result<String> {
        info!("calling generator");
        let input = Self::input(request)?;
        let output = run_command_with_timeout(
            self.command(),
            Some(&input),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run generator {}", self.program))?;
        self.finish(&output)
    }

    #[instrument(skip_all, fields(program = %self.program, messages = request.messages.len()))]
    fn complete_streaming(&self, request: &GenerateRequest, sink: FragmentSink) -> Result<String> {
        info!("calling generator (streaming)");
        let input = Self::input(request)?;
        let output = run_command_with_lines(
            self.command(),
            Some(&input),
            self.timeout,
            self.output_limit_bytes,
            sink,
        )
        .with_context(|| format!("run generator {}", self.program))?;
        self.finish(&output)
    }
}
