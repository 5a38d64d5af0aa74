//! Generation session: the single writer over steps, tree and history.
//!
//! A session owns the step log, the file tree, the operation queue, run-script
//! requests waiting for the sandbox and the generator conversation. Every
//! batch, whether parsed from generator output or produced by a user save,
//! goes through [`Session::ingest`] and is reconciled immediately, in arrival
//! order.

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::directive;
use crate::core::mount::{self, MountTree};
use crate::core::reconciler;
use crate::core::step_store::StepStore;
use crate::core::template::{Stack, detect_stack, parse_stack};
use crate::core::types::{
    Operation, ScriptRequest, Step, StepId, StepKind, StepStatus, StepTransition,
};
use crate::io::generator::{ChatMessage, FragmentSink, GenerateRequest, Generator};
use crate::io::operation_queue::OperationQueue;
use crate::io::project_store::{ProjectRecord, RecordFiles};
use crate::io::prompt::PromptEngine;
use crate::tree::FileTree;

/// What one batch did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Ids of the steps reconciled in this batch.
    pub steps: Vec<StepId>,
    /// Operations queued for the sandbox.
    pub operations: usize,
    pub failed: usize,
    /// Run-script steps now waiting for an exit code.
    pub scripts: usize,
}

impl BatchOutcome {
    /// True when the batch produced no steps at all.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn merge(&mut self, other: BatchOutcome) {
        self.steps.extend(other.steps);
        self.operations += other.operations;
        self.failed += other.failed;
        self.scripts += other.scripts;
    }
}

/// The initial flow between its classification and generation calls.
#[derive(Debug, Clone)]
pub struct StartPlan {
    prompt: String,
    stack: Stack,
    history: Vec<ChatMessage>,
    request: GenerateRequest,
}

impl StartPlan {
    pub fn stack(&self) -> Stack {
        self.stack
    }

    /// Generation request to send next.
    pub fn request(&self) -> &GenerateRequest {
        &self.request
    }
}

pub struct Session {
    prompt: String,
    default_stack: Stack,
    stack: Option<Stack>,
    steps: StepStore,
    tree: FileTree,
    queue: OperationQueue,
    scripts: Vec<ScriptRequest>,
    messages: Vec<ChatMessage>,
    prompts: PromptEngine,
    sink: Option<FragmentSink>,
}

impl Session {
    pub fn new(default_stack: Stack) -> Self {
        Self {
            prompt: String::new(),
            default_stack,
            stack: None,
            steps: StepStore::new(),
            tree: FileTree::new(),
            queue: OperationQueue::new(),
            scripts: Vec::new(),
            messages: Vec::new(),
            prompts: PromptEngine::new(),
            sink: None,
        }
    }

    /// Stream generator fragments to `sink` during `start` and `follow_up`.
    pub fn with_fragment_sink(mut self, sink: FragmentSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Rebuild a session from a persisted record.
    ///
    /// Step history is not persisted; new steps are numbered after
    /// `current_step`. The stack is read back from `/package.json`. The
    /// operation queue starts empty, callers mount
    /// [`Session::mount_structure`] to bring a sandbox up to date.
    pub fn from_record(record: ProjectRecord, default_stack: Stack) -> Result<Self> {
        let last_step = record.current_step.unwrap_or(0);
        let steps = StepStore::resume_after(last_step)
            .ok_or_else(|| anyhow!("current_step {last_step} leaves no room for new steps"))?;
        let tree = record.files.into_tree().context("restore project files")?;
        let mut session = Self::new(default_stack);
        session.prompt = record.prompt;
        session.stack = detect_stack(&tree);
        session.tree = tree;
        session.messages = record.llm_messages;
        session.steps = steps;
        Ok(session)
    }

    pub fn to_record(&self) -> ProjectRecord {
        ProjectRecord {
            prompt: self.prompt.clone(),
            files: RecordFiles::Tree(self.tree.clone()),
            llm_messages: self.messages.clone(),
            current_step: self.current_step(),
        }
    }

    /// Initial flow: classify the prompt, load the starter template, generate.
    ///
    /// Both generator calls happen before any state changes, so an upstream
    /// failure leaves the session exactly as it was.
    #[instrument(skip_all)]
    pub fn start<G: Generator + ?Sized>(
        &mut self,
        generator: &G,
        prompt: &str,
    ) -> Result<BatchOutcome> {
        let classify = self.start_request(prompt)?;
        let answer = generator.complete(&classify).context("classify prompt")?;
        let plan = self.plan_start(prompt, &answer)?;
        let response = self.call(generator, plan.request()).context("generate project")?;
        self.accept_start(plan, &response)
    }

    /// True once any step or message exists.
    pub fn is_started(&self) -> bool {
        !self.steps.all().is_empty() || !self.messages.is_empty()
    }

    /// Classification request that opens the initial flow.
    pub fn start_request(&self, prompt: &str) -> Result<GenerateRequest> {
        if self.is_started() {
            return Err(anyhow!("session already started"));
        }
        if prompt.trim().is_empty() {
            return Err(anyhow!("prompt is empty"));
        }
        self.prompts.classification_request(prompt, self.default_stack)
    }

    /// Pick the stack from the classification answer and build the generation request.
    pub fn plan_start(&self, prompt: &str, answer: &str) -> Result<StartPlan> {
        let stack = parse_stack(answer).unwrap_or_else(|| {
            warn!(answer = answer.trim(), fallback = %self.default_stack, "unrecognised stack");
            self.default_stack
        });
        info!(%stack, "selected stack");

        let history = self.prompts.initial_messages(stack, prompt)?;
        let request = self.prompts.generation_request(Some(stack), &history)?;
        Ok(StartPlan {
            prompt: prompt.trim().to_string(),
            stack,
            history,
            request,
        })
    }

    /// Ingest the starter template and the generated batch into this session.
    ///
    /// Steps reconciled while the generator ran (editor saves) stay in place;
    /// the template and generated batches are appended after them. Fails only
    /// if a conversation already exists.
    pub fn accept_start(&mut self, plan: StartPlan, response: &str) -> Result<BatchOutcome> {
        if !self.messages.is_empty() {
            return Err(anyhow!("session already started"));
        }
        self.prompt = plan.prompt;
        self.stack = Some(plan.stack);
        let mut outcome = self.ingest(directive::parse(plan.stack.artifact()));
        outcome.merge(self.ingest(directive::parse(response)));
        self.messages = plan.history;
        self.messages.push(ChatMessage::assistant(response));
        Ok(outcome)
    }

    /// Request for an additional instruction on top of the conversation so far.
    pub fn follow_up_request(&self, instruction: &str) -> Result<GenerateRequest> {
        if instruction.trim().is_empty() {
            return Err(anyhow!("instruction is empty"));
        }
        let mut history = self.messages.clone();
        history.push(ChatMessage::user(instruction.trim()));
        self.prompts.generation_request(self.stack, &history)
    }

    /// Record a successful follow-up exchange and ingest its steps.
    pub fn accept_follow_up(&mut self, instruction: &str, response: &str) -> BatchOutcome {
        self.messages.push(ChatMessage::user(instruction.trim()));
        self.messages.push(ChatMessage::assistant(response));
        self.ingest(directive::parse(response))
    }

    /// Follow-up flow: send history plus `instruction`, ingest the answer.
    #[instrument(skip_all)]
    pub fn follow_up<G: Generator + ?Sized>(
        &mut self,
        generator: &G,
        instruction: &str,
    ) -> Result<BatchOutcome> {
        let request = self.follow_up_request(instruction)?;
        let response = self.call(generator, &request).context("generate follow-up")?;
        Ok(self.accept_follow_up(instruction, &response))
    }

    fn call<G: Generator + ?Sized>(
        &self,
        generator: &G,
        request: &GenerateRequest,
    ) -> Result<String> {
        match &self.sink {
            Some(sink) => generator.complete_streaming(request, sink.clone()),
            None => generator.complete(request),
        }
    }

    /// Append a batch and reconcile it right away.
    pub fn ingest(&mut self, batch: impl IntoIterator<Item = Step>) -> BatchOutcome {
        let ids = self.steps.append(batch);
        if ids.is_empty() {
            warn!("no changes produced");
            return BatchOutcome::default();
        }
        self.reconcile()
    }

    /// Apply every pending step to the tree and queue the resulting operations.
    pub fn reconcile(&mut self) -> BatchOutcome {
        let pending = self.steps.pending();
        if pending.is_empty() {
            return BatchOutcome::default();
        }
        let reconciliation = reconciler::apply(&self.tree, &pending);
        self.steps.apply_transitions(&reconciliation.transitions);

        let outcome = BatchOutcome {
            steps: pending.iter().map(|s| s.id).collect(),
            operations: reconciliation.operations.len(),
            failed: reconciliation.failed_count(),
            scripts: reconciliation.scripts.len(),
        };
        self.tree = reconciliation.tree;
        self.queue.extend(reconciliation.operations);
        self.scripts.extend(reconciliation.scripts);
        outcome
    }

    /// A user edit from the editor, reconciled like any generated step.
    pub fn save_file(&mut self, path: &str, content: &str) -> BatchOutcome {
        self.steps.push(StepKind::EditFile, Some(path), Some(content));
        self.reconcile()
    }

    /// Queue a command for the sandbox as a run-script step.
    pub fn run_script(&mut self, command: &str) -> BatchOutcome {
        self.steps.push(StepKind::RunScript, None, Some(command));
        self.reconcile()
    }

    /// Settle an in-progress run-script step from the sandbox exit code.
    ///
    /// Returns false if `id` is not a run-script step waiting for its result.
    pub fn finish_script(&mut self, id: StepId, exit_code: i32) -> bool {
        let waiting = self
            .steps
            .get(id)
            .is_some_and(|s| s.kind == StepKind::RunScript && s.status == StepStatus::InProgress);
        if !waiting {
            warn!(id, "no run-script step waiting for an exit code");
            return false;
        }
        let transition = if exit_code == 0 {
            StepTransition {
                id,
                status: StepStatus::Completed,
                reason: None,
            }
        } else {
            StepTransition {
                id,
                status: StepStatus::Failed,
                reason: Some(format!("exited with code {exit_code}")),
            }
        };
        self.steps.apply_transitions(&[transition]) == 1
    }

    pub fn mount_structure(&self) -> MountTree {
        mount::project(&self.tree)
    }

    /// Hand queued operations to the drain worker.
    pub fn take_operations(&mut self) -> Vec<Operation> {
        self.queue.take()
    }

    /// Hand run-script requests to the sandbox.
    pub fn take_scripts(&mut self) -> Vec<ScriptRequest> {
        std::mem::take(&mut self.scripts)
    }

    pub fn queued_operations(&self) -> usize {
        self.queue.len()
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn stack(&self) -> Option<Stack> {
        self.stack
    }

    pub fn steps(&self) -> &[Step] {
        self.steps.all()
    }

    pub fn tree(&self) -> &FileTree {
        &self.tree
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn current_step(&self) -> Option<StepId> {
        self.steps.last_id()
    }
}
