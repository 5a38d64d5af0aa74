//! Prompt rendering for the generation flows.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::template::Stack;
use crate::io::generator::{ChatMessage, GenerateRequest};

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const CLASSIFY_TEMPLATE: &str = include_str!("prompts/classify.md");
const BASE_TEMPLATE: &str = include_str!("prompts/base.md");
const TEMPLATE_CONTEXT_TEMPLATE: &str = include_str!("prompts/template_context.md");

/// Files the sandbox holds that are never shown to the generator.
const HIDDEN_FILES: [&str; 2] = [".gitignore", "package-lock.json"];

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)
            .expect("system template should be valid");
        env.add_template("classify", CLASSIFY_TEMPLATE)
            .expect("classify template should be valid");
        env.add_template("base", BASE_TEMPLATE)
            .expect("base template should be valid");
        env.add_template("template_context", TEMPLATE_CONTEXT_TEMPLATE)
            .expect("template_context template should be valid");
        Self { env }
    }

    fn render_system(&self, stack: Option<Stack>) -> Result<String> {
        let template = self.env.get_template("system")?;
        Ok(template.render(context! { stack => stack.map(Stack::as_str) })?)
    }

    /// Request for the stack classification pre-call.
    pub fn classification_request(&self, prompt: &str, default: Stack) -> Result<GenerateRequest> {
        let template = self.env.get_template("classify")?;
        let instruction = template.render(context! {
            stacks => [Stack::NextJs, Stack::React, Stack::Node].map(Stack::as_str),
            default => default.as_str(),
        })?;
        Ok(GenerateRequest {
            messages: vec![
                ChatMessage::system(instruction),
                ChatMessage::user(prompt.trim()),
            ],
        })
    }

    /// Conversation that opens a project: base prompt, starter files, user prompt.
    pub fn initial_messages(&self, stack: Stack, prompt: &str) -> Result<Vec<ChatMessage>> {
        let base = self.env.get_template("base")?.render(context! {})?;
        let starter = self.env.get_template("template_context")?.render(context! {
            artifact => stack.artifact().trim(),
            hidden => HIDDEN_FILES,
        })?;
        Ok(vec![
            ChatMessage::user(base),
            ChatMessage::user(starter),
            ChatMessage::user(prompt.trim()),
        ])
    }

    /// Prefix a conversation with the system prompt.
    pub fn generation_request(
        &self,
        stack: Option<Stack>,
        history: &[ChatMessage],
    ) -> Result<GenerateRequest> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(self.render_system(stack)?));
        messages.extend_from_slice(history);
        Ok(GenerateRequest { messages })
    }
}
