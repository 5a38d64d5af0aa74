//! Incremental build-plan interpreter for AI-generated websites.
//!
//! A generator (an LLM behind a chat contract) answers prompts with artifact
//! markup. This crate turns that markup into steps, reconciles the steps into
//! an in-memory file tree, and mirrors the tree into a sandbox filesystem. The
//! architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (directive parsing, step log, tree
//!   reconciliation, mount projection). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting boundaries (generator process, sandbox
//!   filesystem, operation queue drain, config and project record files).
//!
//! [`session`] coordinates core logic with I/O to implement the generation
//! flows used by the CLI and the preview server.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tree;
