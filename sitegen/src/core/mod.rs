//! Deterministic, pure logic shared by the interpreter.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod directive;
pub mod invariants;
pub mod mount;
pub mod path;
pub mod reconciler;
pub mod step_store;
pub mod template;
pub mod types;
