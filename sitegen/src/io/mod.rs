//! Side-effecting boundaries: generator process, sandbox filesystem, files on disk.

pub mod config;
pub mod generator;
pub mod operation_queue;
pub mod process;
pub mod project_store;
pub mod prompt;
pub mod sandbox;
