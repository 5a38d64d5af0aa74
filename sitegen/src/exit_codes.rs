//! Stable exit codes for sitegen CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed due to invalid input, config, project record or other errors.
pub const INVALID: i32 = 1;
/// The generator output parsed to zero steps ("no changes produced").
pub const NO_CHANGES: i32 = 2;
/// At least one step of the applied batches ended in `failed`.
pub const STEPS_FAILED: i32 = 3;
