//! Stable exit codes for orchestrator CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid layout/config/state/input or any other error.
pub const INVALID: i32 = 1;
/// Pre-cycle norms denied the cycle start.
pub const DENIED: i32 = 2;
/// The planning step failed; the cycle was recorded as failed.
pub const CYCLE_FAILED: i32 = 3;
/// `orchestrator loop` stopped after too many consecutive failed cycles.
pub const LOOP_HALTED: i32 = 4;
