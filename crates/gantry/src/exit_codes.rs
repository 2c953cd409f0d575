//! Exit codes for the CLI

use gantry_core::GantryError;

/// Success
pub const SUCCESS: i32 = 0;

/// General error
pub const ERROR: i32 = 1;

/// Configuration error (bad playbook, unknown group, invalid parameter)
pub const CONFIG_ERROR: i32 = 2;

/// At least one task failed on at least one host
pub const TASK_FAILED: i32 = 3;

/// A worker process could not be started
pub const WORKER_ERROR: i32 = 4;

/// Exit code for an error that aborted a command
pub fn for_error(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<GantryError>() {
        Some(GantryError::Worker(_)) => WORKER_ERROR,
        Some(e) if e.is_configuration() => CONFIG_ERROR,
        _ => ERROR,
    }
}
