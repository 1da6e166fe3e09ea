//! Stable exit codes for autopilot CLI commands.

use crate::core::types::RunStatus;

/// Command succeeded or the pipeline completed.
pub const OK: i32 = 0;
/// A step failed, or the layout/config/input was invalid.
pub const FAILED: i32 = 1;
/// The run was cancelled by the user.
pub const CANCELLED: i32 = 2;

/// Exit code for a finished pipeline run.
pub fn for_status(status: RunStatus) -> i32 {
    match status {
        RunStatus::Success => OK,
        RunStatus::Failed => FAILED,
        RunStatus::Cancelled => CANCELLED,
    }
}
