//! Helper functions and constants
//!
//! Contains exit codes and error formatting for the driver.

use jsrun_script_host::ScriptError;

// ============================================================================
// Exit Codes
// ============================================================================

/// Script completed normally
pub const EXIT_SUCCESS: i32 = 0;

/// Script could not be read, failed to parse, threw, or was interrupted
pub const EXIT_SCRIPT_FAILURE: i32 = 64;

/// The host itself could not start (no secure seed, engine init failure)
pub const EXIT_STARTUP_FAILURE: i32 = 70;

/// The CPU profiler could not be started
pub const EXIT_PROFILER_FAILURE: i32 = 1;

// ============================================================================
// Error Formatting
// ============================================================================

/// Exit code for a failed run
pub fn exit_code(err: &ScriptError) -> i32 {
    if err.is_startup() {
        EXIT_STARTUP_FAILURE
    } else {
        EXIT_SCRIPT_FAILURE
    }
}

/// The single line printed to standard output for a failed run
pub fn error_line(err: &ScriptError) -> String {
    err.to_string().lines().next().unwrap_or_default().to_owned()
}

/// Indent each stack frame for display under the error line
pub fn format_stack(stack: &str) -> String {
    stack
        .lines()
        .map(str::trim)
        .filter(|frame| !frame.is_empty())
        .map(|frame| format!("    {frame}\n"))
        .collect()
}
