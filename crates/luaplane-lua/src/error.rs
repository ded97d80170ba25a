//! Error types for script loading and execution.

use thiserror::Error;

/// Errors that can occur while loading or running a script.
///
/// None of these reach the executor's caller: every failure is recovered
/// locally by rejecting or evicting the offending script, and the error
/// feeds the log line that explains the eviction.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// Lua runtime error from a `loop` or callback invocation,
    /// including an injected watchdog timeout.
    #[error("lua error: {0}")]
    Runtime(#[from] mlua::Error),

    /// Script file not found or unreadable.
    #[error("script not found: {0}")]
    ScriptNotFound(String),

    /// Compile failure, top-level execution failure, or an entry point
    /// that exists but is not a function.
    #[error("invalid script: {0}")]
    InvalidScript(String),

    /// The script's `init` raised.
    #[error("init failed: {0}")]
    InitFailed(String),
}
