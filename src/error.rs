//! Crate-level error taxonomy.
//!
//! Two error surfaces exist, deliberately kept separate:
//!
//! - [`SchedulerError`] is returned from the public scheduler API (`schedule`,
//!   `handle_confirmation`, registry registration). These are Rust `Err`
//!   values in the ordinary sense.
//! - [`ToolErrorKind`] never crosses the scheduler boundary as an `Err`. It
//!   tags the terminal `Error` state of a single [`crate::call::ToolCall`]
//!   and is carried as data, per the propagation policy: tool failures are
//!   reported back to the model, not thrown.

use thiserror::Error;

/// Errors returned directly by scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `handle_confirmation` referenced a `call_id` that is not currently
    /// `AwaitingApproval` (either unknown, already resolved, or terminal).
    #[error("no call awaiting approval with id {0:?}")]
    NotFound(String),

    /// A queued submission was cancelled before it became the active batch.
    #[error("submission cancelled while queued")]
    CancelledWhileQueued,

    /// `max_queue_depth` was configured and the queue is full.
    #[error("scheduler queue is full (max depth {0})")]
    QueueFull(usize),
}

/// Registration-time errors from the [`crate::registry::ToolRegistry`].
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two tools were registered under the same name.
    #[error("a tool named {0:?} is already registered")]
    DuplicateTool(String),
}

/// First schema violation reported by [`crate::registry::Tool::build`].
#[derive(Debug, Clone, Error)]
#[error("invalid arguments for tool {tool:?}: {message}")]
pub struct SchemaError {
    pub tool: String,
    pub message: String,
}

impl SchemaError {
    pub fn new(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Tagged onto a terminal `Error` state; never
/// surfaced as a Rust `Err` to scheduler callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorKind {
    ToolNotRegistered,
    InvalidToolParams,
    UserDenied,
    CancelledInQueue,
    CancelledDuringExecution,
    ExecutionFailed,
    UnhandledException,
}

impl ToolErrorKind {
    /// Stable wire name, used in log fields and tests.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolNotRegistered => "tool_not_registered",
            Self::InvalidToolParams => "invalid_tool_params",
            Self::UserDenied => "user_denied",
            Self::CancelledInQueue => "cancelled_in_queue",
            Self::CancelledDuringExecution => "cancelled_during_execution",
            Self::ExecutionFailed => "execution_failed",
            Self::UnhandledException => "unhandled_exception",
        }
    }
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
