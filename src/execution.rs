//! Execution Engine (C5).
//!
//! Runs an approved invocation on its own task, forwards streamed output,
//! detects cancellation, and translates the result into a terminal
//! `ToolCallState`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::call::ToolCallState;
use crate::error::ToolErrorKind;
use crate::invocation::{Invocation, LiveOutputCallback};
use crate::response::{convert, error_response};

const CANCELLED_DURING_EXECUTION: &str = "User cancelled tool execution.";

/// Coalescing point for live-output chunks across every call in a batch
///
/// Every chunk is forwarded to the external subscriber synchronously, as
/// soon as the tool produces it. The `live_output` field on each
/// `ToolCall`, by contrast, is only updated when the drain loop wakes up
/// and applies whatever is the latest chunk per `call_id` at that moment —
/// intermediate chunks for a call that is producing output faster than the
/// drain loop can keep up with are simply overwritten.
#[derive(Default)]
pub struct LiveOutputHub {
    pending: Mutex<HashMap<String, String>>,
    notify: Notify,
}

impl LiveOutputHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Build the per-call callback handed to `Invocation::execute`.
    pub fn callback_for(
        self: &Arc<Self>,
        call_id: String,
        external: Option<LiveOutputCallback>,
    ) -> LiveOutputCallback {
        let hub = Arc::clone(self);
        Arc::new(move |chunk: String| {
            if let Some(external) = &external {
                external(chunk.clone());
            }
            hub.pending.lock().unwrap().insert(call_id.clone(), chunk);
            hub.notify.notify_one();
        })
    }

    /// Wait until at least one chunk is pending, then drain everything
    /// accumulated so far. Returns `call_id -> latest chunk` pairs.
    pub async fn drain(&self) -> HashMap<String, String> {
        self.notify.notified().await;
        std::mem::take(&mut *self.pending.lock().unwrap())
    }
}

/// Outcome of driving one call through `Executing`.
pub struct ExecutionResult {
    pub call_id: String,
    pub state: ToolCallState,
}

/// Run `invocation` for `call_id`/`tool_name` to completion, honoring
/// `cancel`. Spawns the invocation on its own task so a panicking tool
/// cannot take the scheduler down with it; a panic surfaces as `UnhandledException`.
pub async fn run_invocation(
    call_id: String,
    tool_name: String,
    invocation: Arc<dyn Invocation>,
    cancel: CancellationToken,
    on_output: Option<LiveOutputCallback>,
) -> ExecutionResult {
    debug!(call_id = %call_id, tool = %tool_name, "executing tool call");

    let exec_cancel = cancel.clone();
    let join = tokio::spawn(async move { invocation.execute(exec_cancel, on_output).await });

    let state = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            warn!(call_id = %call_id, "tool call cancelled during execution");
            cancelled_state(&call_id, &tool_name)
        }
        joined = join => {
            match joined {
                Ok(Ok(outcome)) => {
                    let converted = convert(&call_id, &tool_name, outcome.llm_content);
                    ToolCallState::Success { response: converted }
                }
                Ok(Err(exec_err)) => {
                    let response = error_response(&call_id, &tool_name, exec_err.message.clone());
                    ToolCallState::Error {
                        response,
                        error_kind: exec_err.kind,
                    }
                }
                Err(join_err) => {
                    let message = format!("tool task failed: {join_err}");
                    let response = error_response(&call_id, &tool_name, message);
                    ToolCallState::Error {
                        response,
                        error_kind: ToolErrorKind::UnhandledException,
                    }
                }
            }
        }
    };

    ExecutionResult { call_id, state }
}

fn cancelled_state(call_id: &str, tool_name: &str) -> ToolCallState {
    let response = error_response(
        call_id,
        tool_name,
        format!("[Operation Cancelled] Reason: {CANCELLED_DURING_EXECUTION}"),
    );
    ToolCallState::Cancelled {
        response,
        preserved_display: None,
    }
}
