//! Scheduler notification surface.

use async_trait::async_trait;

use crate::call::ToolCall;

/// Subscriber to scheduler state changes. Every hook may suspend — the
/// scheduler awaits them before continuing, which is what lets
/// `is_running()` stay true for the duration of `on_all_complete` (the
/// "finalising" window).
#[async_trait]
pub trait SchedulerObserver: Send + Sync {
    /// Fired on every state change or live-output mutation, for any call in
    /// the active batch. `all_tool_calls` is a consistent snapshot at the
    /// moment of the transition.
    async fn on_update(&self, all_tool_calls: &[ToolCallSnapshot]) {
        let _ = all_tool_calls;
    }

    /// Fired exactly once per batch, after every call in it has reached a
    /// terminal state.
    async fn on_all_complete(&self, completed_batch: &[ToolCallSnapshot]) {
        let _ = completed_batch;
    }

    /// Fired once per streamed output chunk, in source order, for any call
    /// whose tool can stream output. Unlike the coalesced `live_output`
    /// field carried by `on_update`, every chunk reaches this hook even if
    /// the next one supersedes it before the next `on_update` fires.
    async fn on_output(&self, call_id: &str, chunk: &str) {
        let _ = (call_id, chunk);
    }
}

/// Read-only view of a `ToolCall` handed to observers. Deliberately does
/// not expose `tool`/`invocation` handles — observers render state, they
/// don't drive it.
#[derive(Clone)]
pub struct ToolCallSnapshot {
    pub call_id: String,
    pub name: String,
    pub state: crate::call::ToolCallState,
    pub outcome: Option<crate::confirmation::ConfirmationOutcome>,
    pub duration_ms: Option<u64>,
}

impl From<&ToolCall> for ToolCallSnapshot {
    fn from(call: &ToolCall) -> Self {
        Self {
            call_id: call.call_id.clone(),
            name: call.request.name.clone(),
            state: call.state.clone(),
            outcome: call.outcome,
            duration_ms: call.duration_ms,
        }
    }
}

/// Observer that does nothing; the default when a caller has no UI/IDE to
/// notify.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SchedulerObserver for NoopObserver {}
