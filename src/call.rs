//! The `ToolCall` data model: the central entity the scheduler
//! drives through a closed, tagged state machine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::confirmation::{ConfirmationDetails, ConfirmationOutcome, PreservedEditDisplay};
use crate::error::ToolErrorKind;
use crate::invocation::Invocation;
use crate::registry::Tool;
use crate::response::ConvertedResponse;

/// Input to `schedule`: one requested tool call.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub name: String,
    pub args: Value,
    pub prompt_id: String,
}

impl ToolCallRequest {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            args,
            prompt_id: String::new(),
        }
    }

    pub fn with_prompt_id(mut self, prompt_id: impl Into<String>) -> Self {
        self.prompt_id = prompt_id.into();
        self
    }
}

/// The seven terminal/non-terminal states a `ToolCall` can occupy. Matches
/// are expected to be exhaustive everywhere in this crate — there is no
/// default/wildcard arm hiding an unreachable state.
#[derive(Clone)]
pub enum ToolCallState {
    Validating,
    AwaitingApproval {
        confirmation_details: ConfirmationDetails,
        is_modifying: bool,
    },
    Scheduled,
    Executing {
        live_output: Option<String>,
    },
    Success {
        response: ConvertedResponse,
    },
    Error {
        response: ConvertedResponse,
        error_kind: ToolErrorKind,
    },
    Cancelled {
        response: ConvertedResponse,
        preserved_display: Option<PreservedEditDisplay>,
    },
}

impl ToolCallState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ToolCallState::Success { .. } | ToolCallState::Error { .. } | ToolCallState::Cancelled { .. }
        )
    }

    pub fn is_stable(&self) -> bool {
        // "stable" means ready to move on: terminal or Scheduled.
        self.is_terminal() || matches!(self, ToolCallState::Scheduled)
    }

    /// Stable name for logging.
    pub fn label(&self) -> &'static str {
        match self {
            ToolCallState::Validating => "validating",
            ToolCallState::AwaitingApproval { .. } => "awaiting_approval",
            ToolCallState::Scheduled => "scheduled",
            ToolCallState::Executing { .. } => "executing",
            ToolCallState::Success { .. } => "success",
            ToolCallState::Error { .. } => "error",
            ToolCallState::Cancelled { .. } => "cancelled",
        }
    }
}

/// One pending/active/terminal invocation of a tool, uniquely identified by
/// `call_id`.
pub struct ToolCall {
    pub call_id: String,
    pub request: ToolCallRequest,
    /// Absent only in the `ToolNotRegistered` terminal case.
    pub tool: Option<Arc<dyn Tool>>,
    /// Absent before validation succeeds, or on validation failure.
    pub invocation: Option<Arc<dyn Invocation>>,
    pub state: ToolCallState,
    pub outcome: Option<ConfirmationOutcome>,
    pub start_time: Option<Instant>,
    pub duration_ms: Option<u64>,
}

impl ToolCall {
    pub fn new(request: ToolCallRequest) -> Self {
        Self {
            call_id: request.call_id.clone(),
            request,
            tool: None,
            invocation: None,
            state: ToolCallState::Validating,
            outcome: None,
            start_time: None,
            duration_ms: None,
        }
    }

    /// I2: `start_time` is assigned exactly once.
    pub fn mark_started(&mut self) {
        if self.start_time.is_none() {
            self.start_time = Some(Instant::now());
        }
    }

    /// I4: `outcome` is never overwritten once a `Cancel` or `ProceedAlways*`
    /// has been recorded.
    pub fn record_outcome(&mut self, outcome: ConfirmationOutcome) {
        let locked = matches!(
            self.outcome,
            Some(ConfirmationOutcome::Cancel)
                | Some(ConfirmationOutcome::ProceedAlways)
                | Some(ConfirmationOutcome::ProceedAlwaysTool)
                | Some(ConfirmationOutcome::ProceedAlwaysServer)
        );
        if !locked {
            self.outcome = Some(outcome);
        }
    }

    /// I1: transitioning out of a terminal state is a no-op. Returns
    /// whether the transition was applied.
    pub fn transition(&mut self, new_state: ToolCallState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        if new_state.is_terminal() {
            let elapsed = self
                .start_time
                .map(|start| start.elapsed())
                .unwrap_or(Duration::ZERO);
            self.duration_ms = Some(elapsed.as_millis() as u64);
        }
        self.state = new_state;
        true
    }
}
