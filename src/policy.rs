//! Approval policy and scheduler-wide configuration.
//!
//! What happens after a `ProceedAlwaysTool`/`ProceedAlwaysServer` outcome —
//! approval-mode upgrades, trust-list bookkeeping, and similar policy — is
//! left to a surrounding policy layer. This crate resolves that by making
//! the policy a trait object the caller injects into `schedule`; the
//! scheduler core never depends on its internals, only on the
//! yes/no/ask-the-invocation decision for a given request.

use serde_json::Value;

/// What the policy layer decided for a given request, before any
/// interactive confirmation is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Skip confirmation entirely; scheduler records `ProceedAlways`.
    Bypass,
    /// Defer to the invocation's own `should_confirm_execute`.
    AskInvocation,
}

/// Pluggable approval-mode policy, injected per `schedule` call.
pub trait ApprovalPolicy: Send + Sync {
    /// Decide up front whether `tool_name` needs confirmation at all.
    fn decide(&self, tool_name: &str, args: &Value) -> PolicyDecision;

    /// Called once a confirmation resolves, purely as a notification hook —
    /// the scheduler does not act on the return value. A caller-supplied
    /// policy can use this to implement approval-mode upgrades (e.g.
    /// remembering `ProceedAlwaysTool` for future requests to the same
    /// tool).
    fn on_outcome(&self, _tool_name: &str, _outcome: crate::confirmation::ConfirmationOutcome) {}
}

/// Approval mode that never asks: every request proceeds immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct BypassAll;

impl ApprovalPolicy for BypassAll {
    fn decide(&self, _tool_name: &str, _args: &Value) -> PolicyDecision {
        PolicyDecision::Bypass
    }
}

/// Approval mode that always defers to the invocation's own
/// `should_confirm_execute` — the common "ask unless the tool says no
/// confirmation is needed" default.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysConfirm;

impl ApprovalPolicy for AlwaysConfirm {
    fn decide(&self, _tool_name: &str, _args: &Value) -> PolicyDecision {
        PolicyDecision::AskInvocation
    }
}

/// Scheduler-wide knobs. Constructed directly by the embedding
/// application; this crate never loads configuration from files or the
/// environment.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Optional cap on queued (not-yet-active) submissions. `None` means
    /// unbounded FIFO queueing, the default.
    pub max_queue_depth: Option<usize>,
    /// Whether `live_output` coalesces to the latest chunk between
    /// notifications. Default `true`.
    pub live_output_coalesce: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: None,
            live_output_coalesce: true,
        }
    }
}
