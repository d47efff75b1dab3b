//! Invocation Builder (C2) and the invocation/tool-result contract that the
//! Execution Engine (C5) and Response Converter (C6) consume.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::confirmation::ConfirmationDetails;
use crate::error::ToolErrorKind;

/// A single chunk of streamed output, forwarded to subscribers in source
/// order and coalesced into the owning `ToolCall`'s `live_output` field.
pub type LiveOutputCallback = Arc<dyn Fn(String) + Send + Sync>;

/// A validated binding of a tool to specific arguments.
///
/// Validation (performed by [`crate::registry::Tool::build`]) is synchronous
/// and pure; everything here is async because it may perform I/O
/// (`should_confirm_execute` probes file state, `execute` runs the tool).
#[async_trait]
pub trait Invocation: Send + Sync {
    /// Human-readable description of what this invocation will do, used in
    /// confirmation dialogs and logs.
    fn description(&self) -> String;

    /// The validated arguments currently bound to this invocation.
    fn args(&self) -> &Value;

    /// Decide whether this invocation needs interactive confirmation before
    /// it may run. Returning `None` means "proceed without asking" — the
    /// scheduler still records an outcome of `ProceedAlways` for bookkeeping.
    async fn should_confirm_execute(
        &self,
        cancel: &CancellationToken,
    ) -> Option<ConfirmationDetails>;

    /// Run the invocation to completion. `on_output` is present only when
    /// the owning tool's `can_update_output()` is true and a live-output
    /// subscriber is attached to the batch.
    async fn execute(
        &self,
        cancel: CancellationToken,
        on_output: Option<LiveOutputCallback>,
    ) -> Result<ToolOutcome, ToolExecError>;

    /// Present only for tools where `is_modifiable()` is true.
    fn modify_context(&self) -> Option<Arc<dyn ModifyContext>> {
        None
    }
}

/// Capability used by the in-dialog modify flow.
#[async_trait]
pub trait ModifyContext: Send + Sync {
    /// Current on-disk (or otherwise live) content this invocation would
    /// replace.
    async fn current_content(&self) -> anyhow::Result<String>;

    /// Synthesise updated tool arguments from the user's edited content.
    /// `original_args` are the invocation's args before modification.
    fn updated_params(
        &self,
        current_content: &str,
        new_content: &str,
        original_args: &Value,
    ) -> anyhow::Result<Value>;
}

/// Successful result of [`Invocation::execute`], pre-canonicalisation.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub llm_content: LlmContent,
    pub return_display: Option<String>,
}

impl ToolOutcome {
    pub fn text(content: impl Into<String>) -> Self {
        let text = content.into();
        Self {
            return_display: Some(text.clone()),
            llm_content: LlmContent::Text(text),
        }
    }
}

/// Failure result of [`Invocation::execute`]. `kind` defaults to
/// `ExecutionFailed`; callers that know their failure is something else
/// (there is no other variant an `Invocation` can itself produce — panics
/// are caught by the Execution Engine, not here) may still report it.
#[derive(Debug, Clone)]
pub struct ToolExecError {
    pub message: String,
    pub kind: ToolErrorKind,
}

impl ToolExecError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ToolErrorKind::ExecutionFailed,
        }
    }
}

impl fmt::Display for ToolExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ToolExecError {}

/// `llm_content` as produced by a tool: a bare string, a single part, or an
/// ordered sequence of parts. See the Response Converter (C6) in `response.rs`.
#[derive(Debug, Clone)]
pub enum LlmContent {
    Text(String),
    Part(Part),
    Parts(Vec<Part>),
}

impl From<String> for LlmContent {
    fn from(value: String) -> Self {
        LlmContent::Text(value)
    }
}

impl From<&str> for LlmContent {
    fn from(value: &str) -> Self {
        LlmContent::Text(value.to_string())
    }
}

/// One element of an `llm_content` sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    InlineData { mime_type: String, data: String },
    FileData { mime_type: String, file_uri: String },
    FunctionResponse(crate::response::FunctionResponsePart),
}

/// Minimal `Invocation` used by unit and integration tests: always succeeds,
/// never needs confirmation, echoes its constructor argument back as text.
pub struct EchoInvocation {
    message: String,
    args: Value,
}

impl EchoInvocation {
    pub fn new(message: String) -> Self {
        let args = serde_json::json!({ "msg": message });
        Self { message, args }
    }
}

#[async_trait]
impl Invocation for EchoInvocation {
    fn description(&self) -> String {
        format!("echo {:?}", self.message)
    }

    fn args(&self) -> &Value {
        &self.args
    }

    async fn should_confirm_execute(
        &self,
        _cancel: &CancellationToken,
    ) -> Option<ConfirmationDetails> {
        None
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        _on_output: Option<LiveOutputCallback>,
    ) -> Result<ToolOutcome, ToolExecError> {
        Ok(ToolOutcome::text(self.message.clone()))
    }
}
