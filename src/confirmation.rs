//! Confirmation Protocol (C3).
//!
//! Defines the confirmation payload shapes a tool can ask the scheduler to
//! present to the user (or IDE), the outcomes that protocol can resolve to,
//! and the IDE-initiated resolution channel.

use tokio::sync::oneshot;

/// Interactive decision attached to a `ToolCall` in `AwaitingApproval`.
///
/// `ProceedAlways*` variants are hints to the surrounding policy layer (see
/// [`crate::policy::ApprovalPolicy`]); the scheduler treats them identically
/// to `ProceedOnce` for state-machine purposes but records the distinction
/// in `ToolCall::outcome`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    ProceedOnce,
    ProceedAlways,
    ProceedAlwaysTool,
    ProceedAlwaysServer,
    ModifyWithEditor,
    Cancel,
}

impl ConfirmationOutcome {
    pub fn is_proceed(&self) -> bool {
        matches!(
            self,
            Self::ProceedOnce | Self::ProceedAlways | Self::ProceedAlwaysTool | Self::ProceedAlwaysServer
        )
    }
}

/// Optional payload attached alongside a [`ConfirmationOutcome`].
#[derive(Debug, Clone, Default)]
pub struct ConfirmationResponsePayload {
    /// Inline-modify content for an `Edit` confirmation. Ignored when
    /// attached to any other payload kind.
    pub new_content: Option<String>,
}

/// A pending IDE-initiated resolution for an `Edit` confirmation. The IDE
/// may resolve the same confirmation the user is looking at; the scheduler
/// accepts only whichever of {user, IDE} answers first.
pub struct IdeResolutionChannel {
    pub receiver: oneshot::Receiver<IdeResolution>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdeResolution {
    Accepted,
    Rejected,
}

impl From<IdeResolution> for ConfirmationOutcome {
    fn from(resolution: IdeResolution) -> Self {
        match resolution {
            IdeResolution::Accepted => ConfirmationOutcome::ProceedOnce,
            IdeResolution::Rejected => ConfirmationOutcome::Cancel,
        }
    }
}

/// Confirmation payload variants presented to the user or IDE.
#[derive(Debug, Clone)]
pub enum ConfirmationDetails {
    /// A proposed file edit, shown as a unified diff.
    Edit(EditConfirmation),
    /// A shell command about to run.
    Shell {
        command: String,
        root_command: String,
    },
    /// Informational confirmation, e.g. an MCP tool's first use.
    Info {
        prompt: String,
        urls: Option<Vec<String>>,
    },
    /// An MCP-sourced tool identifying its originating server.
    McpServer {
        server_name: String,
        tool_name: String,
        tool_display_name: String,
    },
}

impl ConfirmationDetails {
    /// Title shown in the confirmation dialog; used for logging too.
    pub fn title(&self) -> &str {
        match self {
            ConfirmationDetails::Edit(edit) => &edit.title,
            ConfirmationDetails::Shell { .. } => "Run shell command",
            ConfirmationDetails::Info { .. } => "Confirm tool use",
            ConfirmationDetails::McpServer { .. } => "Confirm MCP tool use",
        }
    }
}

/// Edit confirmation payload: a unified diff against the file's current
/// content, plus whatever the scheduler needs to preserve the display after
/// a cancellation.
#[derive(Debug, Clone)]
pub struct EditConfirmation {
    pub title: String,
    pub file_name: String,
    pub file_path: String,
    pub file_diff: String,
    pub original_content: String,
    pub new_content: String,
    /// Scheduler-managed: set while an editor-modify round trip is pending.
    pub is_modifying: bool,
}

impl EditConfirmation {
    pub fn new(
        file_path: impl Into<String>,
        file_name: impl Into<String>,
        original_content: impl Into<String>,
        new_content: impl Into<String>,
    ) -> Self {
        let original_content = original_content.into();
        let new_content = new_content.into();
        let file_name = file_name.into();
        let file_diff = unified_diff(&file_name, &original_content, &new_content);
        Self {
            title: format!("Edit {file_name}"),
            file_name,
            file_path: file_path.into(),
            file_diff,
            original_content,
            new_content,
            is_modifying: false,
        }
    }
}

/// Render a unified diff between `original` and `updated`, labelled with
/// `file_name` on both sides.
pub fn unified_diff(file_name: &str, original: &str, updated: &str) -> String {
    use similar::TextDiff;

    TextDiff::from_lines(original, updated)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{file_name}"), &format!("b/{file_name}"))
        .to_string()
}

/// Snapshot preserved on an `Edit` confirmation that gets cancelled, so the
/// UI can still render what would have changed.
#[derive(Debug, Clone)]
pub struct PreservedEditDisplay {
    pub file_name: String,
    pub file_diff: String,
    pub original_content: String,
    pub new_content: String,
}

impl From<&EditConfirmation> for PreservedEditDisplay {
    fn from(edit: &EditConfirmation) -> Self {
        Self {
            file_name: edit.file_name.clone(),
            file_diff: edit.file_diff.clone(),
            original_content: edit.original_content.clone(),
            new_content: edit.new_content.clone(),
        }
    }
}
