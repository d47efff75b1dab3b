//! Tool Registry (C1).
//!
//! Maps a tool name to a [`Tool`] descriptor. Lookup is by exact name;
//! uniqueness is enforced at registration time rather than left to the last
//! writer to win.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{RegistryError, SchemaError};
use crate::invocation::Invocation;

/// A named capability the agent can invoke.
///
/// Tools are described by a capability set rather than an inheritance
/// hierarchy: `can_update_output` and `is_modifiable` are plain flags, and
/// dispatch happens through this single trait object.
pub trait Tool: Send + Sync {
    /// Registry key. Must be stable and unique.
    fn name(&self) -> &str;

    /// Human-facing name, shown in confirmation dialogs.
    fn display_name(&self) -> &str;

    /// One-line description, surfaced to the model and to the user.
    fn description(&self) -> &str;

    /// JSON-Schema-shaped parameter schema.
    fn parameter_schema(&self) -> &Value;

    /// Whether executions of this tool emit streamed output chunks.
    fn can_update_output(&self) -> bool {
        false
    }

    /// Whether this tool supports in-editor modification of its proposed
    /// action (only meaningful for tools that can produce an `Edit`
    /// confirmation).
    fn is_modifiable(&self) -> bool {
        false
    }

    /// Validate `args` and bind them to this tool, producing an
    /// [`Invocation`]. Pure and synchronous: any I/O is deferred to the
    /// invocation's `should_confirm_execute` / `execute`.
    fn build(&self, args: Value) -> Result<Arc<dyn Invocation>, SchemaError>;
}

/// Registry of tool descriptors, keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Returns [`RegistryError::DuplicateTool`] if a tool
    /// with the same name is already registered; registration never
    /// silently overwrites.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Look up a tool by exact name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
