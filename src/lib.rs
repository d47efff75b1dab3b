//! # tool-call-scheduler
//!
//! Concurrent scheduler for running tool calls requested by an LLM inside an
//! interactive agent CLI: validation against a tool registry, interactive
//! confirmation (including inline and external-editor modify), concurrent
//! execution with live-output streaming, and conversion of tool results back
//! into the canonical function-response shape the model expects.
//!
//! ## Architecture
//!
//! - `registry`: maps tool names to [`registry::Tool`] descriptors.
//! - `invocation`: the [`invocation::Invocation`] contract a validated tool
//!   binding implements, plus the in-dialog [`invocation::ModifyContext`]
//!   capability.
//! - `confirmation`: the confirmation payload shapes and outcomes a
//!   [`call::ToolCall`] can be waiting on.
//! - `call`: the [`call::ToolCall`] closed, tagged state machine.
//! - `execution`: runs an approved invocation to completion, bridging its
//!   synchronous live-output callback into async scheduler state.
//! - `response`: normalises whatever a tool returned into the canonical
//!   function-response part sequence.
//! - `policy`: the pluggable [`policy::ApprovalPolicy`] and
//!   [`policy::SchedulerConfig`].
//! - `observer`: the [`observer::SchedulerObserver`] notification surface.
//! - `scheduler`: [`scheduler::Scheduler`], the component that ties all of
//!   the above together.
//!
//! ## Quickstart
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use tool_call_scheduler::call::ToolCallRequest;
//! use tool_call_scheduler::policy::{BypassAll, SchedulerConfig};
//! use tool_call_scheduler::registry::ToolRegistry;
//! use tool_call_scheduler::scheduler::Scheduler;
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = Arc::new(ToolRegistry::new());
//!     let scheduler = Scheduler::new(registry, SchedulerConfig::default());
//!     let policy = BypassAll;
//!     let requests = vec![ToolCallRequest::new("call-1", "read_file", serde_json::json!({}))];
//!     let _snapshots = scheduler
//!         .schedule(requests, &policy, CancellationToken::new())
//!         .await;
//! }
//! ```

pub mod call;
pub mod confirmation;
pub mod error;
pub mod execution;
pub mod invocation;
pub mod observer;
pub mod policy;
pub mod registry;
pub mod response;
pub mod scheduler;

pub use call::{ToolCall, ToolCallRequest, ToolCallState};
pub use error::{RegistryError, SchedulerError, SchemaError, ToolErrorKind};
pub use observer::{SchedulerObserver, ToolCallSnapshot};
pub use policy::{ApprovalPolicy, SchedulerConfig};
pub use registry::{Tool, ToolRegistry};
pub use scheduler::Scheduler;
