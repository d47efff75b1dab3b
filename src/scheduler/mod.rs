//! Scheduler Core (C4).
//!
//! Owns the active batch, serialises batches to at most one in flight,
//! drives every call through confirmation and execution, and is the only
//! place that mutates `ToolCall::state` directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use uuid::Uuid;

use crate::call::{ToolCall, ToolCallRequest, ToolCallState};
use crate::confirmation::{
    ConfirmationDetails, ConfirmationOutcome, ConfirmationResponsePayload, EditConfirmation,
    IdeResolution, IdeResolutionChannel, PreservedEditDisplay,
};
use crate::error::{SchedulerError, ToolErrorKind};
use crate::execution::{run_invocation, LiveOutputHub};
use crate::invocation::{Invocation, LiveOutputCallback};
use crate::observer::{NoopObserver, SchedulerObserver, ToolCallSnapshot};
use crate::policy::{ApprovalPolicy, PolicyDecision, SchedulerConfig};
use crate::registry::ToolRegistry;
use crate::response::error_response;

/// External-editor round trip for the `ModifyWithEditor` outcome. Separate
/// from [`crate::invocation::ModifyContext`], which drives in-dialog edits
/// instead of launching an editor process.
#[async_trait]
pub trait EditorModify: Send + Sync {
    async fn modify(&self, edit: &EditConfirmation) -> anyhow::Result<EditorModifyResult>;
}

pub struct EditorModifyResult {
    pub updated_params: Value,
    pub updated_diff: String,
}

type ConfirmationSender = oneshot::Sender<(ConfirmationOutcome, ConfirmationResponsePayload)>;

struct ActiveBatch {
    calls: IndexMap<String, ToolCall>,
    pending_confirmations: HashMap<String, ConfirmationSender>,
    /// IDE-attached resolution listeners, keyed by `call_id`, consumed the
    /// next time `drive_confirmation` opens a confirmation round for that
    /// call.
    ide_resolutions: HashMap<String, oneshot::Receiver<IdeResolution>>,
    batch_token: CancellationToken,
}

/// Drives one or more batches of [`ToolCallRequest`]s to completion.
///
/// Only one batch is ever active at a time; a second `schedule` call queues
/// behind `run_lock` and is handed the lock in FIFO order by tokio's fair
/// mutex.
pub struct Scheduler {
    registry: Arc<ToolRegistry>,
    observer: Arc<dyn SchedulerObserver>,
    config: SchedulerConfig,
    editor: Option<Arc<dyn EditorModify>>,
    run_lock: Mutex<()>,
    active: Arc<Mutex<Option<ActiveBatch>>>,
    running: AtomicBool,
    queued: AtomicUsize,
}

impl Scheduler {
    pub fn new(registry: Arc<ToolRegistry>, config: SchedulerConfig) -> Self {
        Self {
            registry,
            observer: Arc::new(NoopObserver),
            config,
            editor: None,
            run_lock: Mutex::new(()),
            active: Arc::new(Mutex::new(None)),
            running: AtomicBool::new(false),
            queued: AtomicUsize::new(0),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SchedulerObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_editor(mut self, editor: Arc<dyn EditorModify>) -> Self {
        self.editor = Some(editor);
        self
    }

    /// Whether a batch is currently active, including the window between
    /// the last call reaching a terminal state and `on_all_complete`
    /// returning.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Cancel whatever batch is currently active. A no-op if nothing is
    /// running.
    pub async fn cancel_all(&self, reason: impl Into<String> + Send) {
        let reason = reason.into();
        let guard = self.active.lock().await;
        if let Some(batch) = guard.as_ref() {
            warn!(%reason, "cancelling active batch");
            batch.batch_token.cancel();
        }
    }

    /// Resolve a pending confirmation. First write wins: once a sender has
    /// been consumed (by the user, by the IDE, or by a previous call here),
    /// it is removed from the map and any later caller sees `NotFound`.
    pub async fn handle_confirmation(
        &self,
        call_id: &str,
        outcome: ConfirmationOutcome,
        payload: ConfirmationResponsePayload,
    ) -> Result<(), SchedulerError> {
        let mut guard = self.active.lock().await;
        let batch = guard
            .as_mut()
            .ok_or_else(|| SchedulerError::NotFound(call_id.to_string()))?;
        let sender = batch
            .pending_confirmations
            .remove(call_id)
            .ok_or_else(|| SchedulerError::NotFound(call_id.to_string()))?;
        let _ = sender.send((outcome, payload));
        Ok(())
    }

    /// Attach an IDE-originated resolution listener for `call_id`'s next
    /// confirmation round. Races against the user's own resolution;
    /// whichever arrives first wins and the other is dropped. A no-op if
    /// `call_id` is not part of the active batch.
    pub async fn attach_ide_resolution(&self, call_id: &str, channel: IdeResolutionChannel) {
        let mut guard = self.active.lock().await;
        if let Some(batch) = guard.as_mut() {
            if batch.calls.contains_key(call_id) {
                batch.ide_resolutions.insert(call_id.to_string(), channel.receiver);
            }
        }
    }

    /// Submit a batch of requests. Blocks until a previous batch (if any)
    /// finishes, then runs this one through validation, confirmation and
    /// execution, returning a snapshot of every call once the batch
    /// completes.
    #[instrument(
        skip(self, requests, policy, cancel_signal),
        fields(batch_id = tracing::field::Empty, call_count = requests.len())
    )]
    pub async fn schedule(
        &self,
        requests: Vec<ToolCallRequest>,
        policy: &dyn ApprovalPolicy,
        cancel_signal: CancellationToken,
    ) -> Result<Vec<ToolCallSnapshot>, SchedulerError> {
        let batch_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("batch_id", batch_id.as_str());

        if let Some(max_depth) = self.config.max_queue_depth {
            if self.queued.load(Ordering::SeqCst) >= max_depth {
                return Err(SchedulerError::QueueFull(max_depth));
            }
        }

        self.queued.fetch_add(1, Ordering::SeqCst);
        let guard = tokio::select! {
            biased;
            _ = cancel_signal.cancelled() => {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                return Err(SchedulerError::CancelledWhileQueued);
            }
            guard = self.run_lock.lock() => guard,
        };
        self.queued.fetch_sub(1, Ordering::SeqCst);

        let batch_token = cancel_signal.child_token();
        let calls = self.validate(requests);
        {
            let mut active = self.active.lock().await;
            *active = Some(ActiveBatch {
                calls,
                pending_confirmations: HashMap::new(),
                ide_resolutions: HashMap::new(),
                batch_token: batch_token.clone(),
            });
        }
        self.running.store(true, Ordering::SeqCst);
        self.observer.on_update(&self.snapshot().await).await;

        let pending_ids = self.stable_call_ids(false).await;
        let confirm_futures = pending_ids
            .into_iter()
            .map(|call_id| self.drive_confirmation(call_id, policy, batch_token.clone()));
        join_all(confirm_futures).await;
        self.observer.on_update(&self.snapshot().await).await;

        let runnable_ids = self.stable_call_ids(true).await;
        let hub = LiveOutputHub::new();
        let drain_token = CancellationToken::new();
        let drain_handle = self.spawn_drain_loop(Arc::clone(&hub), drain_token.clone());

        let exec_futures = runnable_ids
            .into_iter()
            .map(|call_id| self.drive_execution(call_id, &hub, batch_token.clone()));
        join_all(exec_futures).await;

        drain_token.cancel();
        let _ = drain_handle.await;

        let snapshots = self.snapshot().await;
        let (success, error, cancelled) = count_outcomes(&snapshots);
        info!(success, error, cancelled, "batch complete");
        self.observer.on_all_complete(&snapshots).await;

        {
            let mut active = self.active.lock().await;
            *active = None;
        }
        self.running.store(false, Ordering::SeqCst);
        drop(guard);

        Ok(snapshots)
    }

    /// Validate every request against the registry, producing `ToolCall`s
    /// already terminal for `ToolNotRegistered`/`InvalidToolParams`.
    fn validate(&self, requests: Vec<ToolCallRequest>) -> IndexMap<String, ToolCall> {
        let mut calls = IndexMap::new();
        for request in requests {
            let mut call = ToolCall::new(request);
            match self.registry.get(&call.request.name) {
                None => {
                    let response = error_response(
                        &call.call_id,
                        &call.request.name,
                        format!("Tool {:?} is not registered.", call.request.name),
                    );
                    call.transition(ToolCallState::Error {
                        response,
                        error_kind: ToolErrorKind::ToolNotRegistered,
                    });
                }
                Some(tool) => match tool.build(call.request.args.clone()) {
                    Ok(invocation) => {
                        call.tool = Some(tool);
                        call.invocation = Some(invocation);
                    }
                    Err(schema_err) => {
                        call.tool = Some(tool);
                        let response =
                            error_response(&call.call_id, &call.request.name, schema_err.to_string());
                        call.transition(ToolCallState::Error {
                            response,
                            error_kind: ToolErrorKind::InvalidToolParams,
                        });
                    }
                },
            }
            calls.insert(call.call_id.clone(), call);
        }
        calls
    }

    async fn snapshot(&self) -> Vec<ToolCallSnapshot> {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(batch) => batch.calls.values().map(ToolCallSnapshot::from).collect(),
            None => Vec::new(),
        }
    }

    /// `call_id`s still needing work: non-terminal calls. When `scheduled`
    /// is true, restrict to calls that reached `Scheduled` (ready to run);
    /// otherwise every non-terminal call (ready to be confirmed).
    async fn stable_call_ids(&self, scheduled_only: bool) -> Vec<String> {
        let active = self.active.lock().await;
        let Some(batch) = active.as_ref() else {
            return Vec::new();
        };
        batch
            .calls
            .values()
            .filter(|call| {
                if scheduled_only {
                    matches!(call.state, ToolCallState::Scheduled)
                } else {
                    !call.state.is_terminal()
                }
            })
            .map(|call| call.call_id.clone())
            .collect()
    }

    fn spawn_drain_loop(
        &self,
        hub: Arc<LiveOutputHub>,
        stop: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let active = Arc::clone(&self.active);
        let observer = Arc::clone(&self.observer);
        let coalesce = self.config.live_output_coalesce;
        tokio::spawn(async move {
            loop {
                let chunks = tokio::select! {
                    _ = stop.cancelled() => break,
                    chunks = hub.drain() => chunks,
                };
                if chunks.is_empty() {
                    continue;
                }
                if coalesce {
                    let mut guard = active.lock().await;
                    if let Some(batch) = guard.as_mut() {
                        for (call_id, chunk) in &chunks {
                            if let Some(call) = batch.calls.get_mut(call_id) {
                                if let ToolCallState::Executing { live_output } = &mut call.state {
                                    *live_output = Some(chunk.clone());
                                }
                            }
                        }
                    }
                }
                let snapshot = {
                    let guard = active.lock().await;
                    match guard.as_ref() {
                        Some(batch) => batch.calls.values().map(ToolCallSnapshot::from).collect(),
                        None => Vec::new(),
                    }
                };
                observer.on_update(&snapshot).await;
            }
        })
    }

    async fn set_state(&self, call_id: &str, state: ToolCallState) {
        let mut guard = self.active.lock().await;
        if let Some(batch) = guard.as_mut() {
            if let Some(call) = batch.calls.get_mut(call_id) {
                let from = call.state.label();
                let to = state.label();
                if call.transition(state) {
                    debug!(call_id = %call_id, from, to, "state transition");
                }
            }
        }
    }

    async fn mark_started(&self, call_id: &str) {
        let mut guard = self.active.lock().await;
        if let Some(batch) = guard.as_mut() {
            if let Some(call) = batch.calls.get_mut(call_id) {
                call.mark_started();
            }
        }
    }

    async fn record_outcome(&self, call_id: &str, outcome: ConfirmationOutcome) {
        let mut guard = self.active.lock().await;
        if let Some(batch) = guard.as_mut() {
            if let Some(call) = batch.calls.get_mut(call_id) {
                call.record_outcome(outcome);
            }
        }
    }

    async fn invocation_and_name(&self, call_id: &str) -> Option<(Arc<dyn Invocation>, String)> {
        let guard = self.active.lock().await;
        let batch = guard.as_ref()?;
        let call = batch.calls.get(call_id)?;
        Some((call.invocation.clone()?, call.request.name.clone()))
    }

    /// Drive one call from `Validating`/`Scheduled`-pending through
    /// confirmation until it is `Scheduled` or terminal.
    async fn drive_confirmation(
        &self,
        call_id: String,
        policy: &dyn ApprovalPolicy,
        batch_token: CancellationToken,
    ) {
        let Some((mut invocation, tool_name)) = self.invocation_and_name(&call_id).await else {
            return;
        };
        self.mark_started(&call_id).await;

        let decision = policy.decide(&tool_name, invocation.args());
        if decision == PolicyDecision::Bypass {
            self.record_outcome(&call_id, ConfirmationOutcome::ProceedAlways).await;
            policy.on_outcome(&tool_name, ConfirmationOutcome::ProceedAlways);
            self.set_state(&call_id, ToolCallState::Scheduled).await;
            return;
        }

        loop {
            let details = invocation.should_confirm_execute(&batch_token).await;
            let Some(details) = details else {
                self.record_outcome(&call_id, ConfirmationOutcome::ProceedAlways).await;
                policy.on_outcome(&tool_name, ConfirmationOutcome::ProceedAlways);
                self.set_state(&call_id, ToolCallState::Scheduled).await;
                return;
            };

            self.set_state(
                &call_id,
                ToolCallState::AwaitingApproval {
                    confirmation_details: details.clone(),
                    is_modifying: false,
                },
            )
            .await;

            let (tx, rx) = oneshot::channel();
            let ide_rx = {
                let mut guard = self.active.lock().await;
                if let Some(batch) = guard.as_mut() {
                    batch.pending_confirmations.insert(call_id.clone(), tx);
                    batch.ide_resolutions.remove(&call_id)
                } else {
                    None
                }
            };
            self.observer.on_update(&self.snapshot().await).await;

            let resolved = match ide_rx {
                Some(ide_rx) => tokio::select! {
                    biased;
                    _ = batch_token.cancelled() => None,
                    ide = ide_rx => ide
                        .ok()
                        .map(|resolution| (ConfirmationOutcome::from(resolution), ConfirmationResponsePayload::default())),
                    received = rx => received.ok(),
                },
                None => tokio::select! {
                    biased;
                    _ = batch_token.cancelled() => None,
                    received = rx => received.ok(),
                },
            };

            // First write wins: whichever of {user, IDE} resolved, drop the
            // other pending sender so a later caller sees `NotFound` rather
            // than silently racing a second time.
            {
                let mut guard = self.active.lock().await;
                if let Some(batch) = guard.as_mut() {
                    batch.pending_confirmations.remove(&call_id);
                }
            }

            let Some((outcome, payload)) = resolved else {
                warn!(call_id = %call_id, "confirmation cancelled before it resolved");
                self.record_outcome(&call_id, ConfirmationOutcome::Cancel).await;
                let preserved = match &details {
                    ConfirmationDetails::Edit(edit) => Some(PreservedEditDisplay::from(edit)),
                    _ => None,
                };
                let response = error_response(
                    &call_id,
                    &tool_name,
                    "[Operation Cancelled] Reason: User cancelled tool execution.",
                );
                self.set_state(
                    &call_id,
                    ToolCallState::Cancelled {
                        response,
                        preserved_display: preserved,
                    },
                )
                .await;
                return;
            };

            self.record_outcome(&call_id, outcome).await;
            policy.on_outcome(&tool_name, outcome);
            debug!(call_id = %call_id, ?outcome, "confirmation resolved");

            match outcome {
                ConfirmationOutcome::Cancel => {
                    let preserved = match &details {
                        ConfirmationDetails::Edit(edit) => Some(PreservedEditDisplay::from(edit)),
                        _ => None,
                    };
                    let response = error_response(
                        &call_id,
                        &tool_name,
                        "[Operation Cancelled] Reason: User did not allow tool call",
                    );
                    self.set_state(
                        &call_id,
                        ToolCallState::Cancelled {
                            response,
                            preserved_display: preserved,
                        },
                    )
                    .await;
                    return;
                }
                ConfirmationOutcome::ModifyWithEditor => {
                    let ConfirmationDetails::Edit(edit) = &details else {
                        warn!(call_id = %call_id, "ModifyWithEditor outcome on a non-edit confirmation");
                        continue;
                    };
                    match self.run_editor_modify(&call_id, &tool_name, edit).await {
                        Some(new_invocation) => {
                            invocation = new_invocation;
                            continue;
                        }
                        None => return,
                    }
                }
                _ if payload.new_content.is_some() => {
                    if !matches!(&details, ConfirmationDetails::Edit(_)) {
                        warn!(call_id = %call_id, "inline modify payload on a non-edit confirmation");
                        continue;
                    }
                    match self
                        .run_inline_modify(&call_id, &tool_name, &invocation, payload.new_content.unwrap())
                        .await
                    {
                        Some(new_invocation) => {
                            invocation = new_invocation;
                            if outcome.is_proceed() {
                                self.set_state(&call_id, ToolCallState::Scheduled).await;
                                return;
                            }
                            continue;
                        }
                        None => return,
                    }
                }
                _ => {
                    self.set_state(&call_id, ToolCallState::Scheduled).await;
                    return;
                }
            }
        }
    }

    /// Inline modify: the user edited the proposed content directly
    /// in the confirmation dialog. Rebuilds the invocation against the new
    /// content; the caller advances straight to `Scheduled` when the
    /// accompanying outcome is a proceed variant, or re-opens
    /// `AwaitingApproval` with the refreshed diff otherwise.
    async fn run_inline_modify(
        &self,
        call_id: &str,
        tool_name: &str,
        invocation: &Arc<dyn Invocation>,
        new_content: String,
    ) -> Option<Arc<dyn Invocation>> {
        let Some(modify_context) = invocation.modify_context() else {
            warn!(call_id = %call_id, "inline modify requested on a non-modifiable invocation");
            return None;
        };
        let current_content = match modify_context.current_content().await {
            Ok(content) => content,
            Err(err) => {
                self.fail_modify(call_id, tool_name, err).await;
                return None;
            }
        };
        let updated_params =
            match modify_context.updated_params(&current_content, &new_content, invocation.args()) {
                Ok(params) => params,
                Err(err) => {
                    self.fail_modify(call_id, tool_name, err).await;
                    return None;
                }
            };
        let tool = {
            let guard = self.active.lock().await;
            guard
                .as_ref()
                .and_then(|batch| batch.calls.get(call_id))
                .and_then(|call| call.tool.clone())
        };
        let Some(tool) = tool else {
            return None;
        };
        let new_invocation = match tool.build(updated_params.clone()) {
            Ok(invocation) => invocation,
            Err(schema_err) => {
                let response = error_response(call_id, tool_name, schema_err.to_string());
                self.set_state(
                    call_id,
                    ToolCallState::Error {
                        response,
                        error_kind: ToolErrorKind::InvalidToolParams,
                    },
                )
                .await;
                return None;
            }
        };
        self.store_invocation_and_args(call_id, new_invocation.clone(), updated_params).await;
        Some(new_invocation)
    }

    /// Editor modify: shell out to an external editor via the
    /// injected [`EditorModify`] capability, then loop back for approval.
    async fn run_editor_modify(
        &self,
        call_id: &str,
        tool_name: &str,
        edit: &EditConfirmation,
    ) -> Option<Arc<dyn Invocation>> {
        let Some(editor) = self.editor.as_ref() else {
            warn!(call_id = %call_id, "ModifyWithEditor requested but no editor is configured");
            let response = error_response(
                call_id,
                tool_name,
                "Editor-based modification is not supported by this host.",
            );
            self.set_state(
                call_id,
                ToolCallState::Error {
                    response,
                    error_kind: ToolErrorKind::ExecutionFailed,
                },
            )
            .await;
            return None;
        };

        self.set_state(
            call_id,
            ToolCallState::AwaitingApproval {
                confirmation_details: ConfirmationDetails::Edit(edit.clone()),
                is_modifying: true,
            },
        )
        .await;

        let result = match editor.modify(edit).await {
            Ok(result) => result,
            Err(err) => {
                self.fail_modify(call_id, tool_name, err).await;
                return None;
            }
        };

        let tool = {
            let guard = self.active.lock().await;
            guard
                .as_ref()
                .and_then(|batch| batch.calls.get(call_id))
                .and_then(|call| call.tool.clone())
        };
        let Some(tool) = tool else {
            return None;
        };
        let new_invocation = match tool.build(result.updated_params.clone()) {
            Ok(invocation) => invocation,
            Err(schema_err) => {
                let response = error_response(call_id, tool_name, schema_err.to_string());
                self.set_state(
                    call_id,
                    ToolCallState::Error {
                        response,
                        error_kind: ToolErrorKind::InvalidToolParams,
                    },
                )
                .await;
                return None;
            }
        };
        debug!(call_id = %call_id, diff = %result.updated_diff, "editor produced an updated diff");
        self.store_invocation_and_args(call_id, new_invocation.clone(), result.updated_params)
            .await;
        Some(new_invocation)
    }

    async fn store_invocation_and_args(&self, call_id: &str, invocation: Arc<dyn Invocation>, args: Value) {
        let mut guard = self.active.lock().await;
        if let Some(batch) = guard.as_mut() {
            if let Some(call) = batch.calls.get_mut(call_id) {
                call.invocation = Some(invocation);
                call.request.args = args;
            }
        }
    }

    async fn fail_modify(&self, call_id: &str, tool_name: &str, err: anyhow::Error) {
        let response = error_response(call_id, tool_name, format!("modify failed: {err}"));
        self.set_state(
            call_id,
            ToolCallState::Error {
                response,
                error_kind: ToolErrorKind::ExecutionFailed,
            },
        )
        .await;
    }

    /// Drive one `Scheduled` call through `Executing` to a terminal state.
    async fn drive_execution(&self, call_id: String, hub: &Arc<LiveOutputHub>, batch_token: CancellationToken) {
        let Some((invocation, tool_name)) = self.invocation_and_name(&call_id).await else {
            return;
        };
        let can_stream = {
            let guard = self.active.lock().await;
            guard
                .as_ref()
                .and_then(|batch| batch.calls.get(&call_id))
                .and_then(|call| call.tool.as_ref())
                .map(|tool| tool.can_update_output())
                .unwrap_or(false)
        };

        self.set_state(&call_id, ToolCallState::Executing { live_output: None }).await;
        self.observer.on_update(&self.snapshot().await).await;

        let callback = if can_stream {
            let observer = Arc::clone(&self.observer);
            let subscriber_call_id = call_id.clone();
            let external: LiveOutputCallback = Arc::new(move |chunk: String| {
                let observer = Arc::clone(&observer);
                let call_id = subscriber_call_id.clone();
                tokio::spawn(async move {
                    observer.on_output(&call_id, &chunk).await;
                });
            });
            Some(hub.callback_for(call_id.clone(), Some(external)))
        } else {
            None
        };

        let result = run_invocation(call_id.clone(), tool_name, invocation, batch_token, callback).await;
        self.set_state(&result.call_id, result.state).await;
        self.observer.on_update(&self.snapshot().await).await;
    }
}

fn count_outcomes(snapshots: &[ToolCallSnapshot]) -> (usize, usize, usize) {
    let mut success = 0;
    let mut error = 0;
    let mut cancelled = 0;
    for snapshot in snapshots {
        match snapshot.state {
            ToolCallState::Success { .. } => success += 1,
            ToolCallState::Error { .. } => error += 1,
            ToolCallState::Cancelled { .. } => cancelled += 1,
            _ => {}
        }
    }
    (success, error, cancelled)
}
