//! End-to-end scenarios run against the public `Scheduler` API, covering the
//! six behaviors the state machine and response converter are designed
//! around: single-tool success, approval-then-cancel, mixed-outcome batches,
//! FIFO queueing, inline modify, and live-output coalescing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use tool_call_scheduler::confirmation::{
    unified_diff, ConfirmationDetails, ConfirmationOutcome, ConfirmationResponsePayload,
};
use tool_call_scheduler::invocation::{
    EchoInvocation, Invocation, LiveOutputCallback, ModifyContext, ToolExecError, ToolOutcome,
};
use tool_call_scheduler::policy::{AlwaysConfirm, BypassAll};
use tool_call_scheduler::response::ResponsePayload;
use tool_call_scheduler::{
    Scheduler, SchedulerConfig, SchedulerObserver, Tool, ToolCallRequest, ToolCallSnapshot,
    ToolCallState, ToolErrorKind, ToolRegistry,
};

/// Records every `on_update`/`on_all_complete` call so tests can inspect
/// intermediate states, not just the final snapshot `schedule` returns.
#[derive(Default)]
struct TestObserver {
    updates: Mutex<Vec<Vec<ToolCallSnapshot>>>,
    complete: Mutex<Vec<Vec<ToolCallSnapshot>>>,
    outputs: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl SchedulerObserver for TestObserver {
    async fn on_update(&self, all_tool_calls: &[ToolCallSnapshot]) {
        self.updates.lock().await.push(all_tool_calls.to_vec());
    }

    async fn on_all_complete(&self, completed_batch: &[ToolCallSnapshot]) {
        self.complete.lock().await.push(completed_batch.to_vec());
    }

    async fn on_output(&self, call_id: &str, chunk: &str) {
        self.outputs.lock().await.push((call_id.to_string(), chunk.to_string()));
    }
}

/// Poll the observer's update history until `call_id` reaches `label`
/// (`ToolCallState::label`), or panic after two seconds.
async fn wait_for_label(observer: &TestObserver, call_id: &str, label: &str) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            {
                let updates = observer.updates.lock().await;
                if let Some(last) = updates.last() {
                    if let Some(snap) = last.iter().find(|s| s.call_id == call_id) {
                        if snap.state.label() == label {
                            return;
                        }
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {call_id} to reach {label}"));
}

async fn latest_snapshot(observer: &TestObserver) -> Vec<ToolCallSnapshot> {
    observer.updates.lock().await.last().cloned().unwrap_or_default()
}

// ---- fixtures -------------------------------------------------------------

struct EchoTool {
    schema: Value,
}

impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn display_name(&self) -> &str {
        "Echo"
    }
    fn description(&self) -> &str {
        "Echoes its input"
    }
    fn parameter_schema(&self) -> &Value {
        &self.schema
    }
    fn build(&self, args: Value) -> Result<Arc<dyn Invocation>, tool_call_scheduler::SchemaError> {
        let msg = args.get("msg").and_then(|v| v.as_str()).unwrap_or_default();
        Ok(Arc::new(EchoInvocation::new(msg.to_string())))
    }
}

struct OkInvocation {
    args: Value,
}

#[async_trait]
impl Invocation for OkInvocation {
    fn description(&self) -> String {
        "always succeeds".into()
    }
    fn args(&self) -> &Value {
        &self.args
    }
    async fn should_confirm_execute(&self, _cancel: &CancellationToken) -> Option<ConfirmationDetails> {
        None
    }
    async fn execute(
        &self,
        _cancel: CancellationToken,
        _on_output: Option<LiveOutputCallback>,
    ) -> Result<ToolOutcome, ToolExecError> {
        Ok(ToolOutcome::text("ok"))
    }
}

struct OkTool {
    schema: Value,
}

impl Tool for OkTool {
    fn name(&self) -> &str {
        "ok"
    }
    fn display_name(&self) -> &str {
        "Ok"
    }
    fn description(&self) -> &str {
        "Always succeeds"
    }
    fn parameter_schema(&self) -> &Value {
        &self.schema
    }
    fn build(&self, args: Value) -> Result<Arc<dyn Invocation>, tool_call_scheduler::SchemaError> {
        Ok(Arc::new(OkInvocation { args }))
    }
}

struct FailingInvocation {
    args: Value,
}

#[async_trait]
impl Invocation for FailingInvocation {
    fn description(&self) -> String {
        "always fails".into()
    }
    fn args(&self) -> &Value {
        &self.args
    }
    async fn should_confirm_execute(&self, _cancel: &CancellationToken) -> Option<ConfirmationDetails> {
        None
    }
    async fn execute(
        &self,
        _cancel: CancellationToken,
        _on_output: Option<LiveOutputCallback>,
    ) -> Result<ToolOutcome, ToolExecError> {
        Err(ToolExecError::failed("boom"))
    }
}

struct FailTool {
    schema: Value,
}

impl Tool for FailTool {
    fn name(&self) -> &str {
        "fail"
    }
    fn display_name(&self) -> &str {
        "Fail"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn parameter_schema(&self) -> &Value {
        &self.schema
    }
    fn build(&self, args: Value) -> Result<Arc<dyn Invocation>, tool_call_scheduler::SchemaError> {
        Ok(Arc::new(FailingInvocation { args }))
    }
}

/// A tool that always asks for a shell-command confirmation and never
/// resolves it itself; used to hold a batch in `AwaitingApproval` long
/// enough for a second batch to queue behind it.
struct ConfirmInvocation {
    args: Value,
}

#[async_trait]
impl Invocation for ConfirmInvocation {
    fn description(&self) -> String {
        "run a shell command".into()
    }
    fn args(&self) -> &Value {
        &self.args
    }
    async fn should_confirm_execute(&self, _cancel: &CancellationToken) -> Option<ConfirmationDetails> {
        Some(ConfirmationDetails::Shell {
            command: "echo hi".into(),
            root_command: "echo".into(),
        })
    }
    async fn execute(
        &self,
        _cancel: CancellationToken,
        _on_output: Option<LiveOutputCallback>,
    ) -> Result<ToolOutcome, ToolExecError> {
        Ok(ToolOutcome::text("ran"))
    }
}

struct ConfirmTool {
    schema: Value,
}

impl Tool for ConfirmTool {
    fn name(&self) -> &str {
        "confirm_me"
    }
    fn display_name(&self) -> &str {
        "Confirm Me"
    }
    fn description(&self) -> &str {
        "Always requires confirmation"
    }
    fn parameter_schema(&self) -> &Value {
        &self.schema
    }
    fn build(&self, args: Value) -> Result<Arc<dyn Invocation>, tool_call_scheduler::SchemaError> {
        Ok(Arc::new(ConfirmInvocation { args }))
    }
}

/// A modifiable edit tool: proposes a diff against a fixed original, and
/// rebuilds itself from `args.content` on every `build` call, mirroring how
/// a real file-edit tool round-trips through inline modify.
struct EditInvocation {
    args: Value,
    original_content: String,
}

impl EditInvocation {
    fn new_content(&self) -> String {
        self.args
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }
}

#[async_trait]
impl Invocation for EditInvocation {
    fn description(&self) -> String {
        "edit f.txt".into()
    }
    fn args(&self) -> &Value {
        &self.args
    }
    async fn should_confirm_execute(&self, _cancel: &CancellationToken) -> Option<ConfirmationDetails> {
        Some(ConfirmationDetails::Edit(
            tool_call_scheduler::confirmation::EditConfirmation::new(
                "/tmp/f.txt",
                "f.txt",
                self.original_content.clone(),
                self.new_content(),
            ),
        ))
    }
    async fn execute(
        &self,
        _cancel: CancellationToken,
        _on_output: Option<LiveOutputCallback>,
    ) -> Result<ToolOutcome, ToolExecError> {
        Ok(ToolOutcome::text(format!("wrote {}", self.new_content())))
    }
    fn modify_context(&self) -> Option<Arc<dyn ModifyContext>> {
        Some(Arc::new(EditModifyContext {
            original_content: self.original_content.clone(),
        }))
    }
}

struct EditModifyContext {
    original_content: String,
}

#[async_trait]
impl ModifyContext for EditModifyContext {
    async fn current_content(&self) -> anyhow::Result<String> {
        Ok(self.original_content.clone())
    }
    fn updated_params(
        &self,
        _current_content: &str,
        new_content: &str,
        _original_args: &Value,
    ) -> anyhow::Result<Value> {
        Ok(json!({ "content": new_content }))
    }
}

struct EditTool {
    schema: Value,
    original_content: String,
}

impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }
    fn display_name(&self) -> &str {
        "Edit"
    }
    fn description(&self) -> &str {
        "Edits a file"
    }
    fn parameter_schema(&self) -> &Value {
        &self.schema
    }
    fn is_modifiable(&self) -> bool {
        true
    }
    fn build(&self, args: Value) -> Result<Arc<dyn Invocation>, tool_call_scheduler::SchemaError> {
        Ok(Arc::new(EditInvocation {
            args,
            original_content: self.original_content.clone(),
        }))
    }
}

/// Streams three chunks, then succeeds with the last one.
struct StreamingInvocation {
    args: Value,
}

#[async_trait]
impl Invocation for StreamingInvocation {
    fn description(&self) -> String {
        "streams output".into()
    }
    fn args(&self) -> &Value {
        &self.args
    }
    async fn should_confirm_execute(&self, _cancel: &CancellationToken) -> Option<ConfirmationDetails> {
        None
    }
    async fn execute(
        &self,
        _cancel: CancellationToken,
        on_output: Option<LiveOutputCallback>,
    ) -> Result<ToolOutcome, ToolExecError> {
        // Yield between chunks so the scheduler's drain loop gets a chance
        // to observe each one instead of racing straight to completion.
        if let Some(emit) = &on_output {
            emit("x".into());
            tokio::time::sleep(Duration::from_millis(10)).await;
            emit("xy".into());
            tokio::time::sleep(Duration::from_millis(10)).await;
            emit("xyz".into());
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(ToolOutcome::text("xyz"))
    }
}

struct StreamingTool {
    schema: Value,
}

impl Tool for StreamingTool {
    fn name(&self) -> &str {
        "stream"
    }
    fn display_name(&self) -> &str {
        "Stream"
    }
    fn description(&self) -> &str {
        "Streams output in chunks"
    }
    fn parameter_schema(&self) -> &Value {
        &self.schema
    }
    fn can_update_output(&self) -> bool {
        true
    }
    fn build(&self, args: Value) -> Result<Arc<dyn Invocation>, tool_call_scheduler::SchemaError> {
        Ok(Arc::new(StreamingInvocation { args }))
    }
}

// ---- scenarios --------------------------------------------------------

#[tokio::test]
async fn single_tool_happy_path() {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(EchoTool { schema: json!({}) })).unwrap();
    let observer = Arc::new(TestObserver::default());
    let scheduler =
        Scheduler::new(Arc::new(registry), SchedulerConfig::default()).with_observer(observer.clone());

    let requests = vec![ToolCallRequest::new("a", "echo", json!({"msg": "hi"}))];
    let snapshots = scheduler
        .schedule(requests, &BypassAll, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(snapshots.len(), 1);
    match &snapshots[0].state {
        ToolCallState::Success { response } => {
            assert_eq!(response.function_response.id, "a");
            assert_eq!(response.function_response.name, "echo");
            assert_eq!(response.function_response.response, ResponsePayload::output_text("hi"));
        }
        _ => panic!("expected a successful call"),
    }
    assert_eq!(observer.complete.lock().await.len(), 1);
}

#[tokio::test]
async fn approval_then_cancel_preserves_the_diff() {
    let mut registry = ToolRegistry::new();
    registry
        .register(Arc::new(EditTool {
            schema: json!({}),
            original_content: "A\n".into(),
        }))
        .unwrap();
    let observer = Arc::new(TestObserver::default());
    let scheduler = Arc::new(
        Scheduler::new(Arc::new(registry), SchedulerConfig::default()).with_observer(observer.clone()),
    );

    let requests = vec![ToolCallRequest::new("b", "edit", json!({"content": "B"}))];
    let sched = scheduler.clone();
    let handle =
        tokio::spawn(async move { sched.schedule(requests, &AlwaysConfirm, CancellationToken::new()).await });

    wait_for_label(&observer, "b", "awaiting_approval").await;

    scheduler
        .handle_confirmation("b", ConfirmationOutcome::Cancel, ConfirmationResponsePayload::default())
        .await
        .unwrap();

    let snapshots = handle.await.unwrap().unwrap();
    match &snapshots[0].state {
        ToolCallState::Cancelled {
            response,
            preserved_display,
        } => {
            assert_eq!(
                response.function_response.response,
                ResponsePayload::Error(
                    "[Operation Cancelled] Reason: User did not allow tool call".into()
                )
            );
            let preserved = preserved_display.as_ref().expect("edit display preserved on cancel");
            assert!(preserved.file_diff.contains("-A"));
            assert!(preserved.file_diff.contains("+B"));
        }
        _ => panic!("expected a cancelled call"),
    }
}

#[tokio::test]
async fn parallel_batch_with_mixed_outcome() {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(OkTool { schema: json!({}) })).unwrap();
    registry.register(Arc::new(FailTool { schema: json!({}) })).unwrap();
    let observer = Arc::new(TestObserver::default());
    let scheduler =
        Scheduler::new(Arc::new(registry), SchedulerConfig::default()).with_observer(observer.clone());

    let requests = vec![
        ToolCallRequest::new("c", "ok", json!({})),
        ToolCallRequest::new("d", "fail", json!({})),
        ToolCallRequest::new("e", "unknown", json!({})),
    ];
    let snapshots = scheduler
        .schedule(requests, &BypassAll, CancellationToken::new())
        .await
        .unwrap();

    let by_id: HashMap<_, _> = snapshots.iter().map(|s| (s.call_id.as_str(), s)).collect();
    assert!(matches!(by_id["c"].state, ToolCallState::Success { .. }));
    match &by_id["d"].state {
        ToolCallState::Error { error_kind, .. } => assert_eq!(*error_kind, ToolErrorKind::ExecutionFailed),
        _ => panic!("expected d to fail"),
    }
    match &by_id["e"].state {
        ToolCallState::Error { error_kind, .. } => assert_eq!(*error_kind, ToolErrorKind::ToolNotRegistered),
        _ => panic!("expected e to be unregistered"),
    }
    assert_eq!(observer.complete.lock().await.len(), 1);
}

#[tokio::test]
async fn a_second_batch_queues_behind_the_first() {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ConfirmTool { schema: json!({}) })).unwrap();
    registry.register(Arc::new(EchoTool { schema: json!({}) })).unwrap();
    let observer = Arc::new(TestObserver::default());
    let scheduler = Arc::new(
        Scheduler::new(Arc::new(registry), SchedulerConfig::default()).with_observer(observer.clone()),
    );

    let sched1 = scheduler.clone();
    let requests1 = vec![ToolCallRequest::new("f", "confirm_me", json!({}))];
    let handle1 = tokio::spawn(async move {
        sched1.schedule(requests1, &AlwaysConfirm, CancellationToken::new()).await
    });
    wait_for_label(&observer, "f", "awaiting_approval").await;

    let sched2 = scheduler.clone();
    let requests2 = vec![ToolCallRequest::new("g", "echo", json!({"msg": "later"}))];
    let handle2 = tokio::spawn(async move {
        sched2.schedule(requests2, &BypassAll, CancellationToken::new()).await
    });

    // While batch 1 is still awaiting approval, batch 2 has not become
    // active: it has no entry in any observed snapshot yet.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let still_queued = latest_snapshot(&observer).await;
    assert!(still_queued.iter().all(|s| s.call_id != "g"));

    scheduler
        .handle_confirmation("f", ConfirmationOutcome::ProceedOnce, ConfirmationResponsePayload::default())
        .await
        .unwrap();

    let snapshots1 = handle1.await.unwrap().unwrap();
    assert!(matches!(snapshots1[0].state, ToolCallState::Success { .. }));

    let snapshots2 = handle2.await.unwrap().unwrap();
    assert_eq!(snapshots2.len(), 1);
    assert_eq!(snapshots2[0].call_id, "g");
    assert!(matches!(snapshots2[0].state, ToolCallState::Success { .. }));
}

#[tokio::test]
async fn inline_modify_rebinds_args_before_execution() {
    let mut registry = ToolRegistry::new();
    registry
        .register(Arc::new(EditTool {
            schema: json!({}),
            original_content: "A\n".into(),
        }))
        .unwrap();
    let observer = Arc::new(TestObserver::default());
    let scheduler = Arc::new(
        Scheduler::new(Arc::new(registry), SchedulerConfig::default()).with_observer(observer.clone()),
    );

    let requests = vec![ToolCallRequest::new("h", "edit", json!({"content": "B"}))];
    let sched = scheduler.clone();
    let handle =
        tokio::spawn(async move { sched.schedule(requests, &AlwaysConfirm, CancellationToken::new()).await });

    wait_for_label(&observer, "h", "awaiting_approval").await;
    {
        let first = latest_snapshot(&observer).await;
        let snap = first.iter().find(|s| s.call_id == "h").unwrap();
        match &snap.state {
            ToolCallState::AwaitingApproval {
                confirmation_details: ConfirmationDetails::Edit(edit),
                ..
            } => assert_eq!(edit.file_diff, unified_diff("f.txt", "A\n", "B")),
            _ => panic!("expected the initial edit confirmation"),
        }
    }

    // A single confirmation carrying both the proceed outcome and the
    // inline-modified content is enough: the call advances straight to
    // `Scheduled` and runs with the rebuilt invocation, without a second
    // approval round.
    scheduler
        .handle_confirmation(
            "h",
            ConfirmationOutcome::ProceedOnce,
            ConfirmationResponsePayload {
                new_content: Some("C".into()),
            },
        )
        .await
        .unwrap();

    let snapshots = handle.await.unwrap().unwrap();
    match &snapshots[0].state {
        ToolCallState::Success { response } => {
            assert_eq!(response.function_response.response, ResponsePayload::output_text("wrote C"));
        }
        _ => panic!("expected the edit to succeed with the modified content"),
    }
}

#[tokio::test]
async fn live_output_coalesces_to_the_last_chunk() {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(StreamingTool { schema: json!({}) })).unwrap();
    let observer = Arc::new(TestObserver::default());
    let scheduler =
        Scheduler::new(Arc::new(registry), SchedulerConfig::default()).with_observer(observer.clone());

    let requests = vec![ToolCallRequest::new("i", "stream", json!({}))];
    let snapshots = scheduler
        .schedule(requests, &BypassAll, CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(snapshots[0].state, ToolCallState::Success { .. }));

    let updates = observer.updates.lock().await;
    let saw_latest_chunk = updates.iter().any(|batch| {
        batch.iter().any(|snap| {
            snap.call_id == "i"
                && matches!(
                    &snap.state,
                    ToolCallState::Executing { live_output: Some(chunk) } if chunk == "xyz"
                )
        })
    });
    assert!(saw_latest_chunk, "expected an Executing update carrying the final chunk");
    drop(updates);

    // Each chunk reaches `on_output` via its own spawned task, so give those
    // a moment to land before inspecting them.
    let chunks = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let outputs = observer.outputs.lock().await;
            let chunks: Vec<String> = outputs
                .iter()
                .filter(|(id, _)| id == "i")
                .map(|(_, chunk)| chunk.clone())
                .collect();
            if chunks.len() >= 3 {
                return chunks;
            }
            drop(outputs);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for all three chunks to reach on_output");
    assert_eq!(chunks, vec!["x".to_string(), "xy".to_string(), "xyz".to_string()]);
}
