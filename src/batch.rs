//! Batch orchestrator: sequenced operations with best-effort rollback.
//!
//! A batch is an ordered list of named operations. Steps run strictly in
//! declaration order; later steps may reference earlier results with
//! `{{name.path}}` placeholders. Every successful step is appended to a
//! completed-log together with a rollback descriptor (when its tool has a
//! known inverse), and when a step fails under `stop_on_error` the log is
//! unwound in reverse order. One rollback failure never aborts the rest of
//! the unwind, and the outcome always surfaces the original step failure,
//! not a rollback error.
//!
//! Limitation, preserved deliberately: a handler is classified purely by
//! whether it returned a failure. A handler that mutated remote state and
//! then returned `Ok` with a malformed body is a success here and is not
//! rolled back.

use crate::batch::rollback::{capture_snapshot, execute_rollback, plan_rollback};
use crate::registry::{HandlerContext, OperationRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod rollback;
pub mod substitute;

pub use rollback::RollbackAction;
pub use substitute::substitute;

/// One named operation within a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// Unique within the batch; later steps reference this name.
    pub name: String,
    /// Tool identifier resolved through the registry.
    pub tool: String,
    /// Arguments; string values may contain `{{name.path}}` placeholders.
    #[serde(default)]
    pub arguments: Value,
}

/// Per-operation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Never reached (an earlier step stopped the batch).
    Pending,
    Success,
    Failed,
}

/// Outcome of one operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub name: String,
    pub tool: String,
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Compensating action recorded for a successful step, if its tool has
    /// a known inverse.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackAction>,
}

/// Outcome of one compensating action during unwind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
    Succeeded,
    Failed,
    /// The step had no rollback descriptor.
    Skipped,
}

/// Ledger entry for one unwound step.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackRecord {
    /// Name of the step being compensated.
    pub step: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<RollbackAction>,
    pub status: RollbackStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Full report of a batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub success: bool,
    pub operations: Vec<OperationResult>,
    pub rollback_performed: bool,
    pub rollbacks: Vec<RollbackRecord>,
}

impl BatchOutcome {
    /// The original triggering failure: name and error of the first failed
    /// step. Rollback failures never replace it.
    pub fn first_error(&self) -> Option<(&str, &str)> {
        self.operations
            .iter()
            .find(|op| op.status == OperationStatus::Failed)
            .and_then(|op| op.error.as_deref().map(|e| (op.name.as_str(), e)))
    }
}

/// Cooperative cancellation handle for a running batch.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Knobs for one batch run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Stop at the first failed step and unwind the completed-log. When
    /// false, failed steps are recorded and the batch continues (and is
    /// still reported unsuccessful), with no unwind.
    pub stop_on_error: bool,
    /// Checked before each step; cancellation is treated like a failure at
    /// the current step, so completed steps stay eligible for rollback.
    pub cancel: Option<CancelFlag>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self { stop_on_error: true, cancel: None }
    }
}

struct CompletedStep {
    name: String,
    action: Option<RollbackAction>,
}

/// Sequences operations against the registry, with reverse-order
/// compensation on failure.
pub struct BatchOrchestrator {
    registry: Arc<dyn OperationRegistry>,
}

impl BatchOrchestrator {
    pub fn new(registry: Arc<dyn OperationRegistry>) -> Self {
        Self { registry }
    }

    /// Run a batch. `ctx` supplies the client identity and batch-level
    /// default arguments (injected into steps that do not set them).
    ///
    /// An empty operation list is a trivially successful empty batch.
    pub async fn run(
        &self,
        ctx: &HandlerContext,
        operations: Vec<Operation>,
        options: BatchOptions,
    ) -> BatchOutcome {
        let mut context: HashMap<String, Value> = HashMap::new();
        let mut results: Vec<OperationResult> = Vec::with_capacity(operations.len());
        let mut completed: Vec<CompletedStep> = Vec::new();
        let mut failed = false;
        let mut unwind = false;
        let mut stopped_at: Option<usize> = None;

        for (index, op) in operations.iter().enumerate() {
            if options.cancel.as_ref().is_some_and(CancelFlag::is_cancelled) {
                tracing::info!(step = %op.name, "batch cancelled");
                results.push(OperationResult {
                    name: op.name.clone(),
                    tool: op.tool.clone(),
                    status: OperationStatus::Failed,
                    result: None,
                    error: Some("batch cancelled".to_string()),
                    rollback: None,
                });
                failed = true;
                unwind = options.stop_on_error;
                stopped_at = Some(index + 1);
                break;
            }

            let args = inject_defaults(substitute(&op.arguments, &context), &ctx.defaults);

            let Some(handler) = self.registry.lookup(&op.tool) else {
                results.push(OperationResult {
                    name: op.name.clone(),
                    tool: op.tool.clone(),
                    status: OperationStatus::Failed,
                    result: None,
                    error: Some(format!("unknown tool: {}", op.tool)),
                    rollback: None,
                });
                failed = true;
                if options.stop_on_error {
                    unwind = true;
                    stopped_at = Some(index + 1);
                    break;
                }
                continue;
            };

            // Captured before the step runs; restore-style rollbacks need
            // the pre-update state.
            let snapshot =
                capture_snapshot(self.registry.as_ref(), ctx, &op.tool, &args).await;

            match handler.invoke(ctx, args.clone()).await {
                Ok(result) => {
                    let action = plan_rollback(&op.tool, &args, &result, snapshot);
                    results.push(OperationResult {
                        name: op.name.clone(),
                        tool: op.tool.clone(),
                        status: OperationStatus::Success,
                        result: Some(result.clone()),
                        error: None,
                        rollback: action.clone(),
                    });
                    context.insert(op.name.clone(), result);
                    completed.push(CompletedStep { name: op.name.clone(), action });
                }
                Err(failure) => {
                    tracing::warn!(step = %op.name, tool = %op.tool, error = %failure, "batch step failed");
                    results.push(OperationResult {
                        name: op.name.clone(),
                        tool: op.tool.clone(),
                        status: OperationStatus::Failed,
                        result: None,
                        error: Some(failure.to_string()),
                        rollback: None,
                    });
                    failed = true;
                    if options.stop_on_error {
                        unwind = true;
                        stopped_at = Some(index + 1);
                        break;
                    }
                }
            }
        }

        // Steps never reached stay pending in the report.
        if let Some(from) = stopped_at {
            for op in &operations[from..] {
                results.push(OperationResult {
                    name: op.name.clone(),
                    tool: op.tool.clone(),
                    status: OperationStatus::Pending,
                    result: None,
                    error: None,
                    rollback: None,
                });
            }
        }

        let mut rollbacks = Vec::new();
        let rollback_performed = unwind && !completed.is_empty();
        if rollback_performed {
            tracing::info!(steps = completed.len(), "unwinding completed batch steps");
            for step in completed.iter().rev() {
                let record = match &step.action {
                    None => RollbackRecord {
                        step: step.name.clone(),
                        action: None,
                        status: RollbackStatus::Skipped,
                        error: None,
                    },
                    Some(action) => {
                        match execute_rollback(self.registry.as_ref(), ctx, action).await {
                            Ok(()) => RollbackRecord {
                                step: step.name.clone(),
                                action: Some(action.clone()),
                                status: RollbackStatus::Succeeded,
                                error: None,
                            },
                            Err(failure) => {
                                tracing::warn!(step = %step.name, error = %failure, "rollback step failed");
                                RollbackRecord {
                                    step: step.name.clone(),
                                    action: Some(action.clone()),
                                    status: RollbackStatus::Failed,
                                    error: Some(failure.to_string()),
                                }
                            }
                        }
                    }
                };
                rollbacks.push(record);
            }
        }

        BatchOutcome { success: !failed, operations: results, rollback_performed, rollbacks }
    }
}

/// Batch-level defaults fill argument keys the step left unset. A null
/// argument value becomes an object of just the defaults.
fn inject_defaults(args: Value, defaults: &Map<String, Value>) -> Value {
    if defaults.is_empty() {
        return args;
    }
    match args {
        Value::Object(mut map) => {
            for (key, value) in defaults {
                if !map.contains_key(key) {
                    map.insert(key.clone(), value.clone());
                }
            }
            Value::Object(map)
        }
        Value::Null => Value::Object(defaults.clone()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiFailure;
    use crate::registry::{handler_fn, InMemoryRegistry};
    use serde_json::json;
    use std::sync::Mutex;

    /// Registry whose handlers record every invocation as (tool, args).
    fn recording_registry(
        fail_tools: &'static [&'static str],
    ) -> (Arc<Mutex<Vec<(String, Value)>>>, Arc<InMemoryRegistry>) {
        let log: Arc<Mutex<Vec<(String, Value)>>> = Arc::default();
        let mut registry = InMemoryRegistry::new();
        for tool in [
            "create_branch",
            "create_commit",
            "create_merge_request",
            "update_merge_request",
            "get_merge_request",
            "delete_branch",
            "revert_commit",
            "list_issues",
        ] {
            let log = log.clone();
            registry = registry.register(
                tool,
                handler_fn(move |_ctx, args| {
                    let log = log.clone();
                    Box::pin(async move {
                        log.lock().unwrap().push((tool.to_string(), args));
                        if fail_tools.contains(&tool) {
                            return Err(ApiFailure::validation(format!("{tool} rejected")));
                        }
                        Ok(match tool {
                            "create_commit" => json!({ "id": "sha-1", "branch": "main" }),
                            "create_merge_request" => json!({ "iid": 31 }),
                            "get_merge_request" => json!({ "title": "before", "description": "old" }),
                            _ => json!({ "ok": true }),
                        })
                    })
                }),
            );
        }
        (log, Arc::new(registry))
    }

    fn op(name: &str, tool: &str, arguments: Value) -> Operation {
        Operation { name: name.into(), tool: tool.into(), arguments }
    }

    #[tokio::test]
    async fn empty_batch_is_trivially_successful() {
        let (_, registry) = recording_registry(&[]);
        let outcome = BatchOrchestrator::new(registry)
            .run(&HandlerContext::new("ci"), vec![], BatchOptions::default())
            .await;

        assert!(outcome.success);
        assert!(outcome.operations.is_empty());
        assert!(!outcome.rollback_performed);
        assert!(outcome.rollbacks.is_empty());
    }

    #[tokio::test]
    async fn steps_run_in_order_and_see_prior_results() {
        let (log, registry) = recording_registry(&[]);
        let ops = vec![
            op("commit", "create_commit", json!({ "branch": "main", "commit_message": "m" })),
            op(
                "mr",
                "create_merge_request",
                json!({ "title": "ship {{commit.id}}", "source_branch": "main" }),
            ),
        ];
        let outcome = BatchOrchestrator::new(registry)
            .run(&HandlerContext::new("ci"), ops, BatchOptions::default())
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.operations.len(), 2);
        assert!(outcome.operations.iter().all(|o| o.status == OperationStatus::Success));

        let log = log.lock().unwrap();
        let mr_call = log.iter().find(|(tool, _)| tool == "create_merge_request").unwrap();
        assert_eq!(mr_call.1["title"], json!("ship sha-1"));
    }

    #[tokio::test]
    async fn failure_unwinds_in_reverse_and_surfaces_original_error() {
        let (log, registry) = recording_registry(&["update_merge_request"]);
        let ops = vec![
            op("commit", "create_commit", json!({ "branch": "main", "commit_message": "m" })),
            op(
                "retitle",
                "update_merge_request",
                json!({ "merge_request_iid": 5, "title": "from {{commit.id}}" }),
            ),
        ];
        let outcome = BatchOrchestrator::new(registry)
            .run(&HandlerContext::new("ci"), ops, BatchOptions::default())
            .await;

        assert!(!outcome.success);
        assert!(outcome.rollback_performed);

        // The reported error is step two's failure, not a rollback error.
        let (step, error) = outcome.first_error().unwrap();
        assert_eq!(step, "retitle");
        assert!(error.contains("update_merge_request rejected"));

        // The commit from step one was reverted on its branch.
        let log = log.lock().unwrap();
        let revert = log.iter().find(|(tool, _)| tool == "revert_commit").unwrap();
        assert_eq!(revert.1, json!({ "branch": "main", "sha": "sha-1" }));

        assert_eq!(outcome.rollbacks.len(), 1);
        assert_eq!(outcome.rollbacks[0].step, "commit");
        assert_eq!(outcome.rollbacks[0].status, RollbackStatus::Succeeded);
    }

    #[tokio::test]
    async fn unwind_is_reverse_order_and_survives_rollback_failures() {
        // delete_branch fails during unwind; the commit revert must still run.
        let (log, registry) = recording_registry(&["create_merge_request", "delete_branch"]);
        let ops = vec![
            op("branch", "create_branch", json!({ "branch": "feature-x" })),
            op("commit", "create_commit", json!({ "branch": "feature-x", "commit_message": "m" })),
            op("mr", "create_merge_request", json!({ "source_branch": "feature-x" })),
        ];
        let outcome = BatchOrchestrator::new(registry)
            .run(&HandlerContext::new("ci"), ops, BatchOptions::default())
            .await;

        assert!(!outcome.success);
        assert!(outcome.rollback_performed);
        assert_eq!(outcome.rollbacks.len(), 2);

        // LIFO: the commit unwinds before the branch.
        assert_eq!(outcome.rollbacks[0].step, "commit");
        assert_eq!(outcome.rollbacks[0].status, RollbackStatus::Succeeded);
        assert_eq!(outcome.rollbacks[1].step, "branch");
        assert_eq!(outcome.rollbacks[1].status, RollbackStatus::Failed);

        // Original error still wins.
        assert_eq!(outcome.first_error().unwrap().0, "mr");

        let log = log.lock().unwrap();
        let unwind_tools: Vec<&str> = log
            .iter()
            .filter(|(tool, _)| tool == "revert_commit" || tool == "delete_branch")
            .map(|(tool, _)| tool.as_str())
            .collect();
        assert_eq!(unwind_tools, vec!["revert_commit", "delete_branch"]);
    }

    #[tokio::test]
    async fn unknown_tool_fails_the_step() {
        let (_, registry) = recording_registry(&[]);
        let ops = vec![op("bogus", "no_such_tool", json!({}))];
        let outcome = BatchOrchestrator::new(registry)
            .run(&HandlerContext::new("ci"), ops, BatchOptions::default())
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.first_error().unwrap().1, "unknown tool: no_such_tool");
        assert!(!outcome.rollback_performed, "nothing completed, nothing to unwind");
    }

    #[tokio::test]
    async fn stop_on_error_false_continues_past_failures() {
        let (log, registry) = recording_registry(&["create_merge_request"]);
        let ops = vec![
            op("commit", "create_commit", json!({ "branch": "main", "commit_message": "m" })),
            op("mr", "create_merge_request", json!({ "source_branch": "main" })),
            op("issues", "list_issues", json!({ "state": "opened" })),
        ];
        let outcome = BatchOrchestrator::new(registry)
            .run(
                &HandlerContext::new("ci"),
                ops,
                BatchOptions { stop_on_error: false, ..Default::default() },
            )
            .await;

        assert!(!outcome.success, "a failed step still fails the batch");
        assert!(!outcome.rollback_performed, "no unwind without stop_on_error");
        assert_eq!(outcome.operations[2].status, OperationStatus::Success);
        assert!(log.lock().unwrap().iter().any(|(tool, _)| tool == "list_issues"));
    }

    #[tokio::test]
    async fn unreached_steps_are_reported_pending() {
        let (_, registry) = recording_registry(&["create_merge_request"]);
        let ops = vec![
            op("mr", "create_merge_request", json!({ "source_branch": "main" })),
            op("issues", "list_issues", json!({})),
        ];
        let outcome = BatchOrchestrator::new(registry)
            .run(&HandlerContext::new("ci"), ops, BatchOptions::default())
            .await;

        assert_eq!(outcome.operations[0].status, OperationStatus::Failed);
        assert_eq!(outcome.operations[1].status, OperationStatus::Pending);
    }

    #[tokio::test]
    async fn update_steps_restore_their_pre_update_snapshot() {
        // Step 1 updates the MR (snapshot captured first), step 2 fails.
        let (log, registry) = recording_registry(&["create_merge_request"]);
        let ops = vec![
            op(
                "retitle",
                "update_merge_request",
                json!({ "project_id": 1, "merge_request_iid": 5, "title": "new title" }),
            ),
            op("mr", "create_merge_request", json!({ "source_branch": "main" })),
        ];
        let outcome = BatchOrchestrator::new(registry)
            .run(&HandlerContext::new("ci"), ops, BatchOptions::default())
            .await;

        assert!(outcome.rollback_performed);
        assert_eq!(outcome.rollbacks[0].status, RollbackStatus::Succeeded);

        let log = log.lock().unwrap();
        // get_merge_request ran before the update, and the restore re-applied
        // the captured fields.
        let tools: Vec<&str> = log.iter().map(|(tool, _)| tool.as_str()).collect();
        let getter_pos = tools.iter().position(|&t| t == "get_merge_request").unwrap();
        let update_pos = tools.iter().position(|&t| t == "update_merge_request").unwrap();
        assert!(getter_pos < update_pos);

        let restore = log.iter().rev().find(|(tool, _)| tool == "update_merge_request").unwrap();
        assert_eq!(restore.1["title"], json!("before"));
        assert_eq!(restore.1["description"], json!("old"));
        assert_eq!(restore.1["merge_request_iid"], json!(5));
    }

    #[tokio::test]
    async fn batch_defaults_fill_missing_argument_keys() {
        let (log, registry) = recording_registry(&[]);
        let ctx = HandlerContext::new("ci").with_default("project_id", json!(42));
        let ops = vec![
            op("issues", "list_issues", json!({ "state": "opened" })),
            op("pinned", "list_issues", json!({ "project_id": 7 })),
        ];
        let outcome =
            BatchOrchestrator::new(registry).run(&ctx, ops, BatchOptions::default()).await;
        assert!(outcome.success);

        let log = log.lock().unwrap();
        assert_eq!(log[0].1["project_id"], json!(42), "default injected");
        assert_eq!(log[1].1["project_id"], json!(7), "step's own value wins");
    }

    #[tokio::test]
    async fn cancellation_mid_batch_unwinds_completed_steps() {
        let log: Arc<Mutex<Vec<String>>> = Arc::default();
        let cancel = CancelFlag::new();

        // The first step's handler cancels the batch while it runs, as an
        // external caller would mid-flight.
        let commit_log = log.clone();
        let commit_cancel = cancel.clone();
        let revert_log = log.clone();
        let registry = Arc::new(
            InMemoryRegistry::new()
                .register(
                    "create_commit",
                    handler_fn(move |_ctx, _args| {
                        let log = commit_log.clone();
                        let cancel = commit_cancel.clone();
                        Box::pin(async move {
                            log.lock().unwrap().push("create_commit".to_string());
                            cancel.cancel();
                            Ok(json!({ "id": "sha-9" }))
                        })
                    }),
                )
                .register(
                    "revert_commit",
                    handler_fn(move |_ctx, _args| {
                        let log = revert_log.clone();
                        Box::pin(async move {
                            log.lock().unwrap().push("revert_commit".to_string());
                            Ok(Value::Null)
                        })
                    }),
                ),
        );

        let ops = vec![
            op("commit", "create_commit", json!({ "branch": "main", "commit_message": "m" })),
            op("issues", "list_issues", json!({})),
        ];
        let outcome = BatchOrchestrator::new(registry)
            .run(
                &HandlerContext::new("ci"),
                ops,
                BatchOptions { stop_on_error: true, cancel: Some(cancel) },
            )
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.operations[0].status, OperationStatus::Success);
        assert_eq!(outcome.operations[1].status, OperationStatus::Failed);
        assert_eq!(outcome.operations[1].error.as_deref(), Some("batch cancelled"));

        // The completed commit was still rolled back.
        assert!(outcome.rollback_performed);
        assert_eq!(outcome.rollbacks[0].step, "commit");
        assert_eq!(outcome.rollbacks[0].status, RollbackStatus::Succeeded);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["create_commit".to_string(), "revert_commit".to_string()]
        );
    }

    #[tokio::test]
    async fn cancellation_is_a_failure_at_the_current_step() {
        let (log, registry) = recording_registry(&[]);
        let cancel = CancelFlag::new();
        cancel.cancel();

        // Pre-cancelled: the first step is treated as the failure point.
        let ops = vec![
            op("commit", "create_commit", json!({ "branch": "main", "commit_message": "m" })),
        ];
        let outcome = BatchOrchestrator::new(registry)
            .run(
                &HandlerContext::new("ci"),
                ops,
                BatchOptions { stop_on_error: true, cancel: Some(cancel) },
            )
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.first_error().unwrap().1, "batch cancelled");
        assert!(!outcome.rollback_performed, "nothing had completed yet");
        assert!(log.lock().unwrap().is_empty());
    }
}
