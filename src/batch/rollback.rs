//! Compensating actions for completed batch steps.
//!
//! Each tool identifier maps to a fixed inverse: branch and tag creation
//! invert to deletion, a created commit inverts to a revert commit on the
//! same branch, an opened merge request inverts to closing it, and update
//! tools invert to restoring a snapshot captured before the step ran.
//! Tools with no known inverse carry no descriptor and are skipped during
//! unwind.
//!
//! A compensating action is itself just another registry invocation, so
//! rollback traffic flows through the same gated handlers as forward
//! traffic.

use crate::error::ApiFailure;
use crate::registry::{HandlerContext, OperationRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Fields re-applied when restoring a pre-update snapshot.
const RESTORABLE_FIELDS: &[&str] = &["title", "description", "labels"];

/// Recorded inverse operation for one completed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RollbackAction {
    /// Delete the branch the step created.
    DeleteBranch { branch: String },
    /// Delete the tag the step created.
    DeleteTag { tag: String },
    /// Create a revert commit for the created commit, on its branch.
    RevertCommit { branch: String, sha: String },
    /// Close the merge request the step opened.
    CloseMergeRequest { iid: u64 },
    /// Re-apply the captured pre-update field values through `tool`.
    RestoreSnapshot {
        tool: String,
        identity: Map<String, Value>,
        snapshot: Value,
    },
}

impl RollbackAction {
    /// The registry invocation performing this action.
    pub fn invocation(&self) -> (String, Value) {
        match self {
            RollbackAction::DeleteBranch { branch } => {
                ("delete_branch".to_string(), json!({ "branch": branch }))
            }
            RollbackAction::DeleteTag { tag } => {
                ("delete_tag".to_string(), json!({ "tag_name": tag }))
            }
            RollbackAction::RevertCommit { branch, sha } => {
                ("revert_commit".to_string(), json!({ "branch": branch, "sha": sha }))
            }
            RollbackAction::CloseMergeRequest { iid } => (
                "update_merge_request".to_string(),
                json!({ "merge_request_iid": iid, "state_event": "close" }),
            ),
            RollbackAction::RestoreSnapshot { tool, identity, snapshot } => {
                let mut args = identity.clone();
                if let Value::Object(snap) = snapshot {
                    for field in RESTORABLE_FIELDS {
                        if let Some(value) = snap.get(*field) {
                            args.insert((*field).to_string(), value.clone());
                        }
                    }
                }
                (tool.clone(), Value::Object(args))
            }
        }
    }
}

/// Which getter captures the pre-update snapshot for an update tool.
fn snapshot_getter(tool: &str) -> Option<&'static str> {
    match tool {
        "update_merge_request" => Some("get_merge_request"),
        "update_issue" => Some("get_issue"),
        _ => None,
    }
}

/// Keys identifying the updated resource, carried into the getter and the
/// restore call.
fn identity_args(tool: &str, args: &Value) -> Map<String, Value> {
    let keys: &[&str] = match tool {
        "update_merge_request" => &["project_id", "merge_request_iid"],
        "update_issue" => &["project_id", "issue_iid"],
        _ => &[],
    };
    let mut identity = Map::new();
    if let Value::Object(map) = args {
        for key in keys {
            if let Some(value) = map.get(*key) {
                identity.insert((*key).to_string(), value.clone());
            }
        }
    }
    identity
}

/// Capture the pre-update state for tools whose inverse is a restore.
/// Best-effort: a missing getter or a failed capture means the step simply
/// carries no rollback descriptor.
pub(crate) async fn capture_snapshot(
    registry: &dyn OperationRegistry,
    ctx: &HandlerContext,
    tool: &str,
    args: &Value,
) -> Option<Value> {
    let getter = snapshot_getter(tool)?;
    let handler = registry.lookup(getter)?;
    let identity = identity_args(tool, args);
    match handler.invoke(ctx, Value::Object(identity)).await {
        Ok(snapshot) => Some(snapshot),
        Err(failure) => {
            tracing::debug!(tool, error = %failure, "snapshot capture failed; step gets no rollback");
            None
        }
    }
}

/// Fixed mapping from a completed step to its compensating action.
pub fn plan_rollback(
    tool: &str,
    args: &Value,
    result: &Value,
    snapshot: Option<Value>,
) -> Option<RollbackAction> {
    let arg_str = |key: &str| args.get(key).and_then(Value::as_str).map(str::to_string);
    match tool {
        "create_branch" => Some(RollbackAction::DeleteBranch { branch: arg_str("branch")? }),
        "create_tag" => Some(RollbackAction::DeleteTag { tag: arg_str("tag_name")? }),
        "create_commit" => Some(RollbackAction::RevertCommit {
            branch: arg_str("branch")?,
            sha: result.get("id").and_then(Value::as_str)?.to_string(),
        }),
        "create_merge_request" => Some(RollbackAction::CloseMergeRequest {
            iid: result.get("iid").and_then(Value::as_u64)?,
        }),
        "update_merge_request" | "update_issue" => Some(RollbackAction::RestoreSnapshot {
            tool: tool.to_string(),
            identity: identity_args(tool, args),
            snapshot: snapshot?,
        }),
        _ => None,
    }
}

/// Execute one compensating action through the registry.
pub(crate) async fn execute_rollback(
    registry: &dyn OperationRegistry,
    ctx: &HandlerContext,
    action: &RollbackAction,
) -> Result<(), ApiFailure> {
    let (tool, args) = action.invocation();
    let handler = registry
        .lookup(&tool)
        .ok_or_else(|| ApiFailure::unknown(format!("no handler for rollback tool {tool}")))?;
    handler.invoke(ctx, args).await.map(|_| ())
}
