//! End-to-end batch scenarios against the fake remote API.

mod common;

use common::fake_api;
use paceline::prelude::*;
use serde_json::json;

fn op(name: &str, tool: &str, arguments: serde_json::Value) -> Operation {
    Operation { name: name.into(), tool: tool.into(), arguments }
}

#[tokio::test]
async fn commit_then_failing_mr_update_reverts_the_commit() {
    let (state, registry) = fake_api();

    // Seed an MR to update, then arm the update to fail.
    {
        let mut state = state.lock().unwrap();
        state.next_iid = 4;
        state.merge_requests.insert(
            5,
            common::MergeRequest {
                iid: 5,
                title: "original".into(),
                description: String::new(),
                state: "opened".into(),
            },
        );
        state.fail("update_merge_request");
    }

    let outcome = BatchOrchestrator::new(registry)
        .run(
            &HandlerContext::new("ci"),
            vec![
                op(
                    "create_commit",
                    "create_commit",
                    json!({ "branch": "main", "commit_message": "add config" }),
                ),
                op(
                    "update_mr",
                    "update_merge_request",
                    json!({ "merge_request_iid": 5, "title": "ship {{create_commit.id}}" }),
                ),
            ],
            BatchOptions::default(),
        )
        .await;

    assert!(!outcome.success);
    assert!(outcome.rollback_performed);

    // The reported error is the step-two failure, not a rollback error.
    let (step, error) = outcome.first_error().unwrap();
    assert_eq!(step, "update_mr");
    assert!(error.contains("update_merge_request rejected"));

    // The commit created in step one was reverted on its branch.
    let state = state.lock().unwrap();
    let last = state.commits.last().unwrap();
    assert_eq!(last.id, "revert-of-sha-1");
    assert!(last.message.contains("add config"));
    assert_eq!(outcome.rollbacks.len(), 1);
    assert_eq!(outcome.rollbacks[0].status, RollbackStatus::Succeeded);
}

#[tokio::test]
async fn empty_batch_is_a_successful_no_op() {
    let (state, registry) = fake_api();
    let outcome = BatchOrchestrator::new(registry)
        .run(&HandlerContext::new("ci"), vec![], BatchOptions::default())
        .await;

    assert!(outcome.success);
    assert!(outcome.operations.is_empty());
    assert!(!outcome.rollback_performed);
    assert_eq!(state.lock().unwrap().calls.len(), 0);
}

#[tokio::test]
async fn references_resolve_and_missing_ones_stay_literal() {
    let (state, registry) = fake_api();

    let outcome = BatchOrchestrator::new(registry)
        .run(
            &HandlerContext::new("ci"),
            vec![
                op(
                    "step1",
                    "create_commit",
                    json!({ "branch": "main", "commit_message": "first" }),
                ),
                op(
                    "step2",
                    "create_commit",
                    json!({
                        "branch": "main",
                        "commit_message": "after {{step1.id}} and {{missing.field}}",
                    }),
                ),
            ],
            BatchOptions::default(),
        )
        .await;

    assert!(outcome.success);
    let state = state.lock().unwrap();
    assert_eq!(
        state.commits[1].message, "after sha-1 and {{missing.field}}",
        "resolved reference substituted, unknown one left literal"
    );
}

#[tokio::test]
async fn multi_step_failure_unwinds_everything_in_reverse() {
    let (state, registry) = fake_api();
    state.lock().unwrap().fail("list_issues");

    let outcome = BatchOrchestrator::new(registry)
        .run(
            &HandlerContext::new("ci"),
            vec![
                op("branch", "create_branch", json!({ "branch": "feature-y" })),
                op(
                    "commit",
                    "create_commit",
                    json!({ "branch": "feature-y", "commit_message": "wip" }),
                ),
                op("mr", "create_merge_request", json!({ "title": "Feature Y" })),
                op("boom", "list_issues", json!({})),
            ],
            BatchOptions::default(),
        )
        .await;

    assert!(!outcome.success);
    assert!(outcome.rollback_performed);
    assert_eq!(outcome.first_error().unwrap().0, "boom");

    // LIFO unwind: close MR, revert commit, delete branch.
    let steps: Vec<&str> = outcome.rollbacks.iter().map(|r| r.step.as_str()).collect();
    assert_eq!(steps, vec!["mr", "commit", "branch"]);
    assert!(outcome.rollbacks.iter().all(|r| r.status == RollbackStatus::Succeeded));

    let state = state.lock().unwrap();
    assert!(!state.branches.contains("feature-y"));
    assert_eq!(state.merge_requests.values().next().unwrap().state, "closed");
    assert!(state.commits.iter().any(|c| c.id.starts_with("revert-of-")));
}

#[tokio::test]
async fn update_rollback_restores_the_pre_update_snapshot() {
    let (state, registry) = fake_api();
    {
        let mut state = state.lock().unwrap();
        state.merge_requests.insert(
            9,
            common::MergeRequest {
                iid: 9,
                title: "keep me".into(),
                description: "important".into(),
                state: "opened".into(),
            },
        );
        state.fail("create_commit");
    }

    let outcome = BatchOrchestrator::new(registry)
        .run(
            &HandlerContext::new("ci"),
            vec![
                op(
                    "retitle",
                    "update_merge_request",
                    json!({ "merge_request_iid": 9, "title": "scratch" }),
                ),
                op(
                    "commit",
                    "create_commit",
                    json!({ "branch": "main", "commit_message": "x" }),
                ),
            ],
            BatchOptions::default(),
        )
        .await;

    assert!(!outcome.success);
    assert!(outcome.rollback_performed);

    let state = state.lock().unwrap();
    let mr = &state.merge_requests[&9];
    assert_eq!(mr.title, "keep me", "title restored from the pre-update snapshot");
    assert_eq!(mr.description, "important");
}

#[tokio::test]
async fn rollback_failure_does_not_mask_the_original_error() {
    let (state, registry) = fake_api();
    {
        let mut state = state.lock().unwrap();
        state.fail("list_issues");
        state.fail("revert_commit");
    }

    let outcome = BatchOrchestrator::new(registry)
        .run(
            &HandlerContext::new("ci"),
            vec![
                op(
                    "commit",
                    "create_commit",
                    json!({ "branch": "main", "commit_message": "m" }),
                ),
                op("boom", "list_issues", json!({})),
            ],
            BatchOptions::default(),
        )
        .await;

    let (step, error) = outcome.first_error().unwrap();
    assert_eq!(step, "boom");
    assert!(error.contains("list_issues rejected"));

    assert!(outcome.rollback_performed);
    assert_eq!(outcome.rollbacks[0].status, RollbackStatus::Failed);
    assert!(outcome.rollbacks[0].error.as_deref().unwrap().contains("revert_commit"));
}

#[tokio::test]
async fn batch_defaults_reach_handlers_via_argument_injection() {
    let (state, registry) = fake_api();

    let ctx = HandlerContext::new("ci").with_default("branch", json!("main"));
    let outcome = BatchOrchestrator::new(registry)
        .run(
            &ctx,
            vec![op("commit", "create_commit", json!({ "commit_message": "no branch arg" }))],
            BatchOptions::default(),
        )
        .await;

    assert!(outcome.success, "{:?}", outcome.first_error());
    assert_eq!(state.lock().unwrap().commits[0].branch, "main");
}
