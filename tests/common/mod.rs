#![allow(dead_code)]

//! Fake remote API shared by the integration tests: a tiny in-memory
//! repository (branches, commits, merge requests) behind the registry seam,
//! with per-tool failure injection.

use paceline::prelude::*;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct Commit {
    pub id: String,
    pub branch: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub iid: u64,
    pub title: String,
    pub description: String,
    pub state: String,
}

impl MergeRequest {
    fn to_json(&self) -> Value {
        json!({
            "iid": self.iid,
            "title": self.title,
            "description": self.description,
            "state": self.state,
        })
    }
}

#[derive(Debug, Default)]
pub struct RemoteState {
    pub branches: HashSet<String>,
    pub commits: Vec<Commit>,
    pub merge_requests: HashMap<u64, MergeRequest>,
    pub calls: Vec<String>,
    fail_tools: HashSet<String>,
    pub next_iid: u64,
}

impl RemoteState {
    /// Make every subsequent call to `tool` fail with a validation error.
    pub fn fail(&mut self, tool: &str) {
        self.fail_tools.insert(tool.to_string());
    }

    pub fn calls_to(&self, tool: &str) -> usize {
        self.calls.iter().filter(|c| *c == tool).count()
    }
}

fn arg_str(args: &Value, key: &str) -> Result<String, ApiFailure> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ApiFailure::validation(format!("missing argument: {key}")))
}

fn arg_u64(args: &Value, key: &str) -> Result<u64, ApiFailure> {
    args.get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| ApiFailure::validation(format!("missing argument: {key}")))
}

fn tool(
    state: &Arc<Mutex<RemoteState>>,
    name: &'static str,
    run: fn(&mut RemoteState, &Value) -> Result<Value, ApiFailure>,
) -> Arc<dyn OperationHandler> {
    let state = state.clone();
    handler_fn(move |_ctx, args| {
        let state = state.clone();
        Box::pin(async move {
            let mut state = state.lock().unwrap();
            state.calls.push(name.to_string());
            if state.fail_tools.contains(name) {
                return Err(ApiFailure::validation(format!("{name} rejected by fake api")));
            }
            run(&mut state, &args)
        })
    })
}

/// A registry wired to one fake repository with a `main` branch.
pub fn fake_api() -> (Arc<Mutex<RemoteState>>, Arc<InMemoryRegistry>) {
    let state = Arc::new(Mutex::new(RemoteState {
        branches: HashSet::from(["main".to_string()]),
        ..Default::default()
    }));

    let registry = InMemoryRegistry::new()
        .register(
            "create_branch",
            tool(&state, "create_branch", |state, args| {
                let branch = arg_str(args, "branch")?;
                if !state.branches.insert(branch.clone()) {
                    return Err(ApiFailure::validation(format!("branch exists: {branch}")));
                }
                Ok(json!({ "name": branch }))
            }),
        )
        .register(
            "delete_branch",
            tool(&state, "delete_branch", |state, args| {
                let branch = arg_str(args, "branch")?;
                if !state.branches.remove(&branch) {
                    return Err(ApiFailure::not_found(format!("no branch: {branch}")));
                }
                Ok(Value::Null)
            }),
        )
        .register(
            "create_commit",
            tool(&state, "create_commit", |state, args| {
                let branch = arg_str(args, "branch")?;
                if !state.branches.contains(&branch) {
                    return Err(ApiFailure::not_found(format!("no branch: {branch}")));
                }
                let commit = Commit {
                    id: format!("sha-{}", state.commits.len() + 1),
                    branch,
                    message: arg_str(args, "commit_message")?,
                };
                state.commits.push(commit.clone());
                Ok(json!({ "id": commit.id, "branch": commit.branch }))
            }),
        )
        .register(
            "revert_commit",
            tool(&state, "revert_commit", |state, args| {
                let sha = arg_str(args, "sha")?;
                let branch = arg_str(args, "branch")?;
                let Some(original) = state.commits.iter().find(|c| c.id == sha).cloned() else {
                    return Err(ApiFailure::not_found(format!("no commit: {sha}")));
                };
                let revert = Commit {
                    id: format!("revert-of-{sha}"),
                    branch,
                    message: format!("Revert \"{}\"", original.message),
                };
                state.commits.push(revert.clone());
                Ok(json!({ "id": revert.id }))
            }),
        )
        .register(
            "create_merge_request",
            tool(&state, "create_merge_request", |state, args| {
                state.next_iid += 1;
                let mr = MergeRequest {
                    iid: state.next_iid,
                    title: arg_str(args, "title").unwrap_or_else(|_| "untitled".to_string()),
                    description: String::new(),
                    state: "opened".to_string(),
                };
                let out = mr.to_json();
                state.merge_requests.insert(mr.iid, mr);
                Ok(out)
            }),
        )
        .register(
            "update_merge_request",
            tool(&state, "update_merge_request", |state, args| {
                let iid = arg_u64(args, "merge_request_iid")?;
                let Some(mr) = state.merge_requests.get_mut(&iid) else {
                    return Err(ApiFailure::not_found(format!("no merge request: {iid}")));
                };
                if let Some(title) = args.get("title").and_then(Value::as_str) {
                    mr.title = title.to_string();
                }
                if let Some(description) = args.get("description").and_then(Value::as_str) {
                    mr.description = description.to_string();
                }
                if args.get("state_event").and_then(Value::as_str) == Some("close") {
                    mr.state = "closed".to_string();
                }
                Ok(mr.to_json())
            }),
        )
        .register(
            "get_merge_request",
            tool(&state, "get_merge_request", |state, args| {
                let iid = arg_u64(args, "merge_request_iid")?;
                state
                    .merge_requests
                    .get(&iid)
                    .map(MergeRequest::to_json)
                    .ok_or_else(|| ApiFailure::not_found(format!("no merge request: {iid}")))
            }),
        )
        .register(
            "list_issues",
            tool(&state, "list_issues", |_state, _args| {
                Ok(json!([{ "iid": 1, "title": "flaky pipeline" }]))
            }),
        );

    (state, Arc::new(registry))
}
