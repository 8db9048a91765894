//! Tool execution for one conversation
//!
//! A session belongs to a single project. It acquires the project's working
//! copy on the first git tool and keeps the handle until the conversation
//! ends, so the cache never evicts it mid-conversation. Every execution
//! produces a result payload; failures become structured error objects.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::resolve::{resolve, RepositoryDefaults, ToolCall};
use crate::chat::{ToolInvocation, ToolResult};
use crate::git::{RepoCache, WorkingCopy};
use crate::scanner::StaticScanner;
use crate::store::TraceStore;
use crate::{Error, Result};

/// Message reported for any failure to obtain the working copy
pub const REPOSITORY_UNAVAILABLE: &str = "repository unavailable";

/// Collaborators shared by all sessions
pub struct ToolContext {
    pub cache: Arc<RepoCache>,
    pub traces: Arc<dyn TraceStore>,
    pub scanner: Arc<dyn StaticScanner>,
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("cache", &self.cache)
            .field("scanner", &self.scanner.name())
            .finish_non_exhaustive()
    }
}

/// Structured error object returned to the model
///
/// Repository acquisition failures are reported generically; their details
/// only go to the log.
pub fn error_payload(err: &Error) -> Value {
    let kind = match err {
        Error::Io(_)
        | Error::Json(_)
        | Error::Git(_)
        | Error::Config(_)
        | Error::Completion(_)
        | Error::Store(_)
        | Error::Other(_)
        | Error::Timeout(_)
        | Error::ToolExecution(_) => "tool_execution_error",
        other => other.kind(),
    };

    let message = if err.is_repository_unavailable() {
        REPOSITORY_UNAVAILABLE.to_string()
    } else {
        err.to_string()
    };

    json!({"error": {"kind": kind, "message": message}})
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn payload<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Tool executor bound to one project
#[derive(Debug)]
pub struct ToolSession {
    context: Arc<ToolContext>,
    project_id: String,
    working_copy: Option<Arc<WorkingCopy>>,
}

impl ToolSession {
    /// Create a session for `project_id`
    pub fn new(context: Arc<ToolContext>, project_id: impl Into<String>) -> Self {
        Self {
            context,
            project_id: project_id.into(),
            working_copy: None,
        }
    }

    /// Project this session is bound to
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Whether the working copy has been acquired
    pub fn holds_working_copy(&self) -> bool {
        self.working_copy.is_some()
    }

    /// Working copy, acquired on first use
    ///
    /// A failed acquisition is not remembered, so the next git tool retries.
    async fn working_copy(&mut self) -> Result<Arc<WorkingCopy>> {
        if let Some(wc) = &self.working_copy {
            return Ok(Arc::clone(wc));
        }

        match self.context.cache.acquire(&self.project_id).await {
            Ok(wc) => {
                self.working_copy = Some(Arc::clone(&wc));
                Ok(wc)
            }
            Err(e @ Error::NotFound(_)) => Err(e),
            Err(e) => {
                warn!(project_id = %self.project_id, "Working copy unavailable: {}", e);
                if e.is_repository_unavailable() {
                    Err(e)
                } else {
                    Err(Error::RepositoryUnavailable(e.to_string()))
                }
            }
        }
    }

    /// Resolve and execute one invocation, never failing
    pub async fn run(&mut self, invocation: &ToolInvocation) -> ToolResult {
        let started = Instant::now();
        let project_id = self.project_id.clone();

        // A panicking tool fails this call only, not the conversation
        let attempt = AssertUnwindSafe(async {
            match resolve(invocation, &project_id, &mut *self).await {
                Ok(call) => self.execute(call).await,
                Err(e) => Err(e),
            }
        })
        .catch_unwind()
        .await;

        let outcome = match attempt {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(tool = %invocation.name, "Tool panicked: {}", message);
                Err(Error::ToolExecution(format!("{} panicked: {}", invocation.name, message)))
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let response = match outcome {
            Ok(value) => {
                info!(tool = %invocation.name, elapsed_ms, success = true, "Tool executed");
                value
            }
            Err(e) => {
                info!(
                    tool = %invocation.name,
                    elapsed_ms,
                    success = false,
                    error_kind = e.kind(),
                    "Tool executed"
                );
                error_payload(&e)
            }
        };

        ToolResult {
            name: invocation.name.clone(),
            response,
        }
    }

    /// Execute a resolved call
    pub async fn execute(&mut self, call: ToolCall) -> Result<Value> {
        match call {
            ToolCall::QuerySpans(query) => {
                let spans = self.context.traces.query_spans(&query).await?;
                payload(json!({"count": spans.len(), "spans": spans}))
            }
            ToolCall::ListRecentTraces { project_id, limit } => {
                let traces = self.context.traces.recent_traces(&project_id, limit).await?;
                payload(json!({"count": traces.len(), "traces": traces}))
            }
            ToolCall::ListBranches => {
                let branches = self.working_copy().await?.list_branches().await?;
                payload(json!({"branches": branches}))
            }
            ToolCall::GetCommitHistory { branch, limit } => {
                let commits = self
                    .working_copy()
                    .await?
                    .commit_history(&branch, limit)
                    .await?;
                payload(json!({"branch": branch, "commits": commits}))
            }
            ToolCall::GetCommitDiff { commit_hash } => {
                payload(self.working_copy().await?.commit_diff(&commit_hash).await?)
            }
            ToolCall::ReadFileAtCommit {
                file_path,
                commit_hash,
            } => {
                let content = self
                    .working_copy()
                    .await?
                    .read_file_at_commit(&file_path, &commit_hash)
                    .await?;
                payload(json!({"file_path": file_path, "commit_hash": commit_hash, "content": content}))
            }
            ToolCall::ListFilesAtCommit { commit_hash } => {
                let files = self
                    .working_copy()
                    .await?
                    .list_files_at_commit(&commit_hash)
                    .await?;
                payload(json!({"commit_hash": commit_hash, "files": files}))
            }
            ToolCall::GetCommitAuthor { commit_hash } => {
                let author = self.working_copy().await?.commit_author(&commit_hash).await?;
                payload(json!({"commit_hash": commit_hash, "author": author}))
            }
            ToolCall::AnalyzeCode { commit_hash } => {
                let wc = self.working_copy().await?;
                let scanner = Arc::clone(&self.context.scanner);
                payload(wc.analyze_with_static_scanner(scanner.as_ref(), &commit_hash).await?)
            }
        }
    }
}

#[async_trait]
impl RepositoryDefaults for ToolSession {
    async fn default_branch(&mut self) -> Result<String> {
        self.working_copy()
            .await?
            .default_branch()
            .await?
            .ok_or_else(|| Error::NotFound("Default branch could not be determined".to_string()))
    }

    async fn latest_commit(&mut self, branch: &str) -> Result<String> {
        self.working_copy().await?.branch_head(branch).await
    }
}
