//! Argument resolution
//!
//! Turns a raw model invocation into a typed [`ToolCall`]: parses the
//! arguments, binds the conversation's project id into database tools, and
//! fills in the branch/commit defaults that need a look at the repository.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::warn;

use super::ToolKind;
use crate::chat::ToolInvocation;
use crate::git::DEFAULT_HISTORY_LIMIT;
use crate::store::{SpanQuery, DEFAULT_SPAN_LIMIT, MAX_SPAN_LIMIT};
use crate::{Error, Result};

/// Upper bound on commits returned by one history call
pub const MAX_HISTORY_LIMIT: usize = 100;

/// Default number of traces listed
pub const DEFAULT_TRACE_LIMIT: usize = 20;

/// A fully resolved tool call, ready to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    QuerySpans(SpanQuery),
    ListRecentTraces { project_id: String, limit: usize },
    ListBranches,
    GetCommitHistory { branch: String, limit: usize },
    GetCommitDiff { commit_hash: String },
    ReadFileAtCommit { file_path: String, commit_hash: String },
    ListFilesAtCommit { commit_hash: String },
    GetCommitAuthor { commit_hash: String },
    AnalyzeCode { commit_hash: String },
}

impl ToolCall {
    /// Tool this call belongs to
    pub fn kind(&self) -> ToolKind {
        match self {
            ToolCall::QuerySpans(_) => ToolKind::QuerySpans,
            ToolCall::ListRecentTraces { .. } => ToolKind::ListRecentTraces,
            ToolCall::ListBranches => ToolKind::ListBranches,
            ToolCall::GetCommitHistory { .. } => ToolKind::GetCommitHistory,
            ToolCall::GetCommitDiff { .. } => ToolKind::GetCommitDiff,
            ToolCall::ReadFileAtCommit { .. } => ToolKind::ReadFileAtCommit,
            ToolCall::ListFilesAtCommit { .. } => ToolKind::ListFilesAtCommit,
            ToolCall::GetCommitAuthor { .. } => ToolKind::GetCommitAuthor,
            ToolCall::AnalyzeCode { .. } => ToolKind::AnalyzeCodeWithSemgrep,
        }
    }
}

/// Repository lookups needed to fill in missing arguments
#[async_trait]
pub trait RepositoryDefaults: Send {
    /// Name of the repository's default branch
    async fn default_branch(&mut self) -> Result<String>;

    /// Hash of the newest commit on `branch`
    async fn latest_commit(&mut self, branch: &str) -> Result<String>;
}

/// Accept counts sent as integers, floats or numeric strings
fn lenient_count<'de, D>(deserializer: D) -> std::result::Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;

    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match (n.as_u64(), n.as_f64()) {
            (Some(v), _) => Ok(Some(v as usize)),
            (None, Some(v)) if v >= 0.0 && v.fract() == 0.0 => Ok(Some(v as usize)),
            _ => Err(D::Error::custom(format!("expected a non-negative integer, got {}", n))),
        },
        Some(Value::String(s)) => s
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("expected a non-negative integer, got '{}'", s))),
        Some(other) => Err(D::Error::custom(format!("expected a non-negative integer, got {}", other))),
    }
}

/// Treat empty strings as absent
fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Deserialize)]
struct QuerySpansArgs {
    project_id: String,
    #[serde(default)]
    trace_id: Option<String>,
    #[serde(default)]
    span_name: Option<String>,
    #[serde(default)]
    commit_id: Option<String>,
    #[serde(default)]
    errors_only: bool,
    #[serde(default, deserialize_with = "lenient_count")]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RecentTracesArgs {
    project_id: String,
    #[serde(default, deserialize_with = "lenient_count")]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct HistoryArgs {
    #[serde(default)]
    branch: Option<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct CommitArgs {
    commit_hash: String,
}

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    file_path: String,
    commit_hash: String,
}

#[derive(Debug, Deserialize)]
struct AnalyzeArgs {
    #[serde(default)]
    commit_hash: Option<String>,
    #[serde(default)]
    branch: Option<String>,
}

fn parse<T: for<'de> Deserialize<'de>>(kind: ToolKind, args: Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(args))
        .map_err(|e| Error::InvalidArguments(format!("{}: {}", kind, e)))
}

fn required(kind: ToolKind, field: &str, value: String) -> Result<String> {
    non_blank(Some(value)).ok_or_else(|| Error::InvalidArguments(format!("{}: '{}' must not be empty", kind, field)))
}

/// Overwrite any caller-supplied project id with the conversation's
fn bind_project(kind: ToolKind, args: &mut Map<String, Value>, project_id: &str) {
    let previous = args.insert("project_id".to_string(), Value::String(project_id.to_string()));
    if let Some(Value::String(supplied)) = previous {
        if supplied != project_id {
            warn!(tool = %kind, "Ignoring project id supplied by the model");
        }
    }
}

/// Resolve a raw invocation against the conversation's project
///
/// `defaults` is only consulted when a branch or commit argument is missing.
pub async fn resolve(
    invocation: &ToolInvocation,
    project_id: &str,
    defaults: &mut dyn RepositoryDefaults,
) -> Result<ToolCall> {
    let kind = ToolKind::from_name(&invocation.name)
        .ok_or_else(|| Error::UnknownTool(invocation.name.clone()))?;

    let mut args = match &invocation.args {
        Value::Null => Map::new(),
        Value::Object(map) => map.clone(),
        other => {
            return Err(Error::InvalidArguments(format!(
                "{}: arguments must be an object, got {}",
                kind, other
            )))
        }
    };

    if kind.is_database() {
        bind_project(kind, &mut args, project_id);
    }

    let call = match kind {
        ToolKind::QuerySpans => {
            let a: QuerySpansArgs = parse(kind, args)?;
            ToolCall::QuerySpans(SpanQuery {
                project_id: a.project_id,
                trace_id: non_blank(a.trace_id),
                span_name: non_blank(a.span_name),
                commit_id: non_blank(a.commit_id),
                errors_only: a.errors_only,
                limit: a.limit.unwrap_or(DEFAULT_SPAN_LIMIT).clamp(1, MAX_SPAN_LIMIT),
            })
        }
        ToolKind::ListRecentTraces => {
            let a: RecentTracesArgs = parse(kind, args)?;
            ToolCall::ListRecentTraces {
                project_id: a.project_id,
                limit: a.limit.unwrap_or(DEFAULT_TRACE_LIMIT).clamp(1, MAX_SPAN_LIMIT),
            }
        }
        ToolKind::ListBranches => ToolCall::ListBranches,
        ToolKind::GetCommitHistory => {
            let a: HistoryArgs = parse(kind, args)?;
            let branch = match non_blank(a.branch) {
                Some(branch) => branch,
                None => defaults.default_branch().await?,
            };
            ToolCall::GetCommitHistory {
                branch,
                limit: a.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(MAX_HISTORY_LIMIT),
            }
        }
        ToolKind::GetCommitDiff => {
            let a: CommitArgs = parse(kind, args)?;
            ToolCall::GetCommitDiff {
                commit_hash: required(kind, "commit_hash", a.commit_hash)?,
            }
        }
        ToolKind::ReadFileAtCommit => {
            let a: ReadFileArgs = parse(kind, args)?;
            ToolCall::ReadFileAtCommit {
                file_path: required(kind, "file_path", a.file_path)?,
                commit_hash: required(kind, "commit_hash", a.commit_hash)?,
            }
        }
        ToolKind::ListFilesAtCommit => {
            let a: CommitArgs = parse(kind, args)?;
            ToolCall::ListFilesAtCommit {
                commit_hash: required(kind, "commit_hash", a.commit_hash)?,
            }
        }
        ToolKind::GetCommitAuthor => {
            let a: CommitArgs = parse(kind, args)?;
            ToolCall::GetCommitAuthor {
                commit_hash: required(kind, "commit_hash", a.commit_hash)?,
            }
        }
        ToolKind::AnalyzeCodeWithSemgrep => {
            let a: AnalyzeArgs = parse(kind, args)?;
            let commit_hash = match non_blank(a.commit_hash) {
                Some(hash) => hash,
                None => {
                    let branch = match non_blank(a.branch) {
                        Some(branch) => branch,
                        None => defaults.default_branch().await?,
                    };
                    defaults.latest_commit(&branch).await?
                }
            };
            ToolCall::AnalyzeCode { commit_hash }
        }
    };

    Ok(call)
}
