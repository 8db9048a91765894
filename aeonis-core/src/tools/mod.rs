//! Tools the model can call
//!
//! The catalogue is a closed set: each [`ToolKind`] declares its name,
//! description and JSON parameter schema. Raw invocations are turned into a
//! typed [`ToolCall`] by the resolution stage before anything runs.

mod resolve;
mod session;

pub use resolve::{resolve, RepositoryDefaults, ToolCall};
pub use session::{error_payload, ToolContext, ToolSession, REPOSITORY_UNAVAILABLE};

use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;

/// Every tool the assistant exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    /// Filtered span lookup in the trace store
    QuerySpans,
    /// Most recent traces of the project
    ListRecentTraces,
    ListBranches,
    GetCommitHistory,
    GetCommitDiff,
    ReadFileAtCommit,
    ListFilesAtCommit,
    GetCommitAuthor,
    /// Static analysis of the code at a commit
    AnalyzeCodeWithSemgrep,
}

impl ToolKind {
    /// Get all available tools
    pub fn all() -> &'static [ToolKind] {
        &[
            ToolKind::QuerySpans,
            ToolKind::ListRecentTraces,
            ToolKind::ListBranches,
            ToolKind::GetCommitHistory,
            ToolKind::GetCommitDiff,
            ToolKind::ReadFileAtCommit,
            ToolKind::ListFilesAtCommit,
            ToolKind::GetCommitAuthor,
            ToolKind::AnalyzeCodeWithSemgrep,
        ]
    }

    /// Name the model uses to call this tool
    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::QuerySpans => "query_spans",
            ToolKind::ListRecentTraces => "list_recent_traces",
            ToolKind::ListBranches => "list_branches",
            ToolKind::GetCommitHistory => "get_commit_history",
            ToolKind::GetCommitDiff => "get_commit_diff",
            ToolKind::ReadFileAtCommit => "read_file_at_commit",
            ToolKind::ListFilesAtCommit => "list_files_at_commit",
            ToolKind::GetCommitAuthor => "get_commit_author",
            ToolKind::AnalyzeCodeWithSemgrep => "analyze_code_with_semgrep",
        }
    }

    /// Look up a tool by the name the model used
    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|kind| kind.name() == name)
    }

    /// Description shown to the model
    pub fn description(&self) -> &'static str {
        match self {
            ToolKind::QuerySpans => {
                "Returns recorded spans of the current project, newest first. \
                 Filter by trace id, span name substring, commit id, or errors only."
            }
            ToolKind::ListRecentTraces => {
                "Lists the most recent traces of the current project with their root span, \
                 span count and whether any span failed."
            }
            ToolKind::ListBranches => "Lists all branches in the Git repository.",
            ToolKind::GetCommitHistory => {
                "Returns the commit history for a given branch, most recent first. \
                 Uses the default branch if none is given."
            }
            ToolKind::GetCommitDiff => "Returns the diff for a specific commit hash.",
            ToolKind::ReadFileAtCommit => "Reads the content of a file at a specific commit hash.",
            ToolKind::ListFilesAtCommit => "Lists all files in the repository at a specific commit hash.",
            ToolKind::GetCommitAuthor => "Returns the author of a specific commit.",
            ToolKind::AnalyzeCodeWithSemgrep => {
                "Runs a static analysis scan on the code at a specific commit hash and returns \
                 a list of findings. Without a commit hash, scans the latest commit of the given \
                 branch or of the default branch."
            }
        }
    }

    /// JSON schema of the tool's parameters
    pub fn parameters(&self) -> Value {
        match self {
            ToolKind::QuerySpans => json!({
                "type": "object",
                "properties": {
                    "trace_id": {"type": "string", "description": "Only spans of this trace."},
                    "span_name": {"type": "string", "description": "Substring the span name must contain."},
                    "commit_id": {"type": "string", "description": "Only spans emitted by code built from this commit."},
                    "errors_only": {"type": "boolean", "description": "Only spans that recorded an error."},
                    "limit": {"type": "integer", "description": "Maximum number of spans to return. Defaults to 50."}
                }
            }),
            ToolKind::ListRecentTraces => json!({
                "type": "object",
                "properties": {
                    "limit": {"type": "integer", "description": "Maximum number of traces to return. Defaults to 20."}
                }
            }),
            ToolKind::ListBranches => json!({"type": "object", "properties": {}}),
            ToolKind::GetCommitHistory => json!({
                "type": "object",
                "properties": {
                    "branch": {"type": "string", "description": "The branch name to get history for."},
                    "limit": {"type": "integer", "description": "The maximum number of commits to return. Defaults to 10."}
                }
            }),
            ToolKind::GetCommitDiff | ToolKind::ListFilesAtCommit | ToolKind::GetCommitAuthor => json!({
                "type": "object",
                "properties": {
                    "commit_hash": {"type": "string", "description": "The commit hash."}
                },
                "required": ["commit_hash"]
            }),
            ToolKind::ReadFileAtCommit => json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string", "description": "The path to the file."},
                    "commit_hash": {"type": "string", "description": "The commit hash to read the file from."}
                },
                "required": ["file_path", "commit_hash"]
            }),
            ToolKind::AnalyzeCodeWithSemgrep => json!({
                "type": "object",
                "properties": {
                    "commit_hash": {"type": "string", "description": "The commit hash to analyze the code at."},
                    "branch": {"type": "string", "description": "Branch whose latest commit is analyzed when no commit hash is given."}
                }
            }),
        }
    }

    /// Whether the tool reads the trace store rather than the repository
    pub fn is_database(&self) -> bool {
        matches!(self, ToolKind::QuerySpans | ToolKind::ListRecentTraces)
    }

    /// Declaration sent to the completion engine
    pub fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ToolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("Unknown tool: {}", s))
    }
}

/// Name, description and parameter schema of one tool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Declarations for the whole catalogue
pub fn declarations() -> Vec<ToolDeclaration> {
    ToolKind::all().iter().map(ToolKind::declaration).collect()
}
