//! Persistence collaborator interfaces
//!
//! The core never talks to a database directly. Project/repository records
//! and span queries go through these traits; `aeonis-db` provides the SQLite
//! implementation behind the `database` feature.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::secrets::Secret;
use crate::Result;

/// Default and maximum number of spans a query tool may return
pub const DEFAULT_SPAN_LIMIT: usize = 50;
pub const MAX_SPAN_LIMIT: usize = 500;

/// Repository linkage of a project, as seen by the repository cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRecord {
    pub project_id: String,
    /// Clone URL; `None` when the project has no linked repository
    pub remote_url: Option<String>,
    pub is_private: bool,
    /// SSH private key or HTTPS token for private repositories
    pub credential: Option<Secret>,
}

impl RepositoryRecord {
    /// Remote URL if one is configured and non-blank
    pub fn remote(&self) -> Option<&str> {
        self.remote_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

/// Source of repository records
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Look up a project's repository record
    async fn get_project_by_id(&self, project_id: &str) -> Result<Option<RepositoryRecord>>;
}

/// Filter for span queries; always scoped to one project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanQuery {
    pub project_id: String,
    pub trace_id: Option<String>,
    /// Substring match on the span name
    pub span_name: Option<String>,
    pub commit_id: Option<String>,
    pub errors_only: bool,
    pub limit: usize,
}

impl SpanQuery {
    /// Query for the most recent spans of a project
    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            trace_id: None,
            span_name: None,
            commit_id: None,
            errors_only: false,
            limit: DEFAULT_SPAN_LIMIT,
        }
    }
}

/// A span as returned to the model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanRecord {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    /// Commit the emitting service was built from
    pub commit_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub attributes: serde_json::Value,
    pub error: Option<serde_json::Value>,
}

/// Summary of one trace
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceSummary {
    pub trace_id: String,
    /// Name of the parentless span, if recorded
    pub root_span: Option<String>,
    pub span_count: i64,
    pub started_at: DateTime<Utc>,
    pub has_error: bool,
}

/// Source of trace data for the database query tools
#[async_trait]
pub trait TraceStore: Send + Sync {
    /// Spans matching `query`, newest first
    async fn query_spans(&self, query: &SpanQuery) -> Result<Vec<SpanRecord>>;

    /// Most recently started traces of a project
    async fn recent_traces(&self, project_id: &str, limit: usize) -> Result<Vec<TraceSummary>>;
}

#[cfg(feature = "database")]
mod sqlite {
    use super::*;
    use crate::Error;

    fn store_error(e: aeonis_db::Error) -> Error {
        match e {
            aeonis_db::Error::NotFound(msg) => Error::NotFound(msg),
            other => Error::Store(other.to_string()),
        }
    }

    #[async_trait]
    impl ProjectStore for aeonis_db::Database {
        async fn get_project_by_id(&self, project_id: &str) -> Result<Option<RepositoryRecord>> {
            let project = self
                .projects()
                .find_by_id(project_id)
                .await
                .map_err(store_error)?;

            Ok(project.map(|p| RepositoryRecord {
                project_id: p.id,
                remote_url: p.remote_url,
                is_private: p.is_private,
                credential: p.credential.map(Secret::new),
            }))
        }
    }

    #[async_trait]
    impl TraceStore for aeonis_db::Database {
        async fn query_spans(&self, query: &SpanQuery) -> Result<Vec<SpanRecord>> {
            let filter = aeonis_db::SpanFilter {
                project_id: query.project_id.clone(),
                trace_id: query.trace_id.clone(),
                name_contains: query.span_name.clone(),
                commit_id: query.commit_id.clone(),
                errors_only: query.errors_only,
                limit: query.limit.min(MAX_SPAN_LIMIT) as i64,
            };

            let spans = self.spans().query(&filter).await.map_err(store_error)?;

            Ok(spans
                .into_iter()
                .map(|s| SpanRecord {
                    duration_ms: s.duration_ms(),
                    attributes: s.attributes_json(),
                    error: s.error_json(),
                    trace_id: s.trace_id,
                    span_id: s.span_id,
                    parent_span_id: s.parent_span_id,
                    name: s.name,
                    commit_id: s.commit_id,
                    start_time: s.start_time,
                    end_time: s.end_time,
                })
                .collect())
        }

        async fn recent_traces(&self, project_id: &str, limit: usize) -> Result<Vec<TraceSummary>> {
            let traces = self
                .spans()
                .recent_traces(project_id, limit.min(MAX_SPAN_LIMIT) as i64)
                .await
                .map_err(store_error)?;

            Ok(traces
                .into_iter()
                .map(|t| TraceSummary {
                    trace_id: t.trace_id,
                    root_span: t.root_span,
                    span_count: t.span_count,
                    started_at: t.started_at,
                    has_error: t.has_error,
                })
                .collect())
        }
    }
}
