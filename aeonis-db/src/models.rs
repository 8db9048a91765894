//! Data models for database records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Attribute lifted into [`Span::commit_id`] on ingest
pub const COMMIT_ATTRIBUTE: &str = "service.version";

/// Attribute lifted into [`Span::sdk_version`] on ingest
pub const SDK_VERSION_ATTRIBUTE: &str = "telemetry.sdk.version";

/// A project and its repository linkage
#[derive(Clone, Serialize, sqlx::FromRow)]
pub struct Project {
    pub id: String,
    pub name: String,
    /// Key the tracer SDK authenticates with
    pub api_key: String,
    pub remote_url: Option<String>,
    pub is_private: bool,
    /// SSH private key or HTTPS token for private repositories
    #[serde(skip_serializing)]
    pub credential: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("remote_url", &self.remote_url)
            .field("is_private", &self.is_private)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Fields for creating a project
#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub name: String,
    pub remote_url: Option<String>,
    pub is_private: bool,
    pub credential: Option<String>,
}

impl NewProject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Stored span
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Span {
    pub id: String,
    pub project_id: String,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub commit_id: Option<String>,
    pub sdk_version: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Attributes as JSON text
    pub attributes: String,
    /// Error as JSON text, if the span failed
    pub error: Option<String>,
}

impl Span {
    /// Attributes as a JSON value, an empty object if unparsable
    pub fn attributes_json(&self) -> Value {
        serde_json::from_str(&self.attributes).unwrap_or_else(|_| Value::Object(Map::new()))
    }

    /// Error as a JSON value; text that is not JSON is returned as a string
    pub fn error_json(&self) -> Option<Value> {
        self.error.as_ref().map(|raw| {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
        })
    }

    pub fn duration_ms(&self) -> i64 {
        (self.end_time - self.start_time).num_milliseconds()
    }
}

/// A span as exported by the tracer SDK
#[derive(Debug, Clone, Deserialize)]
pub struct NewSpan {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default)]
    pub parent_span_id: Option<String>,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl NewSpan {
    /// Remove the lifted attributes, returning `(commit_id, sdk_version)`
    pub fn lift_attributes(&mut self) -> (Option<String>, Option<String>) {
        (
            take_string(&mut self.attributes, COMMIT_ATTRIBUTE),
            take_string(&mut self.attributes, SDK_VERSION_ATTRIBUTE),
        )
    }
}

fn take_string(attributes: &mut Map<String, Value>, key: &str) -> Option<String> {
    match attributes.remove(key)? {
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Filter for span queries
#[derive(Debug, Clone)]
pub struct SpanFilter {
    pub project_id: String,
    pub trace_id: Option<String>,
    /// Substring the span name must contain
    pub name_contains: Option<String>,
    pub commit_id: Option<String>,
    pub errors_only: bool,
    pub limit: i64,
}

impl SpanFilter {
    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            trace_id: None,
            name_contains: None,
            commit_id: None,
            errors_only: false,
            limit: 50,
        }
    }
}

/// Aggregate of one trace
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TraceRow {
    pub trace_id: String,
    /// Name of the earliest parentless span
    pub root_span: Option<String>,
    pub span_count: i64,
    pub started_at: DateTime<Utc>,
    pub has_error: bool,
}
