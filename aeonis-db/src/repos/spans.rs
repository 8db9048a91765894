//! Span repository

use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{NewSpan, Span, SpanFilter, TraceRow};

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Repository for recorded spans
pub struct SpansRepo {
    pool: SqlitePool,
}

impl SpansRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a batch of spans for a project in one transaction
    ///
    /// `service.version` and `telemetry.sdk.version` are lifted out of the
    /// attributes into their own columns. Spans whose id was already recorded
    /// for the project are skipped. Returns the number of spans inserted.
    pub async fn insert_batch(&self, project_id: &str, spans: Vec<NewSpan>) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for mut span in spans {
            if span.trace_id.trim().is_empty() || span.span_id.trim().is_empty() {
                return Err(Error::InvalidData(format!(
                    "Span '{}' is missing a trace or span id",
                    span.name
                )));
            }

            let (commit_id, sdk_version) = span.lift_attributes();
            let attributes = serde_json::to_string(&span.attributes)?;
            let error = span
                .error
                .filter(|e| !e.is_null())
                .map(|e| serde_json::to_string(&e))
                .transpose()?;

            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO spans (
                    id, project_id, trace_id, span_id, parent_span_id, name,
                    commit_id, sdk_version, start_time, end_time, attributes, error
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(project_id)
            .bind(&span.trace_id)
            .bind(&span.span_id)
            .bind(non_blank(span.parent_span_id))
            .bind(&span.name)
            .bind(commit_id)
            .bind(sdk_version)
            .bind(span.start_time)
            .bind(span.end_time)
            .bind(attributes)
            .bind(error)
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected();
        }

        tx.commit().await?;
        tracing::debug!(project_id, inserted, "Stored spans");
        Ok(inserted)
    }

    /// Spans matching `filter`, newest first
    pub async fn query(&self, filter: &SpanFilter) -> Result<Vec<Span>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM spans WHERE project_id = ");
        query.push_bind(&filter.project_id);

        if let Some(trace_id) = &filter.trace_id {
            query.push(" AND trace_id = ").push_bind(trace_id);
        }
        if let Some(name) = &filter.name_contains {
            query.push(" AND instr(name, ").push_bind(name).push(") > 0");
        }
        if let Some(commit_id) = &filter.commit_id {
            query.push(" AND commit_id = ").push_bind(commit_id);
        }
        if filter.errors_only {
            query.push(" AND error IS NOT NULL");
        }

        query
            .push(" ORDER BY start_time DESC LIMIT ")
            .push_bind(filter.limit.max(1));

        query
            .build_query_as::<Span>()
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    /// All spans of one trace in start order
    pub async fn trace(&self, project_id: &str, trace_id: &str) -> Result<Vec<Span>> {
        sqlx::query_as::<_, Span>(
            "SELECT * FROM spans WHERE project_id = ? AND trace_id = ? ORDER BY start_time ASC",
        )
        .bind(project_id)
        .bind(trace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    /// Most recently active traces of a project
    pub async fn recent_traces(&self, project_id: &str, limit: i64) -> Result<Vec<TraceRow>> {
        sqlx::query_as::<_, TraceRow>(
            r#"
            SELECT
                s.trace_id AS trace_id,
                (
                    SELECT r.name FROM spans r
                    WHERE r.project_id = s.project_id
                      AND r.trace_id = s.trace_id
                      AND r.parent_span_id IS NULL
                    ORDER BY r.start_time ASC
                    LIMIT 1
                ) AS root_span,
                COUNT(*) AS span_count,
                MIN(s.start_time) AS started_at,
                MAX(CASE WHEN s.error IS NOT NULL THEN 1 ELSE 0 END) AS has_error
            FROM spans s
            WHERE s.project_id = ?
            GROUP BY s.trace_id
            ORDER BY MAX(s.start_time) DESC
            LIMIT ?
            "#,
        )
        .bind(project_id)
        .bind(limit.max(1))
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    /// Delete every span of a project, returning how many were removed
    pub async fn delete_by_project(&self, project_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM spans WHERE project_id = ?")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewProject;
    use crate::Database;
    use serde_json::json;
    use tempfile::TempDir;

    async fn setup_test_db() -> (Database, TempDir, String) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(temp_dir.path().join("test.db")).await.unwrap();
        let project = db.projects().create(NewProject::new("shop")).await.unwrap();
        (db, temp_dir, project.id)
    }

    fn span(trace: &str, id: &str, parent: Option<&str>, name: &str, second: u32, failed: bool) -> NewSpan {
        let commit = if trace == "t1" { "abc123" } else { "def456" };
        let error = if failed {
            json!({"message": "card declined"})
        } else {
            json!(null)
        };

        serde_json::from_value(json!({
            "trace_id": trace,
            "span_id": id,
            "parent_span_id": parent,
            "name": name,
            "start_time": format!("2024-05-01T10:00:{:02}Z", second),
            "end_time": format!("2024-05-01T10:00:{:02}.250Z", second),
            "attributes": {
                "service.version": commit,
                "telemetry.sdk.version": "0.3.1",
                "http.route": "/pay"
            },
            "error": error
        }))
        .unwrap()
    }

    fn sample() -> Vec<NewSpan> {
        vec![
            span("t1", "a", None, "POST /pay", 1, false),
            span("t1", "b", Some("a"), "charge card", 2, true),
            span("t2", "c", None, "GET /cart", 5, false),
            span("t2", "d", Some(""), "load cart", 6, false),
        ]
    }

    #[tokio::test]
    async fn test_insert_lifts_attributes() {
        let (db, _temp, project_id) = setup_test_db().await;
        let repo = db.spans();

        assert_eq!(repo.insert_batch(&project_id, sample()).await.unwrap(), 4);

        let spans = repo.trace(&project_id, "t1").await.unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].span_id, "a");
        assert_eq!(spans[0].commit_id.as_deref(), Some("abc123"));
        assert_eq!(spans[0].sdk_version.as_deref(), Some("0.3.1"));
        assert_eq!(spans[0].attributes_json(), json!({"http.route": "/pay"}));
        assert_eq!(spans[0].duration_ms(), 250);
        assert!(spans[0].error_json().is_none());
        assert_eq!(spans[1].error_json(), Some(json!({"message": "card declined"})));
    }

    #[tokio::test]
    async fn test_reimport_skips_existing_spans() {
        let (db, _temp, project_id) = setup_test_db().await;
        let repo = db.spans();

        repo.insert_batch(&project_id, sample()).await.unwrap();
        assert_eq!(repo.insert_batch(&project_id, sample()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_ids_are_rejected() {
        let (db, _temp, project_id) = setup_test_db().await;
        let result = db
            .spans()
            .insert_batch(&project_id, vec![span("t1", " ", None, "x", 1, false)])
            .await;
        assert!(matches!(result, Err(Error::InvalidData(_))));
    }

    #[tokio::test]
    async fn test_query_filters() {
        let (db, _temp, project_id) = setup_test_db().await;
        let repo = db.spans();
        repo.insert_batch(&project_id, sample()).await.unwrap();

        let all = repo.query(&SpanFilter::for_project(&project_id)).await.unwrap();
        let ids: Vec<_> = all.iter().map(|s| s.span_id.as_str()).collect();
        assert_eq!(ids, vec!["d", "c", "b", "a"]);

        let filter = SpanFilter {
            trace_id: Some("t1".to_string()),
            ..SpanFilter::for_project(&project_id)
        };
        assert_eq!(repo.query(&filter).await.unwrap().len(), 2);

        let filter = SpanFilter {
            name_contains: Some("cart".to_string()),
            ..SpanFilter::for_project(&project_id)
        };
        assert_eq!(repo.query(&filter).await.unwrap().len(), 2);

        let filter = SpanFilter {
            commit_id: Some("abc123".to_string()),
            errors_only: true,
            ..SpanFilter::for_project(&project_id)
        };
        let failed = repo.query(&filter).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name, "charge card");

        let filter = SpanFilter {
            limit: 1,
            ..SpanFilter::for_project(&project_id)
        };
        assert_eq!(repo.query(&filter).await.unwrap()[0].span_id, "d");
    }

    #[tokio::test]
    async fn test_queries_are_scoped_to_project() {
        let (db, _temp, project_id) = setup_test_db().await;
        let other = db.projects().create(NewProject::new("other")).await.unwrap();
        let repo = db.spans();
        repo.insert_batch(&project_id, sample()).await.unwrap();

        assert!(repo.query(&SpanFilter::for_project(&other.id)).await.unwrap().is_empty());
        assert!(repo.recent_traces(&other.id, 10).await.unwrap().is_empty());
        assert!(repo.trace(&other.id, "t1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recent_traces() {
        let (db, _temp, project_id) = setup_test_db().await;
        let repo = db.spans();
        repo.insert_batch(&project_id, sample()).await.unwrap();

        let traces = repo.recent_traces(&project_id, 10).await.unwrap();
        assert_eq!(traces.len(), 2);

        assert_eq!(traces[0].trace_id, "t2");
        assert_eq!(traces[0].root_span.as_deref(), Some("GET /cart"));
        assert_eq!(traces[0].span_count, 2);
        assert!(!traces[0].has_error);

        assert_eq!(traces[1].trace_id, "t1");
        assert_eq!(traces[1].root_span.as_deref(), Some("POST /pay"));
        assert!(traces[1].has_error);

        assert_eq!(repo.recent_traces(&project_id, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_project() {
        let (db, _temp, project_id) = setup_test_db().await;
        let repo = db.spans();
        repo.insert_batch(&project_id, sample()).await.unwrap();

        assert_eq!(repo.delete_by_project(&project_id).await.unwrap(), 4);
        assert!(repo.recent_traces(&project_id, 10).await.unwrap().is_empty());
    }
}
