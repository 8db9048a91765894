//! Project repository

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{NewProject, Project};

fn generate_api_key() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Repository for projects and their repository linkage
pub struct ProjectsRepo {
    pool: SqlitePool,
}

impl ProjectsRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a project with a fresh id and API key
    pub async fn create(&self, project: NewProject) -> Result<Project> {
        let name = project.name.trim();
        if name.is_empty() {
            return Err(Error::InvalidData("Project name must not be empty".to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO projects (
                id, name, api_key, remote_url, is_private, credential, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(name)
        .bind(generate_api_key())
        .bind(non_blank(project.remote_url))
        .bind(project.is_private)
        .bind(project.credential)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::debug!(project_id = %id, "Created project");
        self.get(&id).await
    }

    /// Find a project by id
    pub async fn find_by_id(&self, id: &str) -> Result<Option<Project>> {
        sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    /// Get a project by id, failing if it does not exist
    pub async fn get(&self, id: &str) -> Result<Project> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Project {} not found", id)))
    }

    /// Find the project an SDK API key belongs to
    pub async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Project>> {
        sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE api_key = ?")
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    /// List all projects, oldest first
    pub async fn list(&self) -> Result<Vec<Project>> {
        sqlx::query_as::<_, Project>("SELECT * FROM projects ORDER BY created_at ASC, name ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    /// Link (or unlink, with `remote_url = None`) a repository
    pub async fn link_repository(
        &self,
        id: &str,
        remote_url: Option<String>,
        is_private: bool,
        credential: Option<String>,
    ) -> Result<Project> {
        let result = sqlx::query(
            r#"
            UPDATE projects
            SET remote_url = ?, is_private = ?, credential = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(non_blank(remote_url))
        .bind(is_private)
        .bind(credential)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Project {} not found", id)));
        }

        tracing::info!(project_id = %id, is_private, "Updated repository link");
        self.get(id).await
    }

    /// Delete a project and its spans
    ///
    /// Returns whether the project existed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM spans WHERE project_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
