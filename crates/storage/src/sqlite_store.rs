use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use shared::domain::WorkspaceConfig;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};

use crate::WorkspaceStore;

/// Workspace configs kept in SQLite, one row per workspace id.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    workspace_id: String,
}

impl SqliteStore {
    pub async fn new(database_url: &str, workspace_id: impl Into<String>) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // every pooled connection to `sqlite::memory:` would see its own database
        let max_connections = if database_url.starts_with("sqlite::memory:") {
            1
        } else {
            5
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open sqlite database '{database_url}'"))?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            workspace_id: workspace_id.into(),
        })
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    /// Store for another workspace sharing the same database.
    pub fn for_workspace(&self, workspace_id: impl Into<String>) -> Self {
        Self {
            pool: self.pool.clone(),
            workspace_id: workspace_id.into(),
        }
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }
}

#[async_trait]
impl WorkspaceStore for SqliteStore {
    async fn read(&self) -> Result<Option<WorkspaceConfig>> {
        let row = sqlx::query("SELECT config_json FROM workspace_configs WHERE workspace_id = ?")
            .bind(&self.workspace_id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to load workspace '{}'", self.workspace_id))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let raw: String = row.try_get("config_json")?;
        let config = serde_json::from_str(&raw).with_context(|| {
            format!("invalid stored config for workspace '{}'", self.workspace_id)
        })?;
        Ok(Some(config))
    }

    async fn write(&self, config: &WorkspaceConfig) -> Result<()> {
        let raw = serde_json::to_string(config)?;
        sqlx::query(
            r#"
            INSERT INTO workspace_configs (workspace_id, config_json)
            VALUES (?, ?)
            ON CONFLICT(workspace_id) DO UPDATE SET
                config_json = excluded.config_json,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&self.workspace_id)
        .bind(raw)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to save workspace '{}'", self.workspace_id))?;
        Ok(())
    }

    async fn set_connected_marker(&self, connected: bool) -> Result<()> {
        let result =
            sqlx::query("UPDATE workspace_configs SET connected = ? WHERE workspace_id = ?")
                .bind(connected)
                .bind(&self.workspace_id)
                .execute(&self.pool)
                .await
                .context("failed to update connected marker")?;
        if result.rows_affected() == 0 && connected {
            tracing::warn!(
                workspace_id = %self.workspace_id,
                "connected marker set for a workspace without stored config"
            );
        }
        Ok(())
    }

    async fn connected_marker(&self) -> Result<bool> {
        let connected: Option<bool> =
            sqlx::query_scalar("SELECT connected FROM workspace_configs WHERE workspace_id = ?")
                .bind(&self.workspace_id)
                .fetch_optional(&self.pool)
                .await
                .context("failed to read connected marker")?;
        Ok(connected.unwrap_or(false))
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}
