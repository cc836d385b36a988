use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use shared::domain::WorkspaceConfig;
use tokio::fs;

use crate::WorkspaceStore;

pub const WORKSPACE_DIR_NAME: &str = ".huddle";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const CONNECTED_MARKER_NAME: &str = ".connected";

/// Workspace config kept as pretty JSON under `<root>/.huddle/config.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(workspace_root: impl AsRef<Path>) -> Self {
        Self {
            dir: workspace_root.as_ref().join(WORKSPACE_DIR_NAME),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE_NAME)
    }

    pub fn marker_path(&self) -> PathBuf {
        self.dir.join(CONNECTED_MARKER_NAME)
    }

    async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create '{}'", self.dir.display()))
    }
}

#[async_trait]
impl WorkspaceStore for JsonFileStore {
    async fn read(&self) -> Result<Option<WorkspaceConfig>> {
        let path = self.config_path();
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read '{}'", path.display()))
            }
        };
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("invalid workspace config '{}'", path.display()))?;
        Ok(Some(config))
    }

    async fn write(&self, config: &WorkspaceConfig) -> Result<()> {
        self.ensure_dir().await?;
        let path = self.config_path();
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(config)?;
        fs::write(&tmp, body)
            .await
            .with_context(|| format!("failed to write '{}'", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to replace '{}'", path.display()))?;
        Ok(())
    }

    async fn set_connected_marker(&self, connected: bool) -> Result<()> {
        let path = self.marker_path();
        if connected {
            self.ensure_dir().await?;
            fs::write(&path, "true")
                .await
                .with_context(|| format!("failed to write '{}'", path.display()))?;
            return Ok(());
        }
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to remove '{}'", path.display())),
        }
    }

    async fn connected_marker(&self) -> Result<bool> {
        Ok(fs::try_exists(self.marker_path()).await.unwrap_or(false))
    }
}
