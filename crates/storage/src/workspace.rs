use std::path::Path;

use anyhow::Result;
use shared::domain::WorkspaceConfig;
use tokio::process::Command;
use tracing::{info, warn};

use crate::{JsonFileStore, WorkspaceStore};

pub const DEFAULT_SYSTEM_PROMPT: &str = "Be polite, speak plainly";
const FALLBACK_IDENTITY: &str = "guest";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitIdentity {
    pub identity: String,
    pub channel_id: String,
}

/// Identity from `git config user.name`, channel from the `owner/repo` part of
/// the origin remote. Falls back to `guest` and the directory name.
pub async fn detect_git_identity(root: &Path) -> GitIdentity {
    let fallback_channel = root
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workspace".to_string());

    let identity = git_config(root, &["config", "user.name"])
        .await
        .unwrap_or_else(|| FALLBACK_IDENTITY.to_string());
    let channel_id = git_config(root, &["config", "--get", "remote.origin.url"])
        .await
        .and_then(|url| repo_slug(&url))
        .unwrap_or(fallback_channel);

    GitIdentity {
        identity,
        channel_id,
    }
}

async fn git_config(root: &Path, args: &[&str]) -> Option<String> {
    let output = match Command::new("git").args(args).current_dir(root).output().await {
        Ok(output) => output,
        Err(err) => {
            warn!(error = %err, "workspace: git is not available");
            return None;
        }
    };
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}

/// `https://host/owner/repo.git` and `git@host:owner/repo.git` both map to `owner/repo`.
/// Dots are allowed in both segments; the host is stripped before splitting.
pub(crate) fn repo_slug(remote_url: &str) -> Option<String> {
    let trimmed = remote_url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let path = match trimmed.split_once("://") {
        Some((_, rest)) => rest.split_once('/')?.1,
        // scp-like `user@host:path`; a colon after a slash belongs to a local path
        None => match trimmed.split_once(':') {
            Some((host, rest)) if !host.contains('/') => rest,
            _ => trimmed,
        },
    };
    let mut parts = path.rsplit('/').filter(|part| !part.is_empty());
    let repo = parts.next()?;
    let owner = parts.next()?;
    Some(format!("{owner}/{repo}"))
}

/// Creates `.huddle/config.json` under `root` unless it already exists.
/// With `force` an existing config is replaced. Returns the effective config.
pub async fn init_workspace(root: &Path, force: bool) -> Result<WorkspaceConfig> {
    let store = JsonFileStore::new(root);
    if !force {
        if let Some(existing) = store.read().await? {
            info!(path = %store.config_path().display(), "workspace: config already present");
            return Ok(existing);
        }
    }

    let git = detect_git_identity(root).await;
    let config = WorkspaceConfig {
        identity: git.identity,
        channel_id: git.channel_id,
        system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        ..WorkspaceConfig::default()
    };
    store.write(&config).await?;
    info!(
        path = %store.config_path().display(),
        identity = %config.identity,
        channel_id = %config.channel_id,
        "workspace: initialized config"
    );
    Ok(config)
}
