use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use shared::domain::WorkspaceConfig;
use tokio::sync::RwLock;

mod file_store;
mod roster;
mod sqlite_store;
mod workspace;

pub use file_store::{JsonFileStore, CONFIG_FILE_NAME, CONNECTED_MARKER_NAME, WORKSPACE_DIR_NAME};
pub use roster::RosterStore;
pub use sqlite_store::SqliteStore;
pub use workspace::{detect_git_identity, init_workspace, GitIdentity, DEFAULT_SYSTEM_PROMPT};

/// Durable home of one workspace's configuration document.
///
/// Implementations only offer whole-document reads and writes; callers that
/// need read-modify-write must serialize it themselves (see [`RosterStore`]).
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    async fn read(&self) -> Result<Option<WorkspaceConfig>>;
    async fn write(&self, config: &WorkspaceConfig) -> Result<()>;
    /// Records whether a live channel session currently exists for this workspace.
    async fn set_connected_marker(&self, connected: bool) -> Result<()>;
    async fn connected_marker(&self) -> Result<bool>;
}

/// Process-local store, used by tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    config: RwLock<Option<WorkspaceConfig>>,
    connected: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: WorkspaceConfig) -> Self {
        Self {
            config: RwLock::new(Some(config)),
            ..Self::default()
        }
    }

    /// Number of completed `write` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkspaceStore for MemoryStore {
    async fn read(&self) -> Result<Option<WorkspaceConfig>> {
        Ok(self.config.read().await.clone())
    }

    async fn write(&self, config: &WorkspaceConfig) -> Result<()> {
        *self.config.write().await = Some(config.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_connected_marker(&self, connected: bool) -> Result<()> {
        self.connected.store(connected, Ordering::SeqCst);
        Ok(())
    }

    async fn connected_marker(&self) -> Result<bool> {
        Ok(self.connected.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
