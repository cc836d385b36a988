use std::{collections::HashSet, sync::Arc};

use anyhow::Result;
use shared::domain::{Identity, RosterEntry, RosterUpdate, WorkspaceConfig};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::WorkspaceStore;

/// Durable identity -> display metadata mapping, layered on a [`WorkspaceStore`].
///
/// Every mutation is a read-modify-write of the whole workspace document and
/// runs under a single writer lock, so concurrent registrations of different
/// identities all land in the final document. Reads go straight to the store
/// so administrative edits made elsewhere are picked up.
pub struct RosterStore {
    store: Arc<dyn WorkspaceStore>,
    writer: Mutex<()>,
}

impl RosterStore {
    pub fn new(store: Arc<dyn WorkspaceStore>) -> Self {
        Self {
            store,
            writer: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn WorkspaceStore> {
        &self.store
    }

    /// Current workspace document, or an empty one when nothing is stored yet.
    pub async fn config(&self) -> Result<WorkspaceConfig> {
        Ok(self.store.read().await?.unwrap_or_default())
    }

    pub async fn entries(&self) -> Result<Vec<RosterEntry>> {
        Ok(self.config().await?.team)
    }

    pub async fn lookup(&self, identity: &Identity) -> Result<Option<RosterEntry>> {
        Ok(self.config().await?.roster_entry(identity).cloned())
    }

    /// Returns the stored entry for `identity`, creating it from `defaults`
    /// only when absent. Existing metadata is never overwritten.
    pub async fn merge(&self, identity: &Identity, defaults: RosterUpdate) -> Result<RosterEntry> {
        let _guard = self.writer.lock().await;
        let mut config = self.config().await?;
        if let Some(existing) = config.roster_entry(identity) {
            return Ok(existing.clone());
        }

        let entry = RosterEntry {
            identity: identity.clone(),
            display_name: defaults.display_name,
            style_prompt: defaults.style_prompt,
        };
        config.team.push(entry.clone());
        self.store.write(&config).await?;
        info!(identity = %identity, "roster: registered member");
        Ok(entry)
    }

    /// Registers every identity not yet on the roster with empty metadata and
    /// returns the entries for `identities` in the given order. Performs at
    /// most one write.
    pub async fn merge_present(&self, identities: &[Identity]) -> Result<Vec<RosterEntry>> {
        let _guard = self.writer.lock().await;
        let mut config = self.config().await?;

        let mut known: HashSet<Identity> = config
            .team
            .iter()
            .map(|entry| entry.identity.clone())
            .collect();
        let mut added = 0usize;
        for identity in identities {
            if known.insert(identity.clone()) {
                config.team.push(RosterEntry::new(identity.clone()));
                added += 1;
            }
        }

        if added > 0 {
            self.store.write(&config).await?;
            info!(added, total = config.team.len(), "roster: auto-registered present members");
        } else {
            debug!("roster: presence snapshot contained no new members");
        }

        Ok(identities
            .iter()
            .filter_map(|identity| config.roster_entry(identity).cloned())
            .collect())
    }

    /// Administrative edit; creates the entry when it does not exist yet.
    pub async fn update(&self, identity: &Identity, fields: RosterUpdate) -> Result<RosterEntry> {
        let _guard = self.writer.lock().await;
        let mut config = self.config().await?;
        let index = match config
            .team
            .iter()
            .position(|entry| &entry.identity == identity)
        {
            Some(index) => index,
            None => {
                config.team.push(RosterEntry::new(identity.clone()));
                config.team.len() - 1
            }
        };

        let entry = &mut config.team[index];
        if let Some(display_name) = fields.display_name {
            entry.display_name = Some(display_name).filter(|name| !name.trim().is_empty());
        }
        if let Some(style_prompt) = fields.style_prompt {
            entry.style_prompt = Some(style_prompt).filter(|prompt| !prompt.trim().is_empty());
        }
        let updated = entry.clone();
        self.store.write(&config).await?;
        info!(identity = %identity, "roster: member updated");
        Ok(updated)
    }

    /// Finds a member by identity or display name, ignoring ASCII case.
    pub async fn find_member(&self, name: &str) -> Result<Option<RosterEntry>> {
        let needle = name.trim();
        if needle.is_empty() {
            return Ok(None);
        }
        let team = self.entries().await?;
        let exact = team.iter().find(|entry| entry.identity.as_str() == needle);
        if let Some(entry) = exact {
            return Ok(Some(entry.clone()));
        }
        Ok(team.into_iter().find(|entry| {
            entry.identity.as_str().eq_ignore_ascii_case(needle)
                || entry
                    .display_name
                    .as_deref()
                    .is_some_and(|display| display.eq_ignore_ascii_case(needle))
        }))
    }
}

#[cfg(test)]
#[path = "tests/roster_tests.rs"]
mod tests;
