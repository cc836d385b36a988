use anyhow::{anyhow, Result};
use shared::domain::RosterEntry;
use storage::WorkspaceStore;
use tracing::info;

/// One member per line: identity, display name, style prompt, tab separated.
pub fn format_roster(entries: &[RosterEntry]) -> String {
    entries
        .iter()
        .map(|entry| {
            format!(
                "{}\t{}\t{}",
                entry.identity,
                entry.display_name.as_deref().unwrap_or("-"),
                entry.style_prompt.as_deref().unwrap_or("-"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Copies the workspace config from `source` into `target` and returns the
/// number of roster entries carried over.
pub async fn export_config(
    source: &dyn WorkspaceStore,
    target: &dyn WorkspaceStore,
) -> Result<usize> {
    let config = source
        .read()
        .await?
        .ok_or_else(|| anyhow!("no workspace config to export; run `huddle init` first"))?;
    target.write(&config).await?;
    info!(members = config.team.len(), "admin: exported workspace config");
    Ok(config.team.len())
}

#[cfg(test)]
#[path = "tests/admin_tests.rs"]
mod tests;
