use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::{Parser, Subcommand};
use shared::domain::{Identity, RosterUpdate};
use storage::{JsonFileStore, RosterStore, SqliteStore, WorkspaceStore};
use tracing_subscriber::EnvFilter;

mod admin;

use admin::{export_config, format_roster};

#[derive(Parser, Debug)]
#[command(name = "huddle-admin", about = "Roster administration for a huddle workspace")]
struct Cli {
    #[arg(long, default_value = ".")]
    workspace: PathBuf,
    /// Operate on a SQLite store instead of `.huddle/config.json`.
    #[arg(long)]
    database_url: Option<String>,
    /// Row key inside the SQLite store; defaults to the workspace channel id.
    #[arg(long)]
    workspace_id: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    List,
    /// Set a member's display name or style prompt. An empty value clears it.
    Set {
        #[arg(long)]
        identity: String,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long)]
        style_prompt: Option<String>,
    },
    /// Copy the JSON workspace config into the SQLite store.
    ExportSqlite {
        #[arg(long, default_value = "sqlite://./.huddle/huddle.db")]
        database_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let json_store = Arc::new(JsonFileStore::new(&cli.workspace));

    match &cli.command {
        Command::ExportSqlite { database_url } => {
            let workspace_id =
                resolve_workspace_id(cli.workspace_id.clone(), json_store.as_ref()).await?;
            let sqlite = SqliteStore::new(database_url, workspace_id.clone()).await?;
            let members = export_config(json_store.as_ref(), &sqlite).await?;
            println!("exported {members} member(s) to {database_url} as '{workspace_id}'");
        }
        Command::List => {
            let roster = open_roster(&cli, json_store).await?;
            println!("{}", format_roster(&roster.entries().await?));
        }
        Command::Set {
            identity,
            display_name,
            style_prompt,
        } => {
            let roster = open_roster(&cli, json_store).await?;
            let entry = roster
                .update(
                    &Identity::new(identity.trim()),
                    RosterUpdate {
                        display_name: display_name.clone(),
                        style_prompt: style_prompt.clone(),
                    },
                )
                .await?;
            println!("{}", format_roster(std::slice::from_ref(&entry)));
        }
    }

    Ok(())
}

async fn resolve_workspace_id(
    explicit: Option<String>,
    json_store: &JsonFileStore,
) -> Result<String> {
    if let Some(id) = explicit.filter(|id| !id.trim().is_empty()) {
        return Ok(id);
    }
    let channel_id = json_store
        .read()
        .await?
        .map(|config| config.channel_id)
        .filter(|channel_id| !channel_id.trim().is_empty());
    Ok(channel_id.unwrap_or_else(|| "default".to_string()))
}

async fn open_roster(cli: &Cli, json_store: Arc<JsonFileStore>) -> Result<RosterStore> {
    let store: Arc<dyn WorkspaceStore> = match &cli.database_url {
        Some(database_url) => {
            let workspace_id =
                resolve_workspace_id(cli.workspace_id.clone(), json_store.as_ref()).await?;
            Arc::new(SqliteStore::new(database_url, workspace_id).await?)
        }
        None => json_store,
    };
    Ok(RosterStore::new(store))
}
