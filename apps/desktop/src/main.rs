use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    publish_once, resolve_recipient, OutgoingMessage, RelayConnector, SyncClient, SyncError,
    DEFAULT_CONNECT_TIMEOUT,
};
use serde_json::json;
use shared::domain::Recipient;
use storage::{init_workspace, JsonFileStore, RosterStore};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod console;

use console::{parse_input, render_event};

const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:8787";

#[derive(Parser, Debug)]
#[command(name = "huddle", about = "Team chat for a shared workspace")]
struct Cli {
    /// Workspace root holding `.huddle/config.json`.
    #[arg(long, default_value = ".")]
    workspace: PathBuf,
    /// Overrides `relay_url` from the workspace config.
    #[arg(long)]
    relay_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the workspace config from git metadata.
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Publish one message and exit.
    Send {
        #[arg(long)]
        to: String,
        #[arg(long)]
        content: String,
        #[arg(long)]
        code: Option<String>,
        #[arg(long)]
        agent: bool,
    },
    /// Stay connected, print traffic, send lines typed on stdin.
    Watch,
    /// Print the system prompt and team list as JSON.
    Team,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    match cli.command {
        Command::Init { force } => {
            let config = init_workspace(&cli.workspace, force).await?;
            let store = JsonFileStore::new(&cli.workspace);
            println!(
                "workspace config at {} (identity={}, channel={})",
                store.config_path().display(),
                config.identity,
                config.channel_id
            );
            if config.credential.trim().is_empty() {
                println!("set `credential` in the config before connecting");
            }
        }
        Command::Send {
            to,
            content,
            code,
            agent,
        } => {
            let (roster, connector) = open_relay(&cli.workspace, cli.relay_url).await?;
            let recipient = match resolve_recipient(&roster, &to).await {
                Ok(recipient) => recipient,
                Err(SyncError::UnknownRecipient { name, known }) => {
                    anyhow::bail!(
                        "no team member matches '{name}'; known members: {}",
                        known.join(", ")
                    );
                }
                Err(err) => return Err(err.into()),
            };
            let mut outgoing = OutgoingMessage::new(recipient.clone(), content);
            outgoing.code = code;
            outgoing.is_agent = agent;
            // one-shot publish; a running `watch` keeps its session and connected marker
            let id = publish_once(&connector, &roster, outgoing, DEFAULT_CONNECT_TIMEOUT).await?;
            println!("sent {id} to {recipient}");
        }
        Command::Watch => {
            let (roster, connector) = open_relay(&cli.workspace, cli.relay_url).await?;
            let client = SyncClient::new(Arc::new(connector), roster);
            watch(Arc::new(client)).await?;
        }
        Command::Team => {
            let store = Arc::new(JsonFileStore::new(&cli.workspace));
            let config = RosterStore::new(store).config().await?;
            let team = json!({
                "system_prompt": config.system_prompt,
                "team": config.team,
            });
            println!("{}", serde_json::to_string_pretty(&team)?);
        }
    }

    Ok(())
}

async fn open_relay(
    workspace: &Path,
    relay_override: Option<String>,
) -> Result<(Arc<RosterStore>, RelayConnector)> {
    let store = Arc::new(JsonFileStore::new(workspace));
    let roster = Arc::new(RosterStore::new(store));
    let config = roster
        .config()
        .await
        .context("failed to read workspace config; run `huddle init` first")?;
    let relay_url = relay_override
        .or(config.relay_url)
        .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string());
    info!(%relay_url, "huddle: using relay");
    Ok((roster, RelayConnector::new(relay_url)))
}

async fn watch(client: Arc<SyncClient>) -> Result<()> {
    let mut events = client.subscribe_events();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(line) = render_event(&event) {
                        println!("{line}");
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "huddle: dropped events while printing");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    client.connect().await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line(), if stdin_open => {
                // keep watching after stdin closes; only Ctrl-C ends the session
                let Some(line) = line? else {
                    stdin_open = false;
                    continue;
                };
                let Some(input) = parse_input(&line) else { continue };
                let recipient = match input.to {
                    Some(name) => match client.resolve_recipient(&name).await {
                        Ok(recipient) => recipient,
                        Err(err) => {
                            eprintln!("! {err}");
                            continue;
                        }
                    },
                    None => Recipient::All,
                };
                // failures are already rendered from the SendFailed event
                let _ = client.send(OutgoingMessage::new(recipient, input.content)).await;
            }
        }
    }

    client.disconnect().await?;
    printer.abort();
    Ok(())
}
