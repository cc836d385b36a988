use std::{fs, path::Path};

use anyhow::Context;
use channel_transport::DEFAULT_HISTORY_CAPACITY;
use serde::Deserialize;
use tracing::warn;

pub const SETTINGS_FILE_NAME: &str = "relay.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub bind_addr: String,
    /// Shared channel credential; tokens signed with anything else are refused.
    pub channel_secret: String,
    pub history_capacity: usize,
    pub token_leeway_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8787".into(),
            channel_secret: "devsecret".into(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            token_leeway_seconds: 30,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    bind_addr: Option<String>,
    channel_secret: Option<String>,
    history_capacity: Option<usize>,
    token_leeway_seconds: Option<u64>,
}

/// Defaults, then `relay.toml` in the working directory, then the environment.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();
    if let Err(err) = apply_file(&mut settings, Path::new(SETTINGS_FILE_NAME)) {
        warn!(error = %err, "relay: ignoring settings file");
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());
    settings
}

pub fn apply_file(settings: &mut Settings, path: &Path) -> anyhow::Result<()> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    let file_cfg: FileSettings =
        toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))?;

    if let Some(v) = file_cfg.bind_addr {
        settings.bind_addr = v;
    }
    if let Some(v) = file_cfg.channel_secret {
        settings.channel_secret = v;
    }
    if let Some(v) = file_cfg.history_capacity {
        settings.history_capacity = v;
    }
    if let Some(v) = file_cfg.token_leeway_seconds {
        settings.token_leeway_seconds = v;
    }
    Ok(())
}

/// `APP__*` wins over the older `HUDDLE_*` names when both are set.
pub fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("HUDDLE_RELAY_BIND") {
        settings.bind_addr = v;
    }
    if let Some(v) = lookup("APP__BIND_ADDR") {
        settings.bind_addr = v;
    }

    if let Some(v) = lookup("HUDDLE_CHANNEL_SECRET") {
        settings.channel_secret = v;
    }
    if let Some(v) = lookup("APP__CHANNEL_SECRET") {
        settings.channel_secret = v;
    }

    if let Some(v) = lookup("APP__HISTORY_CAPACITY") {
        match v.parse::<usize>() {
            Ok(parsed) if parsed > 0 => settings.history_capacity = parsed,
            _ => warn!(value = %v, "relay: ignoring invalid APP__HISTORY_CAPACITY"),
        }
    }

    if let Some(v) = lookup("APP__TOKEN_LEEWAY_SECONDS") {
        match v.parse::<u64>() {
            Ok(parsed) => settings.token_leeway_seconds = parsed,
            Err(_) => warn!(value = %v, "relay: ignoring invalid APP__TOKEN_LEEWAY_SECONDS"),
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
