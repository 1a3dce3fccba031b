//! Configuration management for GroupWatch
//!
//! This module defines the main `Config` struct and its sub-structs,
//! responsible for holding all application settings. It uses the `figment`
//! crate to layer defaults, a `groupwatch.toml` file, environment variables
//! and command-line arguments.

use crate::cli::Cli;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

pub const DEFAULT_CONFIG_FILE: &str = "groupwatch.toml";

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// The logging level for the application.
    pub log_level: String,
    /// Number of concurrent event worker tasks.
    pub concurrency: usize,
    /// The platform tag inbound events must carry to be considered.
    pub platform: String,
    /// User ids allowed to run admin commands.
    #[serde(deserialize_with = "deserialize_ids")]
    pub admins: Vec<String>,
    /// Connection settings for the OneBot endpoint.
    pub onebot: OneBotConfig,
    /// Admin command settings.
    pub commands: CommandConfig,
    /// Where the registry is persisted.
    pub state: StateConfig,
}

/// Connection settings for a OneBot v11 implementation.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct OneBotConfig {
    /// Base URL of the HTTP API.
    pub api_url: String,
    /// URL of the forward WebSocket event endpoint.
    pub ws_url: String,
    /// Optional access token, sent as a bearer token.
    pub access_token: Option<String>,
    /// Timeout for HTTP API calls in milliseconds.
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CommandConfig {
    /// Text that must precede a command name.
    pub prefix: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StateConfig {
    /// Path of the JSON state file.
    pub path: PathBuf,
}

impl Config {
    /// Loads the application configuration by layering all sources.
    ///
    /// The TOML file is optional; a missing file leaves the defaults in place.
    pub fn load(cli: &Cli) -> Result<Self> {
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            // Allow overriding with environment variables, e.g., GROUPWATCH_ONEBOT__API_URL=...
            .merge(Env::prefixed("GROUPWATCH_").split("__"))
            .merge(cli.clone())
            .extract()?;
        Ok(config)
    }
}

// Provide a default implementation for tests and easy setup.
impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            concurrency: 4,
            platform: "aiocqhttp".to_string(),
            admins: vec![],
            onebot: OneBotConfig {
                api_url: "http://127.0.0.1:5700".to_string(),
                ws_url: "ws://127.0.0.1:6700".to_string(),
                access_token: None,
                timeout_ms: 10_000,
            },
            commands: CommandConfig {
                prefix: "/".to_string(),
            },
            state: StateConfig {
                path: PathBuf::from("groupwatch_state.json"),
            },
        }
    }
}

/// Accepts ids written either as numbers or as strings.
fn deserialize_ids<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Number(i64),
        Text(String),
    }

    let ids = Vec::<Id>::deserialize(deserializer)?;
    Ok(ids
        .into_iter()
        .map(|id| match id {
            Id::Number(n) => n.to_string(),
            Id::Text(s) => s.trim().to_string(),
        })
        .filter(|id| !id.is_empty())
        .collect())
}
