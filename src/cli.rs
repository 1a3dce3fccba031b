//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the application using the
//! `clap` crate. These arguments are parsed at startup and then merged with
//! the configuration from the `groupwatch.toml` file and environment variables.

use clap::Parser;
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// Relays group departure notices to notification groups.
#[derive(Parser, Debug, Default, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Logging level (e.g. "info", "debug").
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Path of the registry state file.
    #[arg(long, value_name = "FILE")]
    pub state_path: Option<PathBuf>,

    /// Number of event worker tasks.
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Base URL of the OneBot HTTP API.
    #[arg(long, value_name = "URL")]
    pub api_url: Option<String>,

    /// URL of the OneBot forward WebSocket.
    #[arg(long, value_name = "URL")]
    pub ws_url: Option<String>,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        if let Some(concurrency) = self.concurrency {
            dict.insert("concurrency".into(), Value::from(concurrency as u64));
        }

        let mut state = Dict::new();
        if let Some(path) = &self.state_path {
            state.insert(
                "path".into(),
                Value::from(path.to_string_lossy().into_owned()),
            );
        }
        if !state.is_empty() {
            dict.insert("state".into(), Value::from(state));
        }

        let mut onebot = Dict::new();
        if let Some(url) = &self.api_url {
            onebot.insert("api_url".into(), Value::from(url.clone()));
        }
        if let Some(url) = &self.ws_url {
            onebot.insert("ws_url".into(), Value::from(url.clone()));
        }
        if !onebot.is_empty() {
            dict.insert("onebot".into(), Value::from(onebot));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
