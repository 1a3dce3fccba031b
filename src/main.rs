//! GroupWatch - group departure notifier
//!
//! Watches OneBot group-decrease notices for monitored groups and relays a
//! formatted alert to the mapped notification group.

use anyhow::Result;
use clap::Parser;
use groupwatch::{
    app::{forward_shutdown_signal, App},
    cli::Cli,
    config::Config,
};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            // Logging is not configured yet; fall back to a default subscriber.
            tracing_subscriber::fmt().init();
            error!("Failed to load configuration: {:#}", err);
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("GroupWatch starting up...");
    info!("-------------------- Configuration --------------------");
    info!("Log Level: {}", config.log_level);
    info!("Concurrency: {}", config.concurrency);
    info!("Platform: {}", config.platform);
    info!("Admins: {}", config.admins.len());
    info!("OneBot API: {}", config.onebot.api_url);
    info!("OneBot WebSocket: {}", config.onebot.ws_url);
    info!(
        "Access Token: {}",
        if config.onebot.access_token.is_some() {
            "Configured"
        } else {
            "Not configured"
        }
    );
    info!("Command Prefix: {}", config.commands.prefix);
    info!("State File: {}", config.state.path.display());
    info!("-------------------------------------------------------");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = App::builder(config).build(shutdown_rx).await?;

    tokio::spawn(forward_shutdown_signal(
        tokio::signal::ctrl_c(),
        shutdown_tx,
    ));

    app.run().await?;
    info!("All tasks shut down. Exiting.");
    Ok(())
}
