//! mysql-switchboard - MySQL proxy that picks its upstream from the login
//!
//! Clients log in with credentials from the backend catalog and are relayed
//! to that backend, or with the fallback credentials and are answered by a
//! local stub.

use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use mysql_switchboard::{config, Catalog, CredentialSet, Listener, Result};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Parser)]
#[command(name = "mysql-switchboard")]
#[command(version)]
#[command(about = "MySQL proxy that selects the upstream server from the login credentials")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "SWITCHBOARD_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override listen address
    #[arg(long)]
    listen_address: Option<String>,

    /// Override listen port
    #[arg(long)]
    port: Option<u16>,

    /// Override the fallback username
    #[arg(long)]
    user: Option<String>,

    /// Override the fallback password
    #[arg(long)]
    passwd: Option<String>,

    /// Enable verbose/debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A missing file is only tolerated at the default path
    let config_missing = cli.config == Path::new(DEFAULT_CONFIG_PATH) && !cli.config.exists();
    let mut config = if config_missing {
        config::load_config_from_str("")?
    } else {
        config::load_config(&cli.config)?
    };

    // Priority: --verbose flag, then RUST_LOG env var, then the config file
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone())
    };
    tracing_subscriber::fmt().with_env_filter(&log_level).init();

    info!("Starting mysql-switchboard v{}", env!("CARGO_PKG_VERSION"));
    if config_missing {
        warn!("{:?} not found, using defaults", cli.config);
    } else {
        info!("Loaded configuration from {:?}", cli.config);
    }

    // Apply CLI overrides
    if let Some(addr) = cli.listen_address {
        config.listen.address = addr;
    }
    if let Some(port) = cli.port {
        config.listen.port = port;
    }
    if let Some(user) = cli.user {
        config.fallback.username = user;
    }
    if let Some(passwd) = cli.passwd {
        config.fallback.password = passwd;
    }
    config.validate().map_err(mysql_switchboard::ProxyError::Config)?;

    let catalog = Arc::new(Catalog::new(config.servers.clone()));
    for problem in catalog.check() {
        warn!("{}", problem);
    }
    let credentials = Arc::new(CredentialSet::build(
        &catalog,
        &config.fallback.username,
        &config.fallback.password,
    ));
    info!(
        "{} backend(s), {} user(s) accepted, fallback user '{}'",
        catalog.servers().len(),
        credentials.len(),
        config.fallback.username
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let listener = Listener::bind(&config, catalog, credentials, shutdown_rx).await?;
    let stats = listener.stats();

    let listener_handle = tokio::spawn(async move {
        if let Err(e) = listener.run().await {
            error!("Listener error: {}", e);
        }
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    let _ = shutdown_tx.send(());
    let _ = listener_handle.await;

    info!(
        "Shutdown complete. Total connections handled: {}",
        stats
            .connections_accepted
            .load(std::sync::atomic::Ordering::Relaxed)
    );

    Ok(())
}

/// Resolves on SIGTERM; never resolves where it cannot be installed.
async fn terminate() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }
    std::future::pending::<()>().await;
}
