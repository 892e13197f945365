//! gatekeep - guardian daemon for delayed-authorization custody accounts
//!
//! Runs the guardian agent against the in-process ledger host:
//! - Deploys each watched account from its setup file
//! - Submits commands read as JSON lines from the command feed
//! - Scans watched accounts for pending operations
//! - Applies operations once their delay has passed
//! - Sends one out-of-band challenge per pending operation
//!
//! # Usage
//!
//! ```bash
//! GATEKEEP_CHALLENGE_SEED=<hex> gatekeep --config /etc/gatekeep/config.toml < commands.jsonl
//! ```

use gatekeep::config::Config;
use gatekeep::errors::{GatekeepError, Result};
use gatekeep::guardian::{self, AccountRegistry, ChallengeCodes, Guardian, LogChannel};
use gatekeep::ledger::{open_account, run_command_feed, InMemoryLedger};
use gatekeep::policy::PolicyFile;
use gatekeep::vault::SystemClock;
use std::env;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = config_path_arg();
    let config = Config::load(config_path.as_deref())?;

    init_logging(&config.logging.level, &config.logging.format);
    info!("Starting gatekeep v{}", VERSION);

    config.validate()?;
    info!("Configuration loaded");

    let clock = Arc::new(SystemClock);
    let ledger = Arc::new(InMemoryLedger::new(clock.clone()));
    let registry = Arc::new(AccountRegistry::new());

    let policies = config
        .ledger
        .policy_file
        .as_deref()
        .map(|path| PolicyFile::load(Path::new(path)))
        .transpose()?;

    for watched in config.watched_accounts()? {
        let setup = watched.setup()?;
        if let Err(e) = open_account(&ledger, watched.address, &setup, policies.as_ref()) {
            warn!("Could not open account {}: {}", watched.address, e);
        }
        registry.register(
            watched.address,
            &watched.recipient,
            watched.owner_subject.as_deref(),
        )?;
    }
    info!("Watching {} accounts", registry.count());

    if let Some(source) = &config.ledger.command_feed {
        let reader = open_feed(source).await?;
        let feed_ledger = ledger.clone();
        let source = source.clone();
        tokio::spawn(async move {
            if let Err(e) = run_command_feed(feed_ledger.as_ref(), reader).await {
                error!("Command feed {} failed: {}", source, e);
            }
        });
    }

    let codes = Arc::new(ChallengeCodes::new(
        Config::challenge_seed()?,
        config.guardian.challenge_bucket_secs,
    ));
    let settings = config.guardian_settings()?;
    info!("Guardian identity {} in {:?} mode", settings.identity, settings.mode);

    let guardian = Arc::new(Guardian::new(
        ledger,
        registry,
        codes,
        Arc::new(LogChannel),
        clock,
        settings,
    ));

    let mut notices = guardian.notices().subscribe();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => debug!("Guardian notice: {:?}", notice),
                Err(RecvError::Lagged(n)) => warn!("Dropped {} guardian notices", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let handle = guardian::start(
        guardian,
        config.poll_interval(),
        config.guardian.command_capacity,
    );

    shutdown_signal().await;

    if let Err(e) = handle.stop().await {
        error!("Guardian did not stop cleanly: {}", e);
    }
    info!("Guardian shut down gracefully");
    Ok(())
}

/// `--config <path>` from the command line
fn config_path_arg() -> Option<String> {
    let args: Vec<String> = env::args().collect();
    args.iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .cloned()
}

/// Command feed reader: `-` for stdin, otherwise a file
async fn open_feed(source: &str) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if source == "-" {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let file = tokio::fs::File::open(source)
        .await
        .map_err(|e| GatekeepError::ConfigError(format!("command feed {}: {}", source, e)))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
