//! IdSync daemon entry point.
//!
//! Loads configuration, initializes logging, builds the provisioning engine
//! and runs it either once or on a schedule until a shutdown signal arrives.

mod scheduler;
mod signals;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use idsync_core::config::{AppConfig, LoggingConfig};
use idsync_core::notify::Notifier;
use idsync_core::DirectorySyncEngine;

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// IdSync provisioning daemon.
#[derive(Parser, Debug)]
#[command(
    name = "idsync-daemon",
    version,
    about = "One-way user provisioning from Azure AD into FreeIPA"
)]
struct Args {
    /// Path to the TOML configuration file. A sample is written here if it
    /// does not exist.
    #[arg(short, long, default_value = "idsync.toml")]
    config: PathBuf,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Run a single provisioning pass and exit.
    #[arg(long)]
    once: bool,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if !args.config.exists() {
        AppConfig::write_sample(&args.config).context("failed to write sample configuration")?;
        eprintln!(
            "No configuration found. A sample was written to {}; edit it and start again.",
            args.config.display()
        );
        return Ok(());
    }

    // Parse first so the logging section can configure the subscriber; secrets
    // are resolved afterwards so their warnings are recorded.
    let config =
        AppConfig::load_from_file(&args.config).context("failed to load configuration file")?;

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.logging.level)
        .to_string();
    let _log_guard = init_tracing(&log_level, &config.logging)?;

    info!(path = %args.config.display(), "configuration loaded");
    let config = resolve_config(config)?;

    // Startup banner
    info!("========================================");
    info!("  IdSync Daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Config file   : {}", args.config.display());
    info!("Tenant        : {}", config.source.tenant_id);
    info!("LDAP server   : {}", config.target.url());
    info!("Users DN      : {}", config.target.users_dn());
    info!("Interval      : {}s", config.sync.interval_secs);
    info!("Log level     : {}", log_level);
    info!("========================================");

    let engine = Arc::new(
        DirectorySyncEngine::from_config(&config).context("failed to initialize sync engine")?,
    );
    let notifier = Arc::new(Notifier::new(&config.notifications));
    if !notifier.is_configured() {
        info!("email notifications disabled");
    }

    let interval = std::time::Duration::from_secs(config.sync.interval_secs);
    let sched = Arc::new(scheduler::Scheduler::new(engine, notifier, interval));

    if args.once {
        sched
            .run_cycle()
            .await
            .context("provisioning pass failed")?;
        return Ok(());
    }

    // Create a shutdown notify for cooperative cancellation
    let shutdown = Arc::new(tokio::sync::Notify::new());
    let scheduler_shutdown = shutdown.clone();
    let task_sched = sched.clone();
    let scheduler_handle = tokio::spawn(async move {
        task_sched.run(scheduler_shutdown).await;
    });

    signals::wait_for_shutdown().await;
    info!("Shutdown signal received, stopping...");
    shutdown.notify_one();

    // Wait for the scheduler to finish its current cycle (up to 30s)
    match tokio::time::timeout(std::time::Duration::from_secs(30), scheduler_handle).await {
        Ok(Ok(())) => info!("scheduler stopped gracefully"),
        Ok(Err(e)) => warn!("scheduler task error: {}", e),
        Err(_) => warn!("scheduler did not stop within 30s, forcing shutdown"),
    }

    let stats = sched.stats();
    info!(
        cycles = stats.total_cycles.load(Ordering::SeqCst),
        created = stats.total_created.load(Ordering::SeqCst),
        errors = stats.total_errors.load(Ordering::SeqCst),
        "IdSync daemon stopped."
    );
    Ok(())
}

/// Resolve `*_env` secrets and validate the configuration.
fn resolve_config(mut config: AppConfig) -> Result<AppConfig> {
    config
        .resolve_env_vars()
        .context("failed to resolve environment variables in config")?;
    config
        .validate()
        .context("configuration validation failed")?;
    Ok(config)
}

/// Install the global subscriber: stdout always, plus a daily-rotated file
/// when a log directory is configured. The returned guard flushes the file
/// writer and must live until exit.
fn init_tracing(level: &str, logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match logging.directory {
        Some(ref dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "idsync.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false),
        )
        .with(file_layer)
        .init();

    Ok(guard)
}
