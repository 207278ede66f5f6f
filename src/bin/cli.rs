//! Position Watch CLI
//!
//! Local execution entry point.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use position_watch::{
    error::{AppError, Result},
    models::Config,
    pipeline::{self, Monitor, Trigger},
    services::{self, Notifier, TelegramNotifier},
    storage::{LocalStorage, StateStorage, StateStore},
};

/// Position Watch - trading position change alerts
#[derive(Parser, Debug)]
#[command(
    name = "position-watch",
    version,
    about = "Polls trading position tables and alerts on meaningful changes"
)]
struct Cli {
    /// Path to storage directory containing config and state files
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Config file (default: {storage_dir}/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Run every comparison but log alerts instead of sending them
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll on the configured trigger until interrupted
    Run,

    /// Run a single cycle and exit
    Once,

    /// Validate the configuration file
    Validate,

    /// Show persisted snapshot info
    Info,

    /// Forget stored snapshots so targets bootstrap again
    Reset {
        /// Only reset this target
        #[arg(long)]
        url: Option<String>,
    },
}

/// Initialize logging; `RUST_LOG` takes precedence.
fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Durable backend for the configured state file, if any.
fn state_backend(storage_dir: &Path, config: &Config) -> Option<Arc<dyn StateStorage>> {
    config
        .storage
        .state_file
        .as_deref()
        .map(str::trim)
        .filter(|file| !file.is_empty())
        .map(|file| Arc::new(LocalStorage::new(storage_dir.join(file))) as Arc<dyn StateStorage>)
}

async fn build_monitor(storage_dir: &Path, config: &Config) -> Result<Monitor> {
    let extractor = services::build_extractor(&config.extractor)?;

    let notifier: Option<Arc<dyn Notifier>> = if config.monitor.suppress_delivery {
        log::warn!("Alert delivery suppressed; alerts will only be logged");
        None
    } else {
        let telegram: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(&config.notifier)?);
        Some(telegram)
    };

    let store = match state_backend(storage_dir, config) {
        Some(backend) => StateStore::durable(backend).await,
        None => {
            log::warn!("No state file configured; state is kept in memory only");
            StateStore::in_memory()
        }
    };

    Ok(Monitor::new(config, extractor, notifier, store))
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.storage_dir.join("config.toml"));
    let loaded = Config::load(&config_path);

    let level = match (&loaded, cli.verbose) {
        (_, true) => "debug".to_string(),
        (Ok(config), false) => config.logging.level.clone(),
        (Err(_), false) => "info".to_string(),
    };
    init_logging(&level);

    let mut config = loaded.inspect_err(|e| log::error!("Cannot load configuration: {}", e))?;
    if cli.dry_run {
        config.monitor.suppress_delivery = true;
    }
    log::info!("Loaded configuration from {}", config_path.display());

    match cli.command {
        Command::Run => {
            config.validate()?;
            let trigger = Trigger::from_config(&config.trigger)?;
            let monitor = Arc::new(build_monitor(&cli.storage_dir, &config).await?);

            let count = monitor.targets().len();
            match &trigger {
                Trigger::Interval(interval) => {
                    log::info!("Watching {} targets every {:?}", count, interval)
                }
                Trigger::Cron(_) => log::info!(
                    "Watching {} targets on schedule '{}'",
                    count,
                    config.trigger.schedule.as_deref().unwrap_or_default()
                ),
            }
            pipeline::run_scheduled(
                monitor,
                trigger,
                config.trigger.run_on_start,
                config.monitor.shutdown_grace(),
                pipeline::shutdown_signal(),
            )
            .await?;
            log::info!("Stopped cleanly");
        }

        Command::Once => {
            config.validate()?;
            let monitor = build_monitor(&cli.storage_dir, &config).await?;

            let report = monitor.run_cycle().await;
            for target in report.targets() {
                log::info!(
                    "{}: {:?}, {} ({} alerts)",
                    target.url,
                    target.status,
                    target.event,
                    target.alerts
                );
            }
            monitor.shutdown().await?;
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!(
                "Config OK: {} targets, {:?} extractor",
                config.targets.len(),
                config.extractor.kind
            );
        }

        Command::Info => {
            log::info!("Storage directory: {}", cli.storage_dir.display());

            let Some(backend) = state_backend(&cli.storage_dir, &config) else {
                log::info!("No state file configured");
                return Ok(());
            };

            match backend.load().await? {
                Some(state) => {
                    log::info!("State file: {}", backend.describe());
                    if let Some(updated_at) = state.updated_at {
                        log::info!("Last updated: {}", updated_at);
                    }
                    for (url, snapshot) in &state.targets {
                        log::info!("  {} - {} open positions", url, snapshot.len());
                        for record in snapshot {
                            log::info!("    {}", record);
                        }
                    }
                    for target in &config.targets {
                        if !state.targets.contains_key(&target.url) {
                            log::info!("  {} - not initialized", target.url);
                        }
                    }
                }
                None => log::info!("No state found at {}", backend.describe()),
            }
        }

        Command::Reset { url } => {
            let backend = state_backend(&cli.storage_dir, &config)
                .ok_or_else(|| AppError::config("No state file configured; nothing to reset"))?;
            let mut store = StateStore::durable(backend).await;

            match url {
                Some(url) => {
                    if store.remove(&url).await {
                        log::info!("Reset {}", url);
                    } else {
                        log::warn!("No stored snapshot for {}", url);
                    }
                }
                None => {
                    let count = store.remove_all().await;
                    log::info!("Reset {} targets", count);
                }
            }
            store.flush().await?;
        }
    }

    Ok(())
}
