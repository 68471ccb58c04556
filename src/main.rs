//! Avantis Bridge
//!
//! Show-control bridge for the Allen & Heath Avantis mixer over MIDI/TCP.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use avantis_bridge::cli;
use avantis_bridge::config::{AppConfig, ConfigWatcher};
use avantis_bridge::drivers::{AvantisDriver, Driver};
use avantis_bridge::monitor;
use avantis_bridge::paths::AppPaths;
use avantis_bridge::transport::TcpTransport;

/// Avantis Bridge - control an Allen & Heath Avantis over MIDI/TCP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Console host, overriding the configuration file
    #[arg(long, env = "AVANTIS_HOST")]
    host: Option<String>,

    /// Print inbound console traffic and exit on Ctrl+C
    #[arg(long)]
    monitor: bool,

    /// Also write logs to a daily file in the logs directory
    #[arg(long)]
    log_file: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let paths = AppPaths::detect();
    paths.ensure_directories()?;

    let _log_guard = init_logging(&args.log_level, args.log_file.then_some(&paths))?;

    info!("Starting Avantis Bridge v{}...", env!("CARGO_PKG_VERSION"));
    info!(
        "Paths: {} ({})",
        paths.base_dir().display(),
        if paths.is_portable { "portable" } else { "installed" }
    );

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| paths.config.to_string_lossy().to_string());
    info!("Configuration file: {}", config_path);

    let (config_watcher, initial_config) = ConfigWatcher::new(config_path).await?;
    let config = with_overrides((*initial_config).clone(), &args);
    info!("Configuration loaded successfully with hot-reload enabled");

    if args.monitor {
        return monitor::run_monitor(&config).await;
    }

    run_app(config, config_watcher, &args).await?;

    info!("Avantis Bridge shutdown complete");
    Ok(())
}

async fn run_app(config: AppConfig, mut config_watcher: ConfigWatcher, args: &Args) -> Result<()> {
    let transport = Arc::new(TcpTransport::new(config.transport.options()));
    let driver = Arc::new(AvantisDriver::new(
        config.console.clone(),
        config.sync.plan(),
        transport,
    )?);

    driver.init().await?;
    info!(
        "Connecting to Avantis at {}:{} (MIDI channel {})",
        config.console.host, config.console.port, config.console.base_midi_channel
    );

    let mut repl = tokio::spawn(cli::run_repl(Arc::clone(&driver)));

    loop {
        tokio::select! {
            Some(new_config) = config_watcher.next_config() => {
                info!("📝 Configuration file changed, reloading...");
                if new_config.transport != config.transport {
                    warn!("Transport timing changes take effect after a restart");
                }
                match driver.apply_config(&with_overrides(new_config, args)).await {
                    Ok(()) => info!("✅ Configuration reloaded"),
                    Err(e) => warn!("⚠️  Failed to reload config (keeping old config): {:#}", e),
                }
            }

            result = &mut repl => {
                match result {
                    Ok(Ok(())) => info!("REPL closed"),
                    Ok(Err(e)) => warn!("REPL failed: {:#}", e),
                    Err(e) => warn!("REPL task panicked: {}", e),
                }
                break;
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Shutting down...");
    driver.shutdown().await?;
    Ok(())
}

fn with_overrides(mut config: AppConfig, args: &Args) -> AppConfig {
    if let Some(host) = &args.host {
        config.console.host = host.clone();
    }
    config
}

fn init_logging(level: &str, file_paths: Option<&AppPaths>) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (file_layer, guard) = match file_paths {
        Some(paths) => {
            let appender = tracing_appender::rolling::daily(&paths.logs_dir, "avantis-bridge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(file_layer)
        .init();

    Ok(guard)
}
