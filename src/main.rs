use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::BufReader;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate::config::{LogFormat, TollgateConfig};
use tollgate::ratelimit::{spawn_cleanup_task, RateLimiter, SystemClock};
use tollgate::sidecar;

/// Rate limit decisions over stdin/stdout.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "TOLLGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format (overrides the configuration file)
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = TollgateConfig::load(cli.config.as_deref())?;
    init_tracing(&config.logging.level, cli.log_format.unwrap_or(config.logging.format));

    info!("Starting Tollgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        policies = config.policies.policies.len(),
        cleanup_interval_secs = config.cleanup.interval_secs,
        "Configuration loaded"
    );

    let limiter = RateLimiter::with_policies(config.policies.clone(), Arc::new(SystemClock));
    let cleanup = spawn_cleanup_task(
        limiter.clone(),
        config.cleanup.interval(),
        config.cleanup.max_age(),
    );

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    // Logs go to stderr so stdout carries only decisions.
    tokio::select! {
        stats = sidecar::run(&limiter, stdin, stdout) => {
            let stats = stats?;
            info!(admitted = stats.admitted, denied = stats.denied, "Sidecar finished");
        }
        _ = shutdown_signal() => {}
    }

    cleanup.shutdown().await;
    info!("Tollgate stopped");
    Ok(())
}

fn init_tracing(default_level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.with_thread_ids(true).init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
