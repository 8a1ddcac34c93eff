use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use windowguard::config::{LogFormat, LoggingConfig, ServiceConfig};
use windowguard::http::{AdmissionControl, HttpServer};
use windowguard::ratelimit::RateLimiter;

/// Per-client admission control in front of HTTP routes.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "WINDOWGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Override the log format
    #[arg(long, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    match s {
        "pretty" => Ok(LogFormat::Pretty),
        "json" => Ok(LogFormat::Json),
        other => Err(format!("unknown log format {:?} (expected pretty or json)", other)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ServiceConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }

    init_tracing(&config.logging);

    info!("Starting Windowguard admission control");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        listen_addr = %config.server.listen_addr,
        window_duration_ms = config.rate_limiting.window_duration_ms,
        max_requests_per_window = config.rate_limiting.max_requests_per_window,
        identity = ?config.identity,
        "Configuration loaded"
    );

    let limiter = Arc::new(RateLimiter::new(config.rate_limiting.clone())?);
    let extractor = config.identity.build()?;
    let admission = Arc::new(AdmissionControl::new(limiter, extractor));
    info!("Rate limiter initialized");

    HttpServer::new(config.server.listen_addr, admission)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("Windowguard stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init(),
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
