//! Tracklist HTTP Server
//!
//! Exposes presence recording and retention reports over HTTP.
//!
//! # Endpoints
//!
//! - `POST /track` - Record presence of an entity now
//! - `GET /retention` - Cohort retention report
//! - `GET /health` - Health check (PING through the pool)
//!
//! # CLI Commands
//!
//! - `start` - Start the HTTP server (default if no command specified)
//! - `check-config` - Validate configuration and print it with credentials redacted
//! - `purge` - Delete every bucket and composite under the configured namespace
//!
//! # Configuration
//!
//! The server reads configuration from:
//! 1. `--config <path>`
//! 2. `TRACKLIST_CONFIG` environment variable (path to TOML file)
//! 3. `./tracklist.toml` in current directory
//! 4. Default configuration
//!
//! Environment overrides (`TRACKLIST_REDIS_URL`, ...) are applied on top.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracklist::{
    config::ApplicationConfig,
    http::{self, AppState},
    redis::util::sanitize_url,
    RedisPool, Tracker,
};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

// =============================================================================
// CLI Definition
// =============================================================================

/// Tracklist - presence tracking on Redis bitmaps
#[derive(Parser)]
#[command(name = "tracklist-server")]
#[command(version)]
#[command(about = "Bitmap-backed presence tracking and cohort retention", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file (overrides TRACKLIST_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override listen address (e.g., 0.0.0.0:8080)
    #[arg(short, long, global = true)]
    listen: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Start,

    /// Validate configuration without starting the server
    CheckConfig {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete all tracked data under the configured namespace
    Purge {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
}

// =============================================================================
// Setup helpers
// =============================================================================

/// Resolve the config file and load it, falling back to defaults
fn load_config(cli: &Cli) -> CliResult<ApplicationConfig> {
    let path = cli
        .config
        .clone()
        .or_else(|| std::env::var_os("TRACKLIST_CONFIG").map(PathBuf::from))
        .or_else(|| {
            let local = PathBuf::from("tracklist.toml");
            local.exists().then_some(local)
        });

    let mut config = match path {
        Some(path) => ApplicationConfig::load(path)?,
        None => ApplicationConfig::from_env()?,
    };

    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen.clone();
        config.validate()?;
    }

    Ok(config)
}

fn init_tracing(config: &ApplicationConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn build_tracker(config: &ApplicationConfig) -> CliResult<Tracker> {
    let pool = Arc::new(RedisPool::new(config.redis_config())?);
    Ok(Tracker::new(pool, config.keyspace()?))
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {},
            Err(e) => {
                warn!(
                    error = %e,
                    "Ctrl+C handler installation failed - graceful shutdown unavailable"
                );
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                warn!(
                    error = %e,
                    "SIGTERM handler installation failed - SIGTERM shutdown unavailable"
                );
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

// =============================================================================
// CLI Command Handlers
// =============================================================================

/// Validate configuration and print summary
fn cmd_check_config(cli: &Cli, format: &str) -> CliResult<()> {
    let mut config = load_config(cli)?;
    config.redis.url = sanitize_url(&config.redis.url);

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    println!("Configuration is valid!");
    println!();
    println!("Server Settings:");
    println!("  Listen address: {}", config.server.listen_addr);
    println!("  Log level: {}", config.server.log_level);
    if config.server.cors_allowed_origins.is_empty() {
        println!("  CORS origins: any");
    } else {
        println!("  CORS origins: {}", config.server.cors_allowed_origins.join(", "));
    }
    println!();
    println!("Redis Settings:");
    println!("  URL: {}", config.redis.url);
    println!("  Max idle: {}", config.redis.max_idle);
    println!("  Max active: {}", config.redis.max_active);
    println!("  Idle timeout: {}s", config.redis.idle_timeout_secs);
    println!("  Connection timeout: {}s", config.redis.connection_timeout_secs);
    println!("  Command timeout: {}s", config.redis.command_timeout_secs);
    println!();
    println!("Tracking:");
    println!("  Namespace: {}", config.tracking.namespace);
    println!("  Default metric: {}", config.tracking.default_metric);

    Ok(())
}

/// Delete every key under the namespace
async fn cmd_purge(cli: &Cli, yes: bool) -> CliResult<()> {
    let config = load_config(cli)?;
    if !yes {
        return Err(format!(
            "refusing to delete namespace '{}' without --yes",
            config.tracking.namespace
        )
        .into());
    }

    init_tracing(&config);
    let tracker = build_tracker(&config)?;
    let deleted = tracker.delete_all_buckets().await?;
    println!(
        "Deleted {} keys under namespace '{}'",
        deleted, config.tracking.namespace
    );
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::CheckConfig { format }) => return cmd_check_config(&cli, format),
        Some(Commands::Purge { yes }) => return cmd_purge(&cli, *yes).await,
        Some(Commands::Start) | None => {},
    }

    let config = load_config(&cli)?;
    init_tracing(&config);

    info!("Starting Tracklist Server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        redis = %sanitize_url(&config.redis.url),
        namespace = %config.tracking.namespace,
        "Configuration loaded"
    );

    let tracker = build_tracker(&config)?;

    // The pool dials lazily; an unreachable store at startup is not fatal
    match tracker.pool().ping().await {
        Ok(latency) => info!(latency_us = latency.as_micros() as u64, "Redis reachable"),
        Err(e) => warn!(error = %e, "Redis not reachable at startup"),
    }

    let state = Arc::new(
        AppState::new(tracker.clone()).with_default_metric(config.tracking.default_metric.clone()),
    );
    let app = http::router(state, &config.server.cors_allowed_origins);

    let addr: SocketAddr = config.server.listen_addr.parse()?;
    info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    let metrics = tracker.pool().metrics();
    info!(
        commands = metrics.commands_executed,
        failures = metrics.command_failures,
        connections = metrics.connections_created,
        "Server shutdown complete"
    );
    Ok(())
}
