//! Feed relay - timing feed to device API forwarder
//!
//! Polls the timing feed once a second, drops events already forwarded
//! within their dedup span, and posts the rest for allow-listed devices.
//!
//! Module structure:
//! - `domain/` - Feed rows, event classification, shared types
//! - `io/` - External interfaces (feed, device directory, downstream API, status HTTP)
//! - `services/` - Poller, dedup windows, forwarder, allow-list
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use feed_relay::infra::{Config, Metrics};
use feed_relay::io::{DirectoryClient, DownstreamClient, FeedClient};
use feed_relay::services::{AllowList, AllowListRefresher, Forwarder, Poller};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Feed relay - forwards timing device events downstream
#[derive(Parser, Debug)]
#[command(name = "feed-relay", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for per-row and per-tick visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "feed-relay starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        feed_url = %config.feed_url(),
        query_tz = %config.query_tz(),
        event_tz = %config.event_tz(),
        downstream_url = %config.downstream_url(),
        poll_interval_ms = config.poll_interval().as_millis() as u64,
        passing_window_secs = config.passing_window().as_secs(),
        status_window_secs = config.status_window().as_secs(),
        max_in_flight = config.max_in_flight(),
        device_type = %config.device_type(),
        server_port = %config.server_port(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create shared components
    let metrics = Arc::new(Metrics::new());
    let allow_list = Arc::new(AllowList::new());

    let directory = DirectoryClient::new(&config).context("Failed to build directory client")?;
    let downstream =
        DownstreamClient::new(&config).context("Failed to build downstream client")?;
    let feed = FeedClient::new(&config).context("Failed to build feed client")?;

    // Start allow-list refresher (first refresh runs immediately)
    let refresher =
        Arc::new(AllowListRefresher::new(directory, allow_list.clone(), metrics.clone()));
    let refresh_interval = config.allow_list_refresh_interval();
    let refresher_task = refresher.clone();
    let refresher_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        refresher_task.run(refresh_interval, refresher_shutdown).await;
    });

    // Start status HTTP server (if port > 0)
    let server_port = config.server_port();
    if server_port > 0 {
        let server_metrics = metrics.clone();
        let server_refresher = refresher.clone();
        let server_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = feed_relay::io::status_server::start_status_server(
                server_port,
                server_metrics,
                server_refresher,
                server_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "status_server_error");
            }
        });
    }

    // Start metrics reporter (lock-free reads with full summary)
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    let forwarder = Forwarder::new(
        downstream,
        allow_list,
        metrics.clone(),
        config.max_in_flight(),
        config.downstream_timeout(),
    );
    let mut poller = Poller::new(feed, forwarder, &config, metrics);

    // Run poller until shutdown
    poller.run(config.poll_interval(), shutdown_rx).await;

    info!("feed-relay shutdown complete");
    Ok(())
}
