//! # Dune Buffer Service
//!
//! Keeps the latest results of a Dune query in memory and serves them over
//! HTTP.
//!
//! ## Execution Flow:
//! 1.  Load configuration (`.env`, defaults, JSON file, environment, CLI).
//! 2.  Install console + rolling JSON file logging.
//! 3.  Wire fetcher → pipeline → buffer, and the manual trigger.
//! 4.  Bind the listener, kick off the initial refresh in the background and
//!     install the recurring schedule. The schedule is installed whether or
//!     not the initial refresh succeeds.
//! 5.  Serve until Ctrl-C / SIGTERM, then stop the scheduler.
//!
//! Upstream failures never bring the process down; only bad configuration or
//! an unbindable port does, at startup.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use lib_common::configs::{ConfigFile, load_config};
use lib_common::core::{Buffer, ManualTrigger, RefreshPipeline, RefreshScheduler};
use lib_common::loggers::setup_logging;
use lib_common::query::{QueryState, router, serve};
use lib_common::retrieve::{DuneSource, DuneSourceConfig, UpstreamFetcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- Phase 1: Configuration ---
    let loaded = load_config()?;
    let settings = loaded
        .config
        .into_settings()
        .context("Invalid service configuration")?;

    // --- Phase 2: Logging ---
    // Held until main returns so buffered file output is flushed.
    let _log_guard = setup_logging(&settings.log_dir, &settings.log_level, "server_buffer")?;

    match &loaded.file {
        ConfigFile::Loaded(path) => info!("Loaded config file {}", path.display()),
        ConfigFile::NotFound(path) => info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            path.display()
        ),
    }

    // --- Phase 3: Core wiring ---
    let mut dune = DuneSourceConfig::new(&settings.dune_query_id, &settings.dune_api_key);
    dune.base_url = settings.dune_base_url.clone();
    dune.limit = settings.result_limit;

    let source = Arc::new(DuneSource::new(dune).context("Invalid Dune source settings")?);
    let fetcher = UpstreamFetcher::with_default_policy(source);
    let pipeline = RefreshPipeline::new(fetcher, Arc::new(Buffer::new()));
    let trigger = ManualTrigger::new(settings.api_key.clone(), pipeline.clone());

    if !trigger.requires_secret() {
        warn!("API_KEY is not set; POST /refresh is open to anyone");
    }

    // --- Phase 4: Listener, initial refresh, schedule ---
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Dune Buffer Service running on port {}", settings.port);

    let initial = pipeline.clone();
    tokio::spawn(async move {
        info!("Performing initial data fetch...");
        match initial.refresh().await {
            Ok(_) => info!("Initial data fetch completed"),
            Err(e) => error!("Failed to initialize data: {}", e),
        }
    });

    let mut scheduler = RefreshScheduler::new(pipeline).await?;
    scheduler.init(&settings.refresh_cron).await?;

    // --- Phase 5: Serve ---
    let app = router(QueryState::new(trigger));
    serve_then_stop(serve(listener, app, shutdown_signal()), &mut scheduler).await?;

    info!("Shutdown complete.");
    Ok(())
}

/// Runs the server to completion, then shuts the scheduler down whether or
/// not serving failed. A serving error wins over a shutdown error.
async fn serve_then_stop<F>(serving: F, scheduler: &mut RefreshScheduler) -> anyhow::Result<()>
where
    F: Future<Output = std::io::Result<()>>,
{
    let served = serving.await;
    if let Err(e) = &served {
        error!("Server error: {}", e);
    }

    let stopped = scheduler.shutdown().await;
    served.context("HTTP server failed")?;
    stopped?;
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
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
        _ = ctrl_c => info!("Ctrl-C received, initiating shutdown."),
        _ = terminate => info!("SIGTERM received, initiating shutdown."),
    }
}
