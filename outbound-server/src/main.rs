//! The Outbound HTTP edge.
//!
//! Thin by design: configuration, observability, the Prometheus recorder
//! and the router live here; everything else is `outbound-core`.

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use outbound_core::config::OutboundConfig;
use outbound_core::observability;
use outbound_core::runtime::CoreRuntime;
use outbound_server::routes::{self, AppState};
use std::sync::Arc;
use tracing::{info, warn};

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "outbound-server", about = "Sales-outreach automation backend")]
struct Args {
    /// Path to the configuration file.
    #[arg(long, default_value = "outbound.toml")]
    config: String,

    /// Override the bind address.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init()?;
    let args = Args::parse();

    let mut config = OutboundConfig::load_from(&args.config)?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    let bind = config.server.bind.clone();

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!(error = %err, "metrics recorder not installed");
            None
        }
    };

    let runtime = Arc::new(CoreRuntime::build(config).await?);
    runtime.start();

    let state = AppState {
        runtime: Arc::clone(&runtime),
        metrics,
    };
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("cannot bind {bind}"))?;
    info!(bind = %bind, "outbound server listening");

    let shutdown_runtime = Arc::clone(&runtime);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            shutdown_runtime.shutdown().await;
        })
        .await?;

    Ok(())
}

/// Wait for ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => warn!(error = %err, "cannot install SIGTERM handler"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
