//! Pan camera daemon binary.

use pancam_daemon::{logging, metrics, DaemonConfig, Emitter, Runner};
use pancam_models::{ProtocolFormat, Record};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    let _ = rustls::crypto::ring::default_provider().install_default();

    dotenvy::dotenv().ok();
    logging::init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting pancam-daemon");

    let config = match DaemonConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            // The configured protocol may be the thing that failed to parse.
            let protocol = std::env::var("PANCAM_PROTOCOL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(ProtocolFormat::Text);
            error!(error = %e, "Invalid configuration");
            Emitter::stdout(protocol).emit(&Record::Error(e.to_string()));
            std::process::exit(1);
        }
    };
    info!(mode = %config.mode, protocol = ?config.protocol, "Config loaded");

    if let Some(addr) = config.metrics_addr {
        metrics::init_exporter(addr);
    }

    let emitter = Emitter::stdout(config.protocol);
    let runner = match Runner::new(config, emitter.clone()).await {
        Ok(runner) => runner,
        Err(e) => {
            error!(error = %e, "Startup failed");
            emitter.emit(&Record::Error(e.to_string()));
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    if let Err(e) = runner.run(shutdown_rx).await {
        error!(error = %e, fatal = e.is_fatal(), "Daemon stopped");
        emitter.emit(&Record::Error(e.to_string()));
        std::process::exit(1);
    }

    info!("Daemon shutdown complete");
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            tokio::signal::ctrl_c().await.ok();
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}
