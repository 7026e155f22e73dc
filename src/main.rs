use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use nvr::{create_router, AppState, Config, FfmpegWriter, Supervisor};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "nvr", about = "RTSP network video recorder")]
struct Args {
    /// Path to the configuration file (extension resolved automatically;
    /// a `<path>.debug` file layers local overrides on top)
    #[arg(short, long, default_value = "config/nvr")]
    config: String,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;
    cfg.log_summary();

    if args.check {
        info!("Configuration OK");
        return Ok(());
    }

    std::fs::create_dir_all(&cfg.storage_root).with_context(|| {
        format!(
            "storage root {} is not writable; is the mount up?",
            cfg.storage_root.display()
        )
    })?;
    std::fs::create_dir_all(&cfg.log_path)
        .with_context(|| format!("cannot create log directory {}", cfg.log_path.display()))?;

    let writer = Arc::new(FfmpegWriter::new(
        cfg.ffmpeg_binary.clone(),
        cfg.log_path.clone(),
    ));
    let supervisor = Arc::new(Supervisor::start(&cfg, writer)?);

    let state = AppState::new(Arc::clone(&supervisor));
    let listener = tokio::net::TcpListener::bind((cfg.http.bind.as_str(), cfg.http.port))
        .await
        .with_context(|| format!("cannot bind status endpoint {}:{}", cfg.http.bind, cfg.http.port))?;
    info!("Status endpoint listening on {}", listener.local_addr()?);
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, create_router(state)).await {
            error!("Status endpoint failed: {}", e);
        }
    });

    shutdown_signal().await;
    info!("Shutdown signal received, stopping recorders...");

    supervisor.shutdown(cfg.shutdown_grace()).await;
    server.abort();

    info!("All recorders stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
