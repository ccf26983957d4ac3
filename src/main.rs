mod config;
mod error;
mod logging;
mod models;
mod services;
#[cfg(test)]
mod test_support;

use crate::config::Config;
use crate::services::Conductor;
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::watch;

/// 24/7 VJ/DJ broadcast pipeline: music + video clips + effects -> HLS.
#[derive(Parser, Debug)]
#[command(name = "vjpipeline", version, about)]
struct Cli {
    /// Path to the pipeline's TOML configuration document.
    #[arg(long, env = "PIPELINE_CONFIG", default_value = "pipeline.toml")]
    config: PathBuf,

    /// Enable debug-level logging.
    #[arg(short, long)]
    verbose: bool,

    /// Path to the log file (rotated at 10 MiB, 3 backups kept).
    #[arg(long, default_value = "pipeline.log")]
    log_file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_file, cli.verbose)?;

    tracing::info!("VJ/DJ pipeline starting");
    let config = Config::load(&cli.config)?;
    tracing::info!(music_dir = ?config.music_dir, "music library");
    tracing::info!(clips_dir = ?config.clips_dir, "clip library");
    tracing::info!(bumpers_dir = ?config.bumpers_dir, "bumper library");
    tracing::info!(hls_dir = ?config.hls_dir, "HLS output");

    let staging_dir = cli
        .config
        .parent()
        .unwrap_or_else(|| std::path::Path::new("."))
        .join("staging");
    let audio_fifo_path = staging_dir.join("audio_pipe");

    let mut conductor = Conductor::new(config, staging_dir, audio_fifo_path).await?;
    conductor.prepare().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(wait_for_shutdown_signal(shutdown_tx));

    conductor.run(shutdown_rx).await?;
    tracing::info!("pipeline exited cleanly");
    Ok(())
}

/// Wait for SIGTERM or SIGINT and signal the conductor to stop. Rust
/// ignores SIGPIPE by default, so a broken encoder pipe surfaces as an
/// `Err` on write rather than terminating the process (spec.md §6).
async fn wait_for_shutdown_signal(tx: watch::Sender<bool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
            _ = sigint.recv() => tracing::info!("received SIGINT"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received ctrl-c");
    }
    let _ = tx.send(true);
}
