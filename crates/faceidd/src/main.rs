use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;
mod console;
mod engine;
mod session;

use config::Config;
use session::SessionController;

#[derive(Parser)]
#[command(name = "faceidd", about = "Face verification station", version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "FACEID_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    tracing::info!(
        gallery = %config.gallery_dir.display(),
        model = ?config.model_kind,
        detection = config.detection_threshold,
        verification = config.verification_threshold,
        "faceidd starting"
    );

    let engine = engine::spawn_engine(&config).context("failed to start verification engine")?;
    let session = SessionController::new(engine.handle, engine.frames, config.session_timings());

    tracing::info!("faceidd ready; press Enter to verify");

    tokio::select! {
        res = console::run(&session) => res.context("console input failed")?,
        res = tokio::signal::ctrl_c() => {
            res?;
            tracing::info!("interrupted");
        }
    }

    tracing::info!("faceidd shutting down");
    engine.pump.stop();

    Ok(())
}
