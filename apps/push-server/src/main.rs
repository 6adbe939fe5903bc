//! devlink push server entry point.
//!
//! Usage: `devlink-push [CONFIG]`. Without an argument the platform
//! config file is used, and created with defaults if missing.

mod app;
mod config;
mod signal;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting devlink push server"
    );

    let config = config::Config::load(std::env::args_os().nth(1).map(Into::into))?;
    anyhow::ensure!(!config.app_id.is_empty(), "app_id is not configured");
    tracing::info!(
        app = %config.app_id,
        version = %config.version,
        app_dir = %config.app_dir.display(),
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("push server shut down cleanly");
    Ok(())
}
