//! devlink update agent entry point.
//!
//! Usage: `devlink-agent [CONFIG]`. Send SIGHUP to reconnect immediately
//! (the foreground-resume path), Ctrl-C to stop.

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
        "starting devlink update agent"
    );

    let config = config::Config::load(std::env::args_os().nth(1).map(Into::into))?;
    tracing::info!(
        enabled = config.use_dev_server,
        host = %config.host,
        port = config.port,
        apps_root = %config.apps_root.display(),
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("agent shut down cleanly");
    Ok(())
}
