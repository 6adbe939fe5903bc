//! Runs the update client and reports what it does.

use std::sync::Arc;

use devlink_update_client::{
    ClientEvent, ConnectionState, JsonVersionStore, NoticeKind, UpdateClient,
};

use crate::config::Config;
use crate::signal::Hangup;

/// Runs until Ctrl-C. SIGHUP is treated as the app returning to the
/// foreground.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let versions = Arc::new(JsonVersionStore::open(&config.versions_file)?);
    tracing::info!(path = %versions.path().display(), "version record opened");

    let (client, handle, mut events) =
        UpdateClient::new(config.client_config(), config.layout(), versions);
    let client_task = tokio::spawn(client.run());

    if !config.use_dev_server {
        tracing::warn!("use_dev_server is off; nothing will be received");
    }
    handle.connect().await;

    let mut hangup = Hangup::new()?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("SIGINT received, shutting down");
                break;
            }
            () = hangup.recv() => {
                tracing::info!("SIGHUP received, resuming");
                handle.resume().await;
            }
            event = events.recv() => match event {
                Some(event) => log_event(event),
                None => break,
            },
        }
    }

    handle.shutdown().await;
    client_task.await?;
    Ok(())
}

fn log_event(event: ClientEvent) {
    match event {
        ClientEvent::StateChanged(ConnectionState::Suspended) => {
            tracing::warn!("gave up reconnecting; send SIGHUP to retry");
        }
        ClientEvent::StateChanged(state) => tracing::info!(?state, "connection state"),
        ClientEvent::Notice(notice) => match notice.kind {
            NoticeKind::Success => tracing::info!(message = %notice.message, "notice"),
            NoticeKind::Failure => tracing::error!(message = %notice.message, "notice"),
        },
        ClientEvent::Reconnecting { attempt, delay } => {
            tracing::info!(attempt, ?delay, "reconnecting");
        }
        ClientEvent::AppUpdated {
            app_id,
            launch_options,
        } => {
            let page = launch_options.and_then(|o| o.page).unwrap_or_default();
            tracing::info!(app = %app_id, %page, "app updated, reload required");
        }
    }
}
