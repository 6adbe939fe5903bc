//! Wires the transfer server to the configured bundle.

use std::sync::Arc;

use devlink_protocol::{LaunchOptions, PackageKind, UpdateManifest};
use devlink_transfer_server::{
    ClientHandle, Handler, HandlerFuture, ServerConfig, TransferServer, pack_directory,
};

use crate::config::Config;
use crate::signal::Hangup;

/// Runs the push server until Ctrl-C. SIGHUP re-pushes the bundle to every
/// connected client.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let server_config = ServerConfig {
        host: config.host.clone(),
        port: config.port,
    };
    let server = TransferServer::new(
        server_config,
        PushHandler {
            config: Arc::clone(&config),
        },
    );

    let server_run = Arc::clone(&server);
    let server_task = tokio::spawn(async move { server_run.run().await });

    let port = loop {
        if server_task.is_finished() {
            server_task.await??;
            anyhow::bail!("server stopped before binding");
        }
        let p = server.port().await;
        if p > 0 {
            break p;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    };
    tracing::info!(host = %config.host, port, "waiting for devices");

    let mut hangup = Hangup::new()?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("SIGINT received, shutting down");
                break;
            }
            () = hangup.recv() => {
                let clients = server.clients().await;
                tracing::info!(clients = clients.len(), "SIGHUP received, pushing bundle");
                for client in clients {
                    if let Err(e) = push_update(&client, &config).await {
                        tracing::error!(client = %client.id(), "push failed: {e:#}");
                    }
                }
            }
        }
    }

    server.shutdown();
    server_task.await??;
    Ok(())
}

struct PushHandler {
    config: Arc<Config>,
}

impl Handler for PushHandler {
    fn on_client_connected(&self, client: ClientHandle) -> HandlerFuture<'_> {
        Box::pin(async move {
            tracing::info!(client = %client.id(), addr = %client.remote_addr(), "device connected");
            if let Err(e) = client.send_version_check(&self.config.app_id) {
                tracing::warn!(client = %client.id(), "version check not sent: {e}");
            }
        })
    }

    fn on_version_reply(&self, client: ClientHandle, version: String) -> HandlerFuture<'_> {
        Box::pin(async move {
            if version == self.config.version {
                tracing::info!(client = %client.id(), %version, "device is up to date");
                return;
            }

            tracing::info!(
                client = %client.id(),
                device = %version,
                serving = %self.config.version,
                "device is outdated"
            );
            if let Err(e) = push_update(&client, &self.config).await {
                tracing::error!(client = %client.id(), "push failed: {e:#}");
            }
        })
    }
}

/// Sends the manifest followed by every package it lists.
async fn push_update(client: &ClientHandle, config: &Config) -> anyhow::Result<()> {
    let app_dir = config.app_dir.clone();
    let sdk_dir = config.sdk_dir.clone();
    let (app, sdk) = tokio::task::spawn_blocking(move || -> std::io::Result<_> {
        let app = pack_directory(&app_dir)?;
        let sdk = sdk_dir.as_deref().map(pack_directory).transpose()?;
        Ok((app, sdk))
    })
    .await??;

    let manifest = build_manifest(config, sdk.is_some());
    client.send_manifest(&manifest)?;
    client.send_file_payload(&config.app_id, &config.version, PackageKind::App, &app)?;
    if let Some(sdk) = &sdk {
        client.send_file_payload(&config.app_id, &config.version, PackageKind::Sdk, sdk)?;
    }

    tracing::info!(
        client = %client.id(),
        files = ?manifest.files,
        app_bytes = app.len(),
        sdk_bytes = sdk.as_ref().map_or(0, Vec::len),
        "bundle pushed"
    );
    Ok(())
}

fn build_manifest(config: &Config, with_sdk: bool) -> UpdateManifest {
    let mut files = vec![PackageKind::App.to_string()];
    if with_sdk {
        files.push(PackageKind::Sdk.to_string());
    }

    UpdateManifest {
        app_id: config.app_id.clone(),
        files,
        version: config.version.clone(),
        launch_options: config.launch_page.as_ref().map(|page| LaunchOptions {
            page: Some(page.clone()),
            ..LaunchOptions::default()
        }),
    }
}
