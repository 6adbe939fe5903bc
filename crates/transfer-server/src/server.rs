//! Transfer WebSocket server.
//!
//! Listens on a TCP port, upgrades every accepted connection to
//! WebSocket and keeps one registry entry per connected client.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async_with_config;
use tokio_util::sync::CancellationToken;

use devlink_protocol::constants::{DEFAULT_HOST, DEFAULT_PORT, WS_MAX_MESSAGE_SIZE};

use crate::ServerError;
use crate::connection::{self, ClientHandle, ClientId, Registry};
use crate::handler::Handler;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind; `0.0.0.0` exposes the server on the LAN.
    pub host: String,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// The transfer server.
///
/// Holds the set of open client connections and hands each new client
/// to the [`Handler`]. No transfer state is kept per client.
pub struct TransferServer<H: Handler> {
    config: ServerConfig,
    handler: Arc<H>,
    clients: Registry,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
    running: AtomicBool,
}

impl<H: Handler> TransferServer<H> {
    pub fn new(config: ServerConfig, handler: H) -> Arc<Self> {
        Arc::new(Self {
            config,
            handler: Arc::new(handler),
            clients: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Handles for every connected client.
    pub async fn clients(&self) -> Vec<ClientHandle> {
        self.clients
            .lock()
            .await
            .values()
            .map(|c| c.handle())
            .collect()
    }

    pub async fn client(&self, id: &ClientId) -> Option<ClientHandle> {
        self.clients.lock().await.get(id).map(|c| c.handle())
    }

    /// Closes one client connection. Returns `false` if it was unknown.
    pub async fn disconnect(&self, id: &ClientId) -> bool {
        match self.clients.lock().await.get(id) {
            Some(conn) => {
                conn.close();
                true
            }
            None => false,
        }
    }

    /// Gracefully shuts down the server and every connection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the accept loop until [`shutdown`](Self::shutdown).
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("transfer server listening on {local_addr}");

        let result = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("server shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::error!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        };

        self.running.store(false, Ordering::SeqCst);
        result
    }

    /// Upgrades a TCP connection to WebSocket and registers the client.
    async fn handle_connection(
        self: &Arc<Self>,
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let ws_stream = accept_async_with_config(stream, Some(ws_config)).await?;

        let client = connection::spawn_connection(
            ws_stream,
            peer_addr,
            Arc::clone(&self.handler),
            Arc::clone(&self.clients),
            self.cancel.clone(),
        )
        .await;
        tracing::info!(%peer_addr, client = %client.id(), "client connected");

        self.handler.on_client_connected(client).await;
        Ok(())
    }
}
