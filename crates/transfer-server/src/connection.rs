//! Client connection management: read/write pumps, keepalive, push API.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use devlink_protocol::constants::{
    HEARTBEAT_PAYLOAD, TAG_CHECK_VERSION, TAG_UPDATE, WS_IDLE_TIMEOUT, WS_MAX_MESSAGE_SIZE,
    WS_PING_PERIOD,
};
use devlink_protocol::{ClientMessage, FileHeader, PackageKind, UpdateManifest, VersionCheck};

use crate::handler::Handler;
use crate::{SEND_BUFFER_SIZE, ServerError};

/// Identity of one accepted client connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    pub(crate) fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle for pushing frames to one client.
///
/// Cloneable and cheap; wraps an `mpsc::Sender`. Every send builds the
/// frame synchronously and queues it without waiting for delivery.
#[derive(Clone)]
pub struct ClientHandle {
    id: ClientId,
    remote_addr: SocketAddr,
    tx: mpsc::Sender<WsMessage>,
}

impl ClientHandle {
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Returns `true` if the outbound channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Asks the client to report its development version of `app_id`.
    pub fn send_version_check(&self, app_id: &str) -> Result<(), ServerError> {
        let body = serde_json::to_vec(&VersionCheck {
            app_id: app_id.to_string(),
        })?;
        self.send_frame(TAG_CHECK_VERSION, &body)
    }

    /// Announces the packages the client should expect for an app.
    pub fn send_manifest(&self, manifest: &UpdateManifest) -> Result<(), ServerError> {
        let body = serde_json::to_vec(manifest)?;
        self.send_frame(TAG_UPDATE, &body)
    }

    /// Sends one package archive keyed by `<appId>---<version>---<package>`.
    ///
    /// Fails with [`ServerError::Frame`] if the composite key does not fit
    /// the header slot.
    pub fn send_file_payload(
        &self,
        app_id: &str,
        version: &str,
        package: PackageKind,
        bytes: &[u8],
    ) -> Result<(), ServerError> {
        let header = FileHeader {
            app_id: app_id.to_string(),
            version: version.to_string(),
            package: package.as_str().to_string(),
        };
        self.send_frame(&header.to_header_string(), bytes)
    }

    /// Encodes and queues a raw frame.
    pub fn send_frame(&self, header: &str, body: &[u8]) -> Result<(), ServerError> {
        let frame = devlink_protocol::encode(header, body)?;
        tracing::debug!(client = %self.id, header, bytes = frame.len(), "pushing frame");
        self.tx
            .try_send(WsMessage::Binary(frame.into()))
            .map_err(|_| {
                tracing::warn!(client = %self.id, "send buffer full or closed, dropping frame");
                ServerError::SendFailed
            })
    }
}

/// Live connections keyed by client id.
pub(crate) type Registry = Arc<Mutex<HashMap<ClientId, ClientConnection>>>;

/// Active connection to a client.
pub(crate) struct ClientConnection {
    handle: ClientHandle,
    cancel: CancellationToken,
}

impl ClientConnection {
    pub(crate) fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    pub(crate) fn close(&self) {
        self.cancel.cancel();
    }
}

/// Starts the pumps for an upgraded WebSocket and registers the client.
///
/// The connection removes itself from `registry` and notifies the
/// handler once its read pump exits.
pub(crate) async fn spawn_connection<S, H>(
    ws_stream: S,
    remote_addr: SocketAddr,
    handler: Arc<H>,
    registry: Registry,
    server_cancel: CancellationToken,
) -> ClientHandle
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
    H: Handler,
{
    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let cancel = server_cancel.child_token();
    let handle = ClientHandle {
        id: ClientId::generate(),
        remote_addr,
        tx,
    };

    registry.lock().await.insert(
        handle.id.clone(),
        ClientConnection {
            handle: handle.clone(),
            cancel: cancel.clone(),
        },
    );

    let (ws_sink, ws_stream) = ws_stream.split();

    tokio::spawn(write_pump(ws_sink, rx, cancel.clone()));

    let read_handle = handle.clone();
    tokio::spawn(async move {
        read_pump(ws_stream, read_handle.clone(), handler.clone(), cancel.clone()).await;
        // When read pump exits, cancel the write pump too.
        cancel.cancel();
        registry.lock().await.remove(&read_handle.id);
        tracing::info!(client = %read_handle.id, "client disconnected");
        handler.on_client_disconnected(read_handle.id.clone()).await;
    });

    handle
}

/// Write pump: drains the send channel and sends WS pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping_interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        if let Err(e) = sink.send(ws_msg).await {
                            tracing::error!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::error!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    // Best-effort close frame.
    let _ = sink.close().await;
}

/// Read pump: handles client text messages until the socket goes away.
///
/// Any incoming message resets the idle deadline; the client heartbeat
/// and pong replies both count.
async fn read_pump<S, H>(mut stream: S, client: ClientHandle, handler: Arc<H>, cancel: CancellationToken)
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
    H: Handler,
{
    let idle_deadline = tokio::time::sleep(WS_IDLE_TIMEOUT);
    tokio::pin!(idle_deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut idle_deadline => {
                tracing::warn!(client = %client.id, "idle timeout, closing connection");
                break;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(ws_msg)) => {
                        idle_deadline.as_mut().reset(tokio::time::Instant::now() + WS_IDLE_TIMEOUT);
                        match ws_msg {
                            WsMessage::Text(text) => {
                                if text.len() > WS_MAX_MESSAGE_SIZE {
                                    tracing::error!("message exceeds max size ({} > {})", text.len(), WS_MAX_MESSAGE_SIZE);
                                    continue;
                                }
                                dispatch_text(&handler, &client, &text).await;
                            }
                            WsMessage::Ping(data) => {
                                let _ = client.tx.try_send(WsMessage::Pong(data));
                            }
                            WsMessage::Close(_) => {
                                tracing::info!(client = %client.id, "received close frame");
                                break;
                            }
                            // Clients never send frames upstream.
                            WsMessage::Binary(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
                        }
                    }
                    Some(Err(e)) => {
                        tracing::error!(client = %client.id, "read pump error: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

/// Routes a client text message to the handler.
async fn dispatch_text<H: Handler>(handler: &Arc<H>, client: &ClientHandle, text: &str) {
    if text == HEARTBEAT_PAYLOAD {
        tracing::trace!(client = %client.id, "heartbeat");
        return;
    }

    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Version { version }) => {
            handler.on_version_reply(client.clone(), version).await;
        }
        Err(e) => {
            tracing::warn!(client = %client.id, "ignoring unrecognised client message: {e}");
        }
    }
}
