//! Transfer server for the devlink live-update channel.
//!
//! Accepts any number of client connections over WebSocket, gives each
//! one a [`ClientId`], and exposes a push API on [`ClientHandle`]:
//! version checks, update manifests and package payloads. The server
//! keeps no transfer progress; every push is one complete frame and
//! recovery is left to the client's reconnect policy.

pub mod archive;
mod connection;
mod handler;
mod server;

pub use archive::pack_directory;
pub use connection::{ClientHandle, ClientId};
pub use handler::{Handler, HandlerFuture};
pub use server::{ServerConfig, TransferServer};

/// Outbound queue capacity per client.
///
/// A full update is one manifest plus one frame per package, so this
/// only needs headroom for a few overlapping pushes.
pub const SEND_BUFFER_SIZE: usize = 64;

/// Errors produced by the transfer server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame error: {0}")]
    Frame(#[from] devlink_protocol::FrameError),

    #[error("send failed: buffer full or connection closed")]
    SendFailed,

    #[error("server already running")]
    AlreadyRunning,
}
