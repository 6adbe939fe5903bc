//! Update client for the devlink live-update channel.
//!
//! Owns the socket lifecycle (connect, reconnect with linear backoff,
//! heartbeat, foreground resume), decodes incoming frames and drives a
//! per-application update state machine that collects package archives
//! until an update is complete, unpacks them in place and signals
//! [`ClientEvent::AppUpdated`].

pub mod client;
mod dispatch;
pub mod layout;
mod pumps;
pub mod reconnection;
pub mod types;
mod unpack;
mod updater;
pub mod versions;

pub use client::{ClientHandle, UpdateClient};
pub use layout::PackageLayout;
pub use reconnection::ReconnectPolicy;
pub use types::{ClientConfig, ClientEvent, ConnectionState, Notice, NoticeKind};
pub use versions::{JsonVersionStore, MemoryVersionStore, StoreError, VersionStore};

/// Errors from installing a received package.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unpack failed: {0}")]
    Unpack(std::io::Error),

    #[error("bad package archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("unpack worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Transport errors on the client socket.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connection timed out")]
    Timeout,
}
