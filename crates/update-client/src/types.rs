//! Public types for the update client.

use std::time::Duration;

use devlink_protocol::LaunchOptions;
use devlink_protocol::constants::{
    DEFAULT_HOST, DEFAULT_PORT, MAX_RECONNECT_ATTEMPTS, RECONNECT_STEP,
};

/// Connection state of the dev channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Socket handshake in progress.
    Connecting,
    Open,
    /// Reconnect budget exhausted; waits for a foreground resume.
    Suspended,
}

/// Severity of a user-visible notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Failure,
}

/// A message meant for the user rather than the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Failure,
            message: message.into(),
        }
    }
}

/// Events emitted by the update client to the host process.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    StateChanged(ConnectionState),
    /// Should be shown to the user.
    Notice(Notice),
    /// A reconnect is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// An app's update finished unpacking; the host should reload it.
    AppUpdated {
        app_id: String,
        launch_options: Option<LaunchOptions>,
    },
}

/// Connection settings for the dev channel.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Nothing connects unless this is set.
    pub use_dev_server: bool,
    pub host: String,
    pub port: u16,
    pub reconnect_step: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            use_dev_server: false,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            reconnect_step: RECONNECT_STEP,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ClientConfig {
    pub fn url(&self) -> String {
        let host = if self.host.is_empty() {
            DEFAULT_HOST
        } else {
            self.host.as_str()
        };
        format!("ws://{host}:{}", self.port)
    }
}
