//! Routes decoded frames to the version, manifest and file handlers.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tracing::{debug, trace, warn};

use devlink_protocol::{ClientMessage, FileHeader, Header, UpdateManifest, VersionCheck, decode};

use crate::updater::{InstallOutcome, Updater};

/// What became of one binary message.
#[derive(Debug)]
pub(crate) enum Dispatched {
    /// Malformed, unsolicited or stale; nothing changed.
    Dropped,
    /// Handled inline.
    Handled,
    /// A package is unpacking on its own task.
    Installing(JoinHandle<InstallOutcome>),
}

/// Frame router owned by the receive context.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    updater: Updater,
    outbound: mpsc::Sender<tungstenite::Message>,
}

impl Dispatcher {
    pub(crate) fn new(updater: Updater, outbound: mpsc::Sender<tungstenite::Message>) -> Self {
        Self { updater, outbound }
    }

    pub(crate) async fn handle_frame(&self, data: &[u8]) -> Dispatched {
        let frame = match decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("dropping frame: {e}");
                return Dispatched::Dropped;
            }
        };

        let header = match Header::parse(frame.header) {
            Ok(header) => header,
            Err(e) => {
                debug!("dropping frame: {e}");
                return Dispatched::Dropped;
            }
        };

        trace!(header = frame.header, bytes = frame.body.len(), "frame received");
        match header {
            Header::CheckVersion => self.on_check_version(frame.body),
            Header::Update => self.on_update(frame.body).await,
            Header::File(file) => self.on_file(file, frame.body).await,
        }
    }

    fn on_check_version(&self, body: &[u8]) -> Dispatched {
        let check: VersionCheck = match serde_json::from_slice(body) {
            Ok(check) => check,
            Err(e) => {
                debug!("bad version check body: {e}");
                return Dispatched::Dropped;
            }
        };

        let version = self.updater.local_version(&check.app_id);
        let reply = ClientMessage::Version { version };
        let json = match serde_json::to_string(&reply) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to encode version reply: {e}");
                return Dispatched::Dropped;
            }
        };

        debug!(app = %check.app_id, "answering version check");
        if let Err(e) = self
            .outbound
            .try_send(tungstenite::Message::Text(json.into()))
        {
            warn!("failed to queue version reply: {e}");
        }
        Dispatched::Handled
    }

    async fn on_update(&self, body: &[u8]) -> Dispatched {
        let manifest: UpdateManifest = match serde_json::from_slice(body) {
            Ok(manifest) => manifest,
            Err(e) => {
                debug!("bad update manifest: {e}");
                return Dispatched::Dropped;
            }
        };

        self.updater.apply_manifest(manifest).await;
        Dispatched::Handled
    }

    async fn on_file(&self, header: FileHeader, body: &[u8]) -> Dispatched {
        match self.updater.accept_file(header, body).await {
            Some(job) => Dispatched::Installing(tokio::spawn(job.run())),
            None => Dispatched::Dropped,
        }
    }
}
