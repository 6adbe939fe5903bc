//! Application-level heartbeat sent while the connection is open.

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use devlink_protocol::constants::{HEARTBEAT_PAYLOAD, HEARTBEAT_PERIOD};

/// Queues a text `"ping"` every [`HEARTBEAT_PERIOD`] until cancelled.
///
/// Nothing is sent at arm time. Sends never wait; a full queue skips the
/// beat.
pub(crate) async fn heartbeat_pump(
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(HEARTBEAT_PERIOD);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let beat = tungstenite::Message::Text(HEARTBEAT_PAYLOAD.into());
                match write_tx.try_send(beat) {
                    Ok(()) => trace!("heartbeat queued"),
                    Err(mpsc::error::TrySendError::Full(_)) => trace!("write queue full, heartbeat skipped"),
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        }
    }
}
