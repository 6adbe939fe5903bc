//! Socket write pump: drains queued outbound messages.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Forwards queued messages to the socket until cancelled or every sender
/// is gone, then sends a close frame.
///
/// A failed write ends the pump with the error and no close frame. The
/// caller owns turning that into a connection loss.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) -> Result<(), tungstenite::Error>
where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = write_rx.recv() => {
                let Some(msg) = msg else { break };
                if let Err(e) = write.send(msg).await {
                    warn!("socket write failed: {e}");
                    return Err(e);
                }
            }
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
    Ok(())
}
