//! Socket read pump: the receive context.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::dispatch::Dispatcher;

/// Why the read pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReadEnd {
    /// The session was torn down locally.
    Cancelled,
    /// The peer closed the connection or the stream ended.
    Closed,
    /// Transport error, with its text.
    Failed(String),
}

/// Reads messages until the connection ends.
///
/// Binary messages are frames and go to the dispatcher in arrival order.
/// Text from the server carries no meaning in this protocol.
pub(crate) async fn read_pump<S>(
    mut read: S,
    dispatcher: Dispatcher,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) -> ReadEnd
where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => return ReadEnd::Cancelled,
            msg = read.next() => msg,
        };

        match msg {
            Some(Ok(tungstenite::Message::Binary(data))) => {
                dispatcher.handle_frame(&data).await;
            }
            Some(Ok(tungstenite::Message::Text(text))) => {
                debug!(len = text.len(), "ignoring text message");
            }
            Some(Ok(tungstenite::Message::Ping(data))) => {
                trace!("received ping, sending pong");
                let _ = write_tx.try_send(tungstenite::Message::Pong(data));
            }
            Some(Ok(tungstenite::Message::Pong(_))) => {}
            Some(Ok(tungstenite::Message::Close(frame))) => {
                debug!(?frame, "server closed connection");
                return ReadEnd::Closed;
            }
            Some(Ok(tungstenite::Message::Frame(_))) => {}
            Some(Err(e)) => return ReadEnd::Failed(e.to_string()),
            None => return ReadEnd::Closed,
        }
    }
}
