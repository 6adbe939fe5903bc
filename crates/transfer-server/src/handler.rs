//! Handler trait for reacting to client connections.
//!
//! The server owns sockets and framing; implementors decide *when* to
//! push by calling the [`ClientHandle`] send methods.

use std::future::Future;
use std::pin::Pin;

use crate::connection::{ClientHandle, ClientId};

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Callbacks from the transfer server.
pub trait Handler: Send + Sync + 'static {
    /// Called once a client finished the WebSocket upgrade.
    fn on_client_connected(&self, client: ClientHandle) -> HandlerFuture<'_>;

    /// Called when a client answers a version check.
    fn on_version_reply(&self, client: ClientHandle, version: String) -> HandlerFuture<'_> {
        Box::pin(async move {
            tracing::debug!(client = %client.id(), %version, "version reply ignored");
        })
    }

    /// Called after a client's connection is gone.
    fn on_client_disconnected(&self, id: ClientId) -> HandlerFuture<'_> {
        let _ = id;
        Box::pin(async {})
    }
}
