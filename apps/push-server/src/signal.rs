//! SIGHUP as an async event. The push server re-pushes its bundle on it.

/// Resolves once per SIGHUP. Never resolves where the signal does not exist.
pub struct Hangup {
    #[cfg(unix)]
    inner: Option<tokio::signal::unix::Signal>,
}

impl Hangup {
    pub fn new() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            Ok(Self {
                inner: Some(signal(SignalKind::hangup())?),
            })
        }

        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    pub async fn recv(&mut self) {
        #[cfg(unix)]
        if let Some(inner) = self.inner.as_mut() {
            if inner.recv().await.is_some() {
                return;
            }
            self.inner = None;
        }

        std::future::pending::<()>().await;
    }
}
