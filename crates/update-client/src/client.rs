//! Connection lifecycle: the main context.
//!
//! [`UpdateClient::run`] is a single scheduler loop. Everything that
//! changes connection state happens here: connect results, close reports
//! from the read pump, foreground resume, the reconnect timer and the
//! notices and completions handed over by the receive context.

use std::pin::Pin;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{RwLock, mpsc};
use tokio::time::Sleep;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use devlink_protocol::UpdateManifest;
use devlink_protocol::constants::{WS_CONNECT_TIMEOUT, WS_MAX_MESSAGE_SIZE};

use crate::ClientError;
use crate::dispatch::Dispatcher;
use crate::layout::PackageLayout;
use crate::pumps::heartbeat::heartbeat_pump;
use crate::pumps::read::{ReadEnd, read_pump};
use crate::pumps::write::write_pump;
use crate::reconnection::ReconnectPolicy;
use crate::types::{ClientConfig, ClientEvent, ConnectionState, Notice};
use crate::updater::{MainCall, Updater, emit};
use crate::versions::VersionStore;

const EVENT_BUFFER: usize = 256;
const CONTROL_BUFFER: usize = 16;
const OUTBOUND_BUFFER: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Requests from the host.
#[derive(Debug)]
enum Control {
    Connect,
    Resume,
    Shutdown,
}

/// Reports from connect tasks and socket pumps, tagged with the connection
/// generation they belong to.
enum Report {
    Connected {
        generation: u64,
        result: Result<Box<WsStream>, ClientError>,
    },
    Closed {
        generation: u64,
        error: Option<String>,
    },
}

enum Step {
    Control(Option<Control>),
    Report(Report),
    Main(MainCall),
    ReconnectDue,
}

struct Session {
    cancel: CancellationToken,
}

/// Cloneable handle for driving a running [`UpdateClient`].
#[derive(Clone)]
pub struct ClientHandle {
    control: mpsc::Sender<Control>,
    state: Arc<RwLock<ConnectionState>>,
    updater: Updater,
}

impl ClientHandle {
    /// Opens the dev channel. Does nothing unless `use_dev_server` is set.
    pub async fn connect(&self) {
        self.send(Control::Connect).await;
    }

    /// The app came back to the foreground: reset the reconnect budget and
    /// reconnect now, even when suspended or already open.
    pub async fn resume(&self) {
        self.send(Control::Resume).await;
    }

    pub async fn shutdown(&self) {
        self.send(Control::Shutdown).await;
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// The update still being collected for `app_id`, if any.
    pub async fn pending(&self, app_id: &str) -> Option<UpdateManifest> {
        self.updater.pending(app_id).await
    }

    pub async fn pending_count(&self) -> usize {
        self.updater.pending_count().await
    }

    async fn send(&self, control: Control) {
        if self.control.send(control).await.is_err() {
            debug!("update client already stopped");
        }
    }
}

/// Dev-channel client. Consumed by [`run`](UpdateClient::run).
pub struct UpdateClient {
    config: ClientConfig,
    policy: ReconnectPolicy,
    updater: Updater,
    state: Arc<RwLock<ConnectionState>>,
    events: mpsc::Sender<ClientEvent>,
    control_rx: mpsc::Receiver<Control>,
    reports_tx: mpsc::Sender<Report>,
    reports_rx: mpsc::Receiver<Report>,
    main_rx: mpsc::Receiver<MainCall>,
    generation: u64,
    connecting: bool,
    session: Option<Session>,
    reconnect: Option<Pin<Box<Sleep>>>,
}

impl UpdateClient {
    /// Builds a client and the handle that controls it.
    ///
    /// The loop stops once every [`ClientHandle`] is dropped.
    pub fn new(
        config: ClientConfig,
        layout: PackageLayout,
        versions: Arc<dyn VersionStore>,
    ) -> (Self, ClientHandle, mpsc::Receiver<ClientEvent>) {
        let (events, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (control, control_rx) = mpsc::channel(CONTROL_BUFFER);
        let (reports_tx, reports_rx) = mpsc::channel(CONTROL_BUFFER);
        let (main_tx, main_rx) = mpsc::channel(EVENT_BUFFER);
        let updater = Updater::new(layout, versions, main_tx);
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));
        let policy = ReconnectPolicy::new(config.reconnect_step, config.max_reconnect_attempts);

        let handle = ClientHandle {
            control,
            state: state.clone(),
            updater: updater.clone(),
        };
        let client = Self {
            config,
            policy,
            updater,
            state,
            events,
            control_rx,
            reports_tx,
            reports_rx,
            main_rx,
            generation: 0,
            connecting: false,
            session: None,
            reconnect: None,
        };
        (client, handle, events_rx)
    }

    pub async fn run(mut self) {
        info!(
            url = %self.config.url(),
            enabled = self.config.use_dev_server,
            "update client started"
        );

        loop {
            let step = tokio::select! {
                control = self.control_rx.recv() => Step::Control(control),
                Some(report) = self.reports_rx.recv() => Step::Report(report),
                Some(call) = self.main_rx.recv() => Step::Main(call),
                () = reconnect_due(&mut self.reconnect) => Step::ReconnectDue,
            };

            match step {
                Step::Control(Some(Control::Connect)) => self.connect().await,
                Step::Control(Some(Control::Resume)) => self.resume().await,
                Step::Control(Some(Control::Shutdown) | None) => break,
                Step::Report(Report::Connected { generation, result }) => {
                    self.on_connect_result(generation, result).await;
                }
                Step::Report(Report::Closed { generation, error }) => {
                    self.on_closed(generation, error).await;
                }
                Step::Main(MainCall::Notify(notice)) => {
                    emit(&self.events, ClientEvent::Notice(notice));
                }
                Step::Main(MainCall::Complete(completion)) => {
                    completion.finish(&self.events).await;
                }
                Step::ReconnectDue => {
                    self.reconnect = None;
                    self.open().await;
                }
            }
        }

        self.close_session();
        self.set_state(ConnectionState::Disconnected).await;
        info!("update client stopped");
    }

    async fn connect(&mut self) {
        if !self.config.use_dev_server {
            debug!("dev server disabled, not connecting");
            return;
        }
        if self.policy.is_suspended() {
            debug!("suspended until foreground resume");
            return;
        }
        if self.connecting || self.session.is_some() {
            debug!("already connected or connecting");
            return;
        }
        self.reconnect = None;
        self.open().await;
    }

    async fn resume(&mut self) {
        if !self.config.use_dev_server {
            return;
        }
        info!("foreground resume, reconnecting");
        self.policy.resume();
        self.reconnect = None;
        self.close_session();
        self.open().await;
    }

    /// Starts a connect attempt. Any earlier attempt becomes stale.
    async fn open(&mut self) {
        self.generation += 1;
        self.connecting = true;
        self.set_state(ConnectionState::Connecting).await;

        let generation = self.generation;
        let url = self.config.url();
        let reports = self.reports_tx.clone();
        debug!(%url, generation, "connecting");
        tokio::spawn(async move {
            let result = dial(&url).await.map(Box::new);
            let _ = reports.send(Report::Connected { generation, result }).await;
        });
    }

    async fn on_connect_result(
        &mut self,
        generation: u64,
        result: Result<Box<WsStream>, ClientError>,
    ) {
        if generation != self.generation {
            debug!(generation, "ignoring superseded connect result");
            return;
        }
        self.connecting = false;

        match result {
            Ok(ws) => {
                self.policy.reset();
                self.start_session(*ws);
                info!(url = %self.config.url(), "connected to dev server");
                self.set_state(ConnectionState::Open).await;
            }
            Err(e) => {
                warn!("connect failed: {e}");
                emit(&self.events, ClientEvent::Notice(Notice::failure(e.to_string())));
                self.schedule_reconnect().await;
            }
        }
    }

    async fn on_closed(&mut self, generation: u64, error: Option<String>) {
        if generation != self.generation || self.session.is_none() {
            debug!(generation, "ignoring close of superseded connection");
            return;
        }
        self.close_session();

        match error {
            Some(e) => {
                warn!("connection lost: {e}");
                emit(&self.events, ClientEvent::Notice(Notice::failure(e)));
            }
            None => info!("dev server closed the connection"),
        }
        self.schedule_reconnect().await;
    }

    async fn schedule_reconnect(&mut self) {
        match self.policy.next_delay() {
            Some(delay) => {
                self.set_state(ConnectionState::Disconnected).await;
                let attempt = self.policy.attempt_count();
                debug!(attempt, ?delay, "reconnect scheduled");
                emit(&self.events, ClientEvent::Reconnecting { attempt, delay });
                self.reconnect = Some(Box::pin(tokio::time::sleep(delay)));
            }
            None => {
                warn!(
                    attempts = self.policy.attempt_count(),
                    "reconnect budget spent, waiting for foreground resume"
                );
                self.set_state(ConnectionState::Suspended).await;
            }
        }
    }

    fn start_session(&mut self, ws: WsStream) {
        let (write, read) = ws.split();
        let (write_tx, write_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let cancel = CancellationToken::new();

        let generation = self.generation;
        spawn_writer(
            write,
            write_rx,
            cancel.clone(),
            self.reports_tx.clone(),
            generation,
        );
        tokio::spawn(heartbeat_pump(write_tx.clone(), cancel.clone()));

        let dispatcher = Dispatcher::new(self.updater.clone(), write_tx.clone());
        let reports = self.reports_tx.clone();
        let read_cancel = cancel.clone();
        tokio::spawn(async move {
            let error = match read_pump(read, dispatcher, write_tx, read_cancel).await {
                ReadEnd::Cancelled => return,
                ReadEnd::Closed => None,
                ReadEnd::Failed(e) => Some(e),
            };
            let _ = reports.send(Report::Closed { generation, error }).await;
        });

        self.session = Some(Session { cancel });
    }

    /// Stops the pumps and heartbeat of the current connection.
    fn close_session(&mut self) {
        self.connecting = false;
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
        }
    }

    async fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.write().await;
        if *current == state {
            return;
        }
        *current = state;
        drop(current);
        emit(&self.events, ClientEvent::StateChanged(state));
    }
}

/// Runs the write pump of one connection. A failed write tears the session
/// down and is reported as a lost connection.
fn spawn_writer<S>(
    write: S,
    write_rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
    reports: mpsc::Sender<Report>,
    generation: u64,
) -> tokio::task::JoinHandle<()>
where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = write_pump(write, write_rx, cancel.clone()).await {
            cancel.cancel();
            let error = Some(e.to_string());
            let _ = reports.send(Report::Closed { generation, error }).await;
        }
    })
}

async fn reconnect_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn dial(url: &str) -> Result<WsStream, ClientError> {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
    ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);

    let connect = tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false);
    let (ws, _) = tokio::time::timeout(WS_CONNECT_TIMEOUT, connect)
        .await
        .map_err(|_| ClientError::Timeout)??;
    Ok(ws)
}
