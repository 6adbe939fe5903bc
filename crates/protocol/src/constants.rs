use std::time::Duration;

/// Size of the fixed header slot at the start of every frame.
pub const HEADER_SIZE: usize = 64;

/// Header tag asking the client to report its local version of an app.
pub const TAG_CHECK_VERSION: &str = "--CHECKVERSION--";

/// Header tag carrying an [`UpdateManifest`](crate::UpdateManifest) body.
pub const TAG_UPDATE: &str = "--UPDATE--";

/// Separator between `appId`, `version` and `package` in file headers.
pub const FILE_HEADER_DELIMITER: &str = "---";

/// Text payload of the client heartbeat.
pub const HEARTBEAT_PAYLOAD: &str = "ping";

/// How often an open client sends [`HEARTBEAT_PAYLOAD`].
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(60);

/// Reconnect delay grows by this step per failed attempt (0s, 5s, 10s, ...).
pub const RECONNECT_STEP: Duration = Duration::from_secs(5);

/// Reconnect attempts before the client suspends until foreground resume.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Default endpoint host when none is configured.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default endpoint port when none is configured.
pub const DEFAULT_PORT: u16 = 8800;

/// Maximum WebSocket message size in bytes (64 MB).
///
/// A file frame carries a whole package archive in one message.
pub const WS_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// How often the transfer server sends WebSocket pings.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(30);

/// Read deadline on the transfer server. Any incoming message resets it.
pub const WS_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Timeout for establishing the client socket.
pub const WS_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Message shown to the user when an app update finished unpacking.
pub const RELOAD_NOTICE: &str = "DEV_RELOAD";
