//! Wire protocol for the devlink live-update channel.
//!
//! Every binary message on the socket is a [`frame`]: a fixed 64-byte
//! header slot followed by a raw body. Control frames carry JSON bodies
//! (see [`messages`]); file frames carry a zip archive for one
//! [`PackageKind`] of an application bundle.

pub mod constants;
pub mod frame;
pub mod messages;
pub mod package;

pub use frame::{FileHeader, Frame, FrameError, Header, decode, encode};
pub use messages::{ClientMessage, EnvVersion, LaunchOptions, UpdateManifest, VersionCheck};
pub use package::PackageKind;
