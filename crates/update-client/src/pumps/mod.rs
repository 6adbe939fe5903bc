//! Per-connection tasks: socket reader, socket writer and heartbeat.

pub(crate) mod heartbeat;
pub(crate) mod read;
pub(crate) mod write;
