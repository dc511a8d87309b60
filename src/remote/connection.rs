//! Transport seam between the remote workers and the wire.
//!
//! The batch writer and connection manager only ever talk to a
//! [`RemoteConnection`]; the WebSocket implementation lives in
//! [`websocket`](super::websocket). Tests substitute in-memory fakes.

use std::sync::Arc;

use crate::error::{ConnectError, TransmitError};

use super::config::RemoteSettings;

/// Frame observed by the liveness loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Incoming {
    /// Acknowledgement of a liveness probe.
    Ack,
    Other,
}

/// A live, authenticated connection to the collector.
///
/// Methods take `&self`: the writer, the keepalive ticker and the liveness
/// loop use the same connection concurrently.
pub(crate) trait RemoteConnection: Send + Sync {
    /// Send one payload as a single text message.
    fn send_text(&self, payload: &str) -> Result<(), TransmitError>;

    /// Send a liveness probe.
    fn ping(&self) -> Result<(), TransmitError>;

    /// Wait briefly for an incoming frame; `Ok(None)` when nothing arrived.
    fn poll_incoming(&self) -> Result<Option<Incoming>, TransmitError>;

    /// Flag the connection as unusable after a transmit failure.
    fn mark_broken(&self);

    fn is_broken(&self) -> bool;

    /// Close gracefully and release the socket. Repeated calls do nothing.
    fn close(&self);
}

/// Opens connections for the connection manager.
pub(crate) trait Connector: Send + Sync {
    fn connect(&self, settings: &RemoteSettings)
    -> Result<Arc<dyn RemoteConnection>, ConnectError>;
}
