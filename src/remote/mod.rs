//! Best-effort streaming of encoded events to a remote collector.
//!
//! Producers push payloads into a bounded dispatch queue without blocking.
//! A single batch writer drains it over whatever connection the connection
//! manager currently publishes, while the manager connects, probes liveness
//! and reconnects in the background.

mod batch;
pub mod config;
pub(crate) mod connection;
mod manager;
pub(crate) mod runtime;
pub(crate) mod state;
pub(crate) mod websocket;

pub use config::{
    DEFAULT_BATCH_INTERVAL, DEFAULT_BATCH_MAX_SIZE, DEFAULT_HANDSHAKE_TIMEOUT,
    DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_PING_INTERVAL, DEFAULT_PONG_WAIT, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_READ_BUFFER_SIZE, DEFAULT_RECONNECT_DELAY, DEFAULT_WRITE_BUFFER_SIZE,
    DEFAULT_WRITE_TIMEOUT, ReconnectLimit, RemoteOptions, RemoteSettings, Scheme, TlsOptions,
};
pub use state::ConnectionState;
