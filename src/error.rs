//! Error types surfaced by the handler and its remote pipeline.
//!
//! Only [`ConfigError`], [`LogError`] and [`CloseError`] ever reach
//! application callers. The remaining types are absorbed by the remote
//! pipeline and reported through `log` diagnostics.

use std::io;

use thiserror::Error;

/// Invalid remote configuration or lifecycle misuse.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("remote URL must not be empty")]
    EmptyUrl,
    #[error("invalid remote URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid remote URL scheme '{scheme}': expected ws or wss")]
    InvalidScheme { scheme: String },
    #[error("invalid remote configuration: {0}")]
    InvalidOption(String),
    #[error("remote streaming is already configured")]
    AlreadyConfigured,
    #[error("handler has already been started")]
    AlreadyStarted,
    #[error("handler is closed")]
    Closed,
}

/// Outcome of a `log` call that did not succeed.
#[derive(Debug, Error)]
pub enum LogError {
    /// The handler is closing or closed; nothing was written.
    #[error("handler is closed")]
    Closed,
    /// The local sink rejected the write.
    #[error("local sink write failed: {0}")]
    Sink(#[from] io::Error),
}

/// Outcome of `close` when the flush step could not complete.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CloseError {
    #[error("flush timed out with {remaining} events still pending")]
    FlushTimeout { remaining: usize },
}

/// An event could not be turned into a wire payload.
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("encoded event is {size} bytes, exceeding the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
    #[error("failed to serialise event: {0}")]
    Json(#[from] serde_json::Error),
}

/// Sending to, probing, or reading from the active connection failed.
#[derive(Debug, Error)]
pub enum TransmitError {
    #[error("connection is closed")]
    Closed,
    #[error("websocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<tungstenite::Error> for TransmitError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                TransmitError::Closed
            }
            tungstenite::Error::Io(io) => TransmitError::Io(io),
            other => TransmitError::WebSocket(Box::new(other)),
        }
    }
}

/// Opening or authenticating a connection failed.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("unable to connect to {target}: {source}")]
    Tcp {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error("tls setup failed: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
    #[error("invalid handshake request: {0}")]
    Request(String),
}
