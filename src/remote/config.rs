//! Configuration consumed by the remote streaming pipeline.
//!
//! [`RemoteOptions`] carries the tunables; [`RemoteSettings`] pairs them with
//! a validated endpoint and credential once `configure_remote` succeeds.

use std::{fmt, time::Duration};

use native_tls::TlsConnector;
use tungstenite::http::Uri;

use crate::{error::ConfigError, rate_limited_warner::DEFAULT_WARN_INTERVAL};

/// Default capacity of the dispatch queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
/// Default interval after which a partial batch is flushed.
pub const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_millis(100);
/// Default number of payloads that triggers an immediate flush.
pub const DEFAULT_BATCH_MAX_SIZE: usize = 100;
/// Default wait between a failed or lost connection and the next attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Default bound on TCP connect plus WebSocket handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default write timeout applied to every transmit.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default WebSocket read buffer size in bytes.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;
/// Default WebSocket write buffer size in bytes.
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 1024;
/// Default maximum encoded payload size in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1 << 20; // 1 MiB
/// Default interval between liveness probes.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(54);
/// Default time allowed for an acknowledgement before the link is dead.
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);

/// Retry budget for consecutive failed connection attempts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReconnectLimit {
    /// Give up after this many consecutive failures.
    Limited(u32),
    /// Retry forever.
    #[default]
    Unlimited,
}

impl ReconnectLimit {
    /// Return `true` once `attempts` consecutive failures exhaust the budget.
    pub fn exhausted(self, attempts: u32) -> bool {
        match self {
            ReconnectLimit::Limited(max) => attempts >= max,
            ReconnectLimit::Unlimited => false,
        }
    }
}

impl fmt::Display for ReconnectLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconnectLimit::Limited(max) => write!(f, "{max}"),
            ReconnectLimit::Unlimited => f.write_str("unlimited"),
        }
    }
}

/// TLS options applied to `wss://` endpoints.
#[derive(Clone, Debug, Default)]
pub struct TlsOptions {
    /// Skip certificate and hostname validation (intended for tests).
    pub insecure_skip_verify: bool,
}

impl TlsOptions {
    pub(crate) fn connector(&self) -> Result<TlsConnector, native_tls::Error> {
        let mut builder = TlsConnector::builder();
        if self.insecure_skip_verify {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }
        builder.build()
    }
}

/// Tunables for the dispatch queue, batch writer and connection manager.
#[derive(Clone, Debug)]
pub struct RemoteOptions {
    pub queue_capacity: usize,
    pub batch_interval: Duration,
    pub batch_max_size: usize,
    pub reconnect_delay: Duration,
    pub reconnect_limit: ReconnectLimit,
    pub handshake_timeout: Duration,
    pub write_timeout: Duration,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    pub max_message_size: usize,
    pub ping_interval: Duration,
    pub pong_wait: Duration,
    pub warn_interval: Duration,
    pub tls: TlsOptions,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_interval: DEFAULT_BATCH_INTERVAL,
            batch_max_size: DEFAULT_BATCH_MAX_SIZE,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            reconnect_limit: ReconnectLimit::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            ping_interval: DEFAULT_PING_INTERVAL,
            pong_wait: DEFAULT_PONG_WAIT,
            warn_interval: DEFAULT_WARN_INTERVAL,
            tls: TlsOptions::default(),
        }
    }
}

fn is_zero<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

macro_rules! ensure_positive {
    ($value:expr, $field:expr) => {{
        if is_zero(&$value) {
            return Err(ConfigError::InvalidOption(format!(
                "{} must be greater than zero",
                $field
            )));
        }
    }};
}

impl RemoteOptions {
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_batch_interval(mut self, interval: Duration) -> Self {
        self.batch_interval = interval;
        self
    }

    pub fn with_batch_max_size(mut self, size: usize) -> Self {
        self.batch_max_size = size;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_reconnect_limit(mut self, limit: ReconnectLimit) -> Self {
        self.reconnect_limit = limit;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Override both WebSocket buffer sizes.
    pub fn with_buffer_sizes(mut self, read: usize, write: usize) -> Self {
        self.read_buffer_size = read;
        self.write_buffer_size = write;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Override the liveness probe cadence and acknowledgement window.
    pub fn with_liveness(mut self, ping_interval: Duration, pong_wait: Duration) -> Self {
        self.ping_interval = ping_interval;
        self.pong_wait = pong_wait;
        self
    }

    pub fn with_warn_interval(mut self, interval: Duration) -> Self {
        self.warn_interval = interval;
        self
    }

    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    /// Check every option for a usable value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_positive!(self.queue_capacity, "queue_capacity");
        ensure_positive!(self.batch_interval, "batch_interval");
        ensure_positive!(self.batch_max_size, "batch_max_size");
        ensure_positive!(self.handshake_timeout, "handshake_timeout");
        ensure_positive!(self.write_timeout, "write_timeout");
        ensure_positive!(self.read_buffer_size, "read_buffer_size");
        ensure_positive!(self.write_buffer_size, "write_buffer_size");
        ensure_positive!(self.max_message_size, "max_message_size");
        ensure_positive!(self.ping_interval, "ping_interval");
        ensure_positive!(self.pong_wait, "pong_wait");
        if self.reconnect_limit == ReconnectLimit::Limited(0) {
            return Err(ConfigError::InvalidOption(
                "reconnect_limit must allow at least one attempt".into(),
            ));
        }
        if self.ping_interval >= self.pong_wait {
            return Err(ConfigError::InvalidOption(
                "ping_interval must be shorter than pong_wait".into(),
            ));
        }
        Ok(())
    }
}

/// Transport scheme accepted for remote endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    Ws,
    Wss,
}

/// Validated endpoint, credential and options for one root handler.
#[derive(Clone, Debug)]
pub struct RemoteSettings {
    url: String,
    scheme: Scheme,
    host: String,
    port: u16,
    token: String,
    options: RemoteOptions,
}

impl RemoteSettings {
    /// Validate `url` and `options` and bundle them with `token`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the URL is empty, unparsable, lacks a host,
    /// uses a scheme other than `ws`/`wss`, or if an option is invalid.
    pub fn parse(url: &str, token: &str, options: RemoteOptions) -> Result<Self, ConfigError> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::EmptyUrl);
        }
        let uri: Uri = trimmed.parse().map_err(|err: tungstenite::http::uri::InvalidUri| {
            ConfigError::InvalidUrl {
                url: trimmed.to_owned(),
                reason: err.to_string(),
            }
        })?;
        let scheme = match uri.scheme_str() {
            Some(s) if s.eq_ignore_ascii_case("ws") => Scheme::Ws,
            Some(s) if s.eq_ignore_ascii_case("wss") => Scheme::Wss,
            Some(s) => {
                return Err(ConfigError::InvalidScheme {
                    scheme: s.to_owned(),
                });
            }
            None => {
                return Err(ConfigError::InvalidUrl {
                    url: trimmed.to_owned(),
                    reason: "missing scheme".into(),
                });
            }
        };
        let host = match uri.host() {
            Some(h) if !h.is_empty() => h.trim_start_matches('[').trim_end_matches(']'),
            _ => {
                return Err(ConfigError::InvalidUrl {
                    url: trimmed.to_owned(),
                    reason: "missing host".into(),
                });
            }
        };
        let port = uri.port_u16().unwrap_or(match scheme {
            Scheme::Ws => 80,
            Scheme::Wss => 443,
        });
        options.validate()?;
        // The handshake only recognises lowercase schemes.
        let rest = trimmed.split_once("://").map_or("", |(_, rest)| rest);
        let url = match scheme {
            Scheme::Ws => format!("ws://{rest}"),
            Scheme::Wss => format!("wss://{rest}"),
        };
        Ok(Self {
            url,
            scheme,
            host: host.to_owned(),
            port,
            token: token.to_owned(),
            options,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bearer credential; empty when none was configured.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn options(&self) -> &RemoteOptions {
        &self.options
    }
}
