//! Structured logging with a synchronous local sink and best-effort
//! streaming to a remote collector over WebSocket.
//!
//! ```no_run
//! use std::time::Duration;
//! use relaylog::{CancellationToken, RelayHandler, attr};
//!
//! let handler = RelayHandler::stdout();
//! handler.configure_remote("wss://collector.example/logs", "token")?;
//! handler.start(&CancellationToken::new())?;
//!
//! let api = handler.with_attributes([attr("service", "api")]).with_group("req");
//! api.info("request served", [attr("status", 200)])?;
//!
//! handler.close(Duration::from_secs(5))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod cancel;
mod encoder;
mod error;
mod formatter;
mod handler;
mod level;
mod rate_limited_warner;
mod record;
pub mod remote;
mod scope;
mod sink;

pub use cancel::CancellationToken;
pub use encoder::{LogEvent, encode, format_timestamp};
pub use error::{CloseError, ConfigError, ConnectError, EncodingError, LogError, TransmitError};
pub use formatter::{EventFormatter, JsonFormatter, TextFormatter};
pub use handler::{DEFAULT_CLOSE_DEADLINE, HandlerBuilder, RelayHandler};
pub use level::{Level, ParseLevelError};
pub use rate_limited_warner::{DEFAULT_WARN_INTERVAL, RateLimitedWarner};
pub use record::{Attr, Record, Value, attr};
pub use remote::{ConnectionState, ReconnectLimit, RemoteOptions, TlsOptions};
pub use scope::Scope;
pub use sink::{LocalSink, StreamSink};
