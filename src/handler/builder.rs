//! Builder for root [`RelayHandler`]s.

use std::{fmt, sync::Arc};

use crate::{
    level::Level,
    remote::{connection::Connector, websocket::WebSocketConnector},
    sink::{LocalSink, StreamSink},
};

use super::RelayHandler;

/// Configures the local side of a root handler.
///
/// Remote streaming is enabled afterwards with
/// [`RelayHandler::configure_remote`].
pub struct HandlerBuilder {
    sink: Option<Box<dyn LocalSink>>,
    min_level: Level,
    connector: Option<Arc<dyn Connector>>,
}

impl HandlerBuilder {
    /// Start with a text sink on `stderr` accepting every level.
    pub fn new() -> Self {
        Self {
            sink: None,
            min_level: Level::Trace,
            connector: None,
        }
    }

    /// Write accepted records to `sink`.
    pub fn with_sink(mut self, sink: impl LocalSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Ignore records below `level`.
    pub fn with_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }

    pub(crate) fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn build(self) -> RelayHandler {
        let sink: Box<dyn LocalSink> = match self.sink {
            Some(sink) => sink,
            None => Box::new(StreamSink::stderr()),
        };
        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(WebSocketConnector),
        };
        RelayHandler::from_parts(sink, self.min_level, connector)
    }
}

impl Default for HandlerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandlerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerBuilder")
            .field("min_level", &self.min_level)
            .field("custom_sink", &self.sink.is_some())
            .finish()
    }
}
