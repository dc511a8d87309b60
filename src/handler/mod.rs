//! The public logging entry point.
//!
//! A [`RelayHandler`] always writes each accepted record to its local sink on
//! the caller's thread and returns that write's outcome. Once remote
//! streaming is configured and started, the same event is also encoded and
//! pushed into the dispatch queue without blocking; remote problems never
//! reach the caller.
//!
//! Handlers derived with [`with_attributes`](RelayHandler::with_attributes)
//! or [`with_group`](RelayHandler::with_group) share the root's sink, queue,
//! connection and lifecycle, and differ only in their inherited scope.

mod builder;
#[cfg(test)]
mod tests;

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use log::{info, warn};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::{
    cancel::CancellationToken,
    encoder::{LogEvent, encode, is_reserved},
    error::{CloseError, ConfigError, LogError},
    level::Level,
    record::{Attr, Record},
    remote::{
        ConnectionState, RemoteOptions, RemoteSettings,
        connection::Connector,
        runtime::Pipeline,
        state::{QueueEnds, Shared},
    },
    scope::Scope,
    sink::{LocalSink, StreamSink},
};

pub use builder::HandlerBuilder;

/// Deadline used when the last handle is dropped without an explicit close.
pub const DEFAULT_CLOSE_DEADLINE: Duration = Duration::from_secs(2);
/// Minimum time allowed for each worker to exit during close.
const WORKER_JOIN_GRACE: Duration = Duration::from_secs(1);

struct Runtime {
    started: bool,
    queue: Option<QueueEnds>,
    pipeline: Option<Pipeline>,
    connector: Arc<dyn Connector>,
}

struct Core {
    sink: Box<dyn LocalSink>,
    min_level: Level,
    shared: Arc<Shared>,
    remote: OnceCell<Arc<RemoteSettings>>,
    runtime: Mutex<Runtime>,
    close_outcome: OnceCell<Result<(), CloseError>>,
}

impl Core {
    fn close(&self, timeout: Duration) -> Result<(), CloseError> {
        self.close_outcome
            .get_or_init(|| self.shutdown(timeout))
            .clone()
    }

    fn shutdown(&self, timeout: Duration) -> Result<(), CloseError> {
        // `None` when the deadline lies beyond what `Instant` can represent.
        let deadline = Instant::now().checked_add(timeout);
        self.shared.mark_closed();
        let mut runtime = self.runtime.lock();
        let mut outcome = Ok(());
        if let Some(mut pipeline) = runtime.pipeline.take() {
            self.shared.signal_flush();
            outcome = self.shared.wait_drained(deadline);
            self.shared.close_queue();
            let remaining = deadline.map_or(WORKER_JOIN_GRACE, |deadline| {
                deadline.saturating_duration_since(Instant::now())
            });
            pipeline.join_writer(remaining.max(WORKER_JOIN_GRACE));
            if let Some(conn) = self.shared.take_current() {
                conn.close();
            }
            pipeline.stop_manager(WORKER_JOIN_GRACE);
            self.shared.finish_status();
        } else if self.remote.get().is_some() {
            // Configured but never started: nothing can drain the queue.
            runtime.queue = None;
            self.shared.close_queue();
            let pending = self.shared.pending();
            if pending > 0 {
                self.shared.record_drops(pending);
                self.shared.complete(pending);
                outcome = Err(CloseError::FlushTimeout { remaining: pending });
            }
            self.shared.finish_status();
        }
        drop(runtime);
        self.shared.flush_drop_warnings();
        if let Err(err) = self.sink.flush() {
            warn!("relaylog local sink flush failed during close: {err}");
        }
        outcome
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        if self.close_outcome.get().is_none() {
            let _ = self.close(DEFAULT_CLOSE_DEADLINE);
        }
    }
}

/// Structured logging handler with a synchronous local sink and optional
/// best-effort remote streaming.
///
/// Cloning is cheap and yields another handle to the same handler. The
/// handler closes itself with [`DEFAULT_CLOSE_DEADLINE`] when the last handle
/// derived from its root is dropped without an explicit [`close`](Self::close).
#[derive(Clone)]
pub struct RelayHandler {
    core: Arc<Core>,
    scope: Arc<Scope>,
}

macro_rules! level_methods {
    ($($name:ident => $level:expr),+ $(,)?) => {
        $(
            #[doc = concat!("Log `message` with `attrs` at `", stringify!($name), "` level.")]
            pub fn $name(
                &self,
                message: impl Into<String>,
                attrs: impl IntoIterator<Item = Attr>,
            ) -> Result<(), LogError> {
                self.log(Record::new($level, message).with_attrs(attrs))
            }
        )+
    };
}

impl RelayHandler {
    /// Start configuring a root handler.
    pub fn builder() -> HandlerBuilder {
        HandlerBuilder::new()
    }

    /// Create a root handler writing to `sink`, accepting every level.
    pub fn new(sink: impl LocalSink + 'static) -> Self {
        HandlerBuilder::new().with_sink(sink).build()
    }

    /// Create a root handler writing text lines to `stdout`.
    pub fn stdout() -> Self {
        Self::new(StreamSink::stdout())
    }

    /// Create a root handler writing text lines to `stderr`.
    pub fn stderr() -> Self {
        Self::new(StreamSink::stderr())
    }

    fn from_parts(sink: Box<dyn LocalSink>, min_level: Level, connector: Arc<dyn Connector>) -> Self {
        let core = Core {
            sink,
            min_level,
            shared: Arc::new(Shared::new()),
            remote: OnceCell::new(),
            runtime: Mutex::new(Runtime {
                started: false,
                queue: None,
                pipeline: None,
                connector,
            }),
            close_outcome: OnceCell::new(),
        };
        Self {
            core: Arc::new(core),
            scope: Arc::new(Scope::default()),
        }
    }

    /// Record `record` locally and, when enabled, queue it for the collector.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Closed`] once [`close`](Self::close) has begun, in
    /// which case neither destination receives the record, or
    /// [`LogError::Sink`] when the local sink rejects the write. Remote
    /// delivery never produces an error.
    pub fn log(&self, record: Record) -> Result<(), LogError> {
        if self.core.shared.is_closed() {
            return Err(LogError::Closed);
        }
        if record.level < self.core.min_level {
            return Ok(());
        }
        let event = encode(record, &self.scope);
        let outcome = self.core.sink.write(&event);
        if let Some(settings) = self.core.remote.get() {
            self.forward(&event, settings.options().max_message_size);
        }
        outcome.map_err(LogError::from)
    }

    fn forward(&self, event: &LogEvent, limit: usize) {
        match event.to_json(limit) {
            Ok(payload) => self.core.shared.enqueue(payload),
            Err(err) => {
                warn!("relaylog dropped event that could not be encoded: {err}");
                self.core.shared.record_drops(1);
            }
        }
    }

    level_methods! {
        trace => Level::Trace,
        debug => Level::Debug,
        info => Level::Info,
        warn => Level::Warn,
        error => Level::Error,
        critical => Level::Critical,
    }

    /// Derive a handler that adds `attrs` to every event it logs.
    ///
    /// The derived handler shares this handler's sink, queue and lifecycle.
    /// An empty `attrs` returns a handle to the same scope.
    pub fn with_attributes(&self, attrs: impl IntoIterator<Item = Attr>) -> Self {
        let attrs: Vec<Attr> = attrs.into_iter().collect();
        if attrs.is_empty() {
            return self.clone();
        }
        Self {
            core: Arc::clone(&self.core),
            scope: Arc::new(self.scope.with_attrs(attrs)),
        }
    }

    /// Derive a handler whose subsequent attributes nest under `name`.
    ///
    /// An empty `name` returns a handle to the same scope. An outermost
    /// group named `timestamp`, `level` or `message` would shadow a built-in
    /// field, so attributes logged under it are dropped and a warning is
    /// logged here.
    pub fn with_group(&self, name: impl Into<String>) -> Self {
        let name = name.into();
        if name.is_empty() {
            return self.clone();
        }
        if self.scope.groups().is_empty() && is_reserved(&name) {
            warn!(
                "relaylog group {name:?} shadows a built-in field; attributes logged under it are dropped"
            );
        }
        Self {
            core: Arc::clone(&self.core),
            scope: Arc::new(self.scope.with_group(name)),
        }
    }

    /// Enable streaming to `url` with default [`RemoteOptions`].
    ///
    /// # Errors
    ///
    /// See [`configure_remote_with`](Self::configure_remote_with).
    pub fn configure_remote(&self, url: &str, token: &str) -> Result<(), ConfigError> {
        self.configure_remote_with(url, token, RemoteOptions::default())
    }

    /// Enable streaming to `url`, authenticating with `token` as a bearer
    /// credential. Must be called at most once, before [`start`](Self::start).
    ///
    /// An empty `token` is accepted with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the URL is empty, unparsable or not
    /// `ws`/`wss`, if an option is invalid, or if the handler is already
    /// configured, started or closed.
    pub fn configure_remote_with(
        &self,
        url: &str,
        token: &str,
        options: RemoteOptions,
    ) -> Result<(), ConfigError> {
        // Checked under the runtime lock, which close holds while it runs.
        let mut runtime = self.core.runtime.lock();
        if self.core.shared.is_closed() {
            return Err(ConfigError::Closed);
        }
        if runtime.started {
            return Err(ConfigError::AlreadyStarted);
        }
        if self.core.remote.get().is_some() {
            return Err(ConfigError::AlreadyConfigured);
        }
        let settings = RemoteSettings::parse(url, token, options)?;
        if token.is_empty() {
            warn!(
                "relaylog remote streaming to {} configured without an auth token",
                settings.url()
            );
        }
        runtime.queue = Some(self.core.shared.open_queue(settings.options()));
        if self.core.remote.set(Arc::new(settings)).is_err() {
            return Err(ConfigError::AlreadyConfigured);
        }
        Ok(())
    }

    /// Launch the batch writer and connection manager, scoped to `cancel`.
    ///
    /// Returns immediately. Without remote configuration this only records
    /// that the handler has started.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AlreadyStarted`] on a second call and
    /// [`ConfigError::Closed`] after close.
    pub fn start(&self, cancel: &CancellationToken) -> Result<(), ConfigError> {
        let mut runtime = self.core.runtime.lock();
        if self.core.shared.is_closed() {
            return Err(ConfigError::Closed);
        }
        if runtime.started {
            return Err(ConfigError::AlreadyStarted);
        }
        runtime.started = true;
        if let (Some(settings), Some(queue)) = (self.core.remote.get(), runtime.queue.take()) {
            let connector = Arc::clone(&runtime.connector);
            runtime.pipeline = Some(Pipeline::launch(
                &self.core.shared,
                settings,
                queue,
                connector,
                cancel,
            ));
            info!("relaylog remote streaming to {} started", settings.url());
        }
        Ok(())
    }

    /// Shut down: refuse new records, flush pending remote events within
    /// `deadline`, stop the workers and release the connection.
    ///
    /// Only the first call does any work; every call returns its outcome.
    ///
    /// `deadline` bounds the flush only. Joining the workers afterwards may
    /// add up to one second per worker, so a stalled transport can make
    /// `close` return up to two seconds past `deadline`. A deadline too large
    /// to represent, such as [`Duration::MAX`], waits for the flush without
    /// limit.
    ///
    /// # Errors
    ///
    /// Returns [`CloseError::FlushTimeout`] naming the events still pending
    /// when the flush did not finish in time. Shutdown completes regardless.
    pub fn close(&self, deadline: Duration) -> Result<(), CloseError> {
        self.core.close(deadline)
    }

    /// Return `true` if a record at `level` would be written.
    pub fn enabled(&self, level: Level) -> bool {
        level >= self.core.min_level && !self.core.shared.is_closed()
    }

    pub fn min_level(&self) -> Level {
        self.core.min_level
    }

    /// Attributes and groups this handler adds to its events.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn is_remote_enabled(&self) -> bool {
        self.core.remote.get().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.core.shared.is_closed()
    }

    /// Events dropped from the remote path since the root was created.
    pub fn dropped(&self) -> u64 {
        self.core.shared.dropped()
    }

    /// Payloads waiting in the dispatch queue.
    pub fn queued(&self) -> usize {
        self.core.shared.queued()
    }

    /// Payloads accepted for remote delivery and not yet sent or discarded.
    pub fn pending(&self) -> usize {
        self.core.shared.pending()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.core.shared.status()
    }

    /// Consecutive failed connection attempts since the last success.
    pub fn reconnect_attempts(&self) -> u32 {
        self.core.shared.attempts()
    }
}

impl fmt::Debug for RelayHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayHandler")
            .field("min_level", &self.core.min_level)
            .field("scope", &self.scope)
            .field("remote", &self.core.remote.get().map(|s| s.url()))
            .field("closed", &self.is_closed())
            .finish()
    }
}
