//! Local baseline sink.
//!
//! Every accepted record is written here synchronously, on the caller's
//! thread, before anything is handed to the remote pipeline. The sink's
//! outcome is the only error `log` reports to the caller.

use std::{
    io::{self, Write},
    sync::Arc,
};

use parking_lot::Mutex;

use crate::{
    encoder::LogEvent,
    formatter::{EventFormatter, TextFormatter},
};

/// Destination that records events synchronously.
pub trait LocalSink: Send + Sync {
    /// Write a single event.
    fn write(&self, event: &LogEvent) -> io::Result<()>;

    /// Flush any buffered output.
    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: LocalSink + ?Sized> LocalSink for Arc<S> {
    fn write(&self, event: &LogEvent) -> io::Result<()> {
        (**self).write(event)
    }

    fn flush(&self) -> io::Result<()> {
        (**self).flush()
    }
}

/// Sink writing one formatted line per event to an `io::Write` stream.
///
/// The writer is guarded by a mutex so concurrent callers never interleave
/// partial lines. Each line is flushed before `write` returns.
pub struct StreamSink<W: Write + Send> {
    writer: Mutex<W>,
    formatter: Box<dyn EventFormatter>,
}

impl StreamSink<io::Stdout> {
    /// Create a sink writing to `stdout` with a [`TextFormatter`].
    pub fn stdout() -> Self {
        Self::new(io::stdout(), TextFormatter)
    }
}

impl StreamSink<io::Stderr> {
    /// Create a sink writing to `stderr` with a [`TextFormatter`].
    pub fn stderr() -> Self {
        Self::new(io::stderr(), TextFormatter)
    }
}

impl<W: Write + Send> StreamSink<W> {
    /// Create a sink from an arbitrary writer and formatter.
    pub fn new<F>(writer: W, formatter: F) -> Self
    where
        F: EventFormatter + 'static,
    {
        Self {
            writer: Mutex::new(writer),
            formatter: Box::new(formatter),
        }
    }

    /// Consume the sink, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> LocalSink for StreamSink<W> {
    fn write(&self, event: &LogEvent) -> io::Result<()> {
        let line = self.formatter.format(event);
        let mut writer = self.writer.lock();
        writeln!(writer, "{line}")?;
        writer.flush()
    }

    fn flush(&self) -> io::Result<()> {
        self.writer.lock().flush()
    }
}
