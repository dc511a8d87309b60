//! State shared by every handler derived from one root and its workers.
//!
//! The queue sender, the current connection, the `closed` flag and the
//! pending count live behind a single mutex so "may I enqueue" and "which
//! connection do I write to" are each answered by one atomic check. Counters
//! only read for introspection are kept in atomics outside the lock.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering},
    },
    time::Instant,
};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use log::warn;
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};

use crate::{error::CloseError, rate_limited_warner::RateLimitedWarner};

use super::{config::RemoteOptions, connection::RemoteConnection};

/// Lifecycle of the remote connection as seen by the connection manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The handler was closed or its cancellation token fired.
    Closed,
    /// A finite reconnect budget was exhausted.
    GaveUp,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Closed,
            4 => ConnectionState::GaveUp,
            _ => ConnectionState::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Closed => 3,
            ConnectionState::GaveUp => 4,
        }
    }

    /// Return `true` for states the manager never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::GaveUp)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
            ConnectionState::GaveUp => "gave up",
        })
    }
}

#[derive(Default)]
struct SharedState {
    closed: bool,
    sender: Option<Sender<String>>,
    flush_tx: Option<Sender<()>>,
    connection: Option<Arc<dyn RemoteConnection>>,
    /// Payloads accepted into the queue and not yet sent or discarded.
    pending: usize,
}

/// Receiving ends of the dispatch queue, handed to the batch writer.
pub(crate) struct QueueEnds {
    pub(crate) intake: Receiver<String>,
    pub(crate) flush: Receiver<()>,
}

pub(crate) struct Shared {
    state: Mutex<SharedState>,
    drained: Condvar,
    status: AtomicU8,
    attempts: AtomicU32,
    dropped: AtomicU64,
    warner: OnceCell<RateLimitedWarner>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SharedState::default()),
            drained: Condvar::new(),
            status: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
            attempts: AtomicU32::new(0),
            dropped: AtomicU64::new(0),
            warner: OnceCell::new(),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Set `closed`, returning `true` for the call that flipped it.
    pub(crate) fn mark_closed(&self) -> bool {
        let mut state = self.state.lock();
        !std::mem::replace(&mut state.closed, true)
    }

    /// Allocate the dispatch queue sized by `options`.
    pub(crate) fn open_queue(&self, options: &RemoteOptions) -> QueueEnds {
        let (tx, intake) = bounded(options.queue_capacity);
        let (flush_tx, flush) = bounded(1);
        let _ = self
            .warner
            .set(RateLimitedWarner::new(options.warn_interval));
        let mut state = self.state.lock();
        state.sender = Some(tx);
        state.flush_tx = Some(flush_tx);
        QueueEnds { intake, flush }
    }

    /// Push a payload without blocking; a full or retired queue drops it.
    pub(crate) fn enqueue(&self, payload: String) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        let accepted = match state.sender.as_ref() {
            Some(tx) => match tx.try_send(payload) {
                Ok(()) => true,
                Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => false,
            },
            None => false,
        };
        if accepted {
            state.pending += 1;
        } else {
            drop(state);
            self.record_drops(1);
        }
    }

    /// Count events lost to overflow or transmit failure.
    pub(crate) fn record_drops(&self, count: usize) {
        let count = u64::try_from(count).unwrap_or(u64::MAX);
        self.dropped.fetch_add(count, Ordering::Relaxed);
        if let Some(warner) = self.warner.get() {
            warner.record_drops(count);
            warner.warn_if_due(|n| {
                warn!("relaylog remote queue dropped {n} events");
            });
        }
    }

    /// Emit any drop warning still held back by the rate limiter.
    pub(crate) fn flush_drop_warnings(&self) {
        if let Some(warner) = self.warner.get() {
            warner.flush(|n| warn!("relaylog remote queue dropped {n} events"));
        }
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Payloads waiting in the queue, excluding the writer's batch.
    pub(crate) fn queued(&self) -> usize {
        self.state.lock().sender.as_ref().map_or(0, Sender::len)
    }

    pub(crate) fn pending(&self) -> usize {
        self.state.lock().pending
    }

    /// Retire `count` pending payloads that were sent or discarded.
    pub(crate) fn complete(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut state = self.state.lock();
        state.pending = state.pending.saturating_sub(count);
        if state.pending == 0 {
            self.drained.notify_all();
        }
    }

    /// Ask the batch writer to drain and flush immediately.
    pub(crate) fn signal_flush(&self) {
        if let Some(tx) = self.state.lock().flush_tx.as_ref() {
            let _ = tx.try_send(());
        }
    }

    /// Drop the queue's sending side so the writer drains and exits.
    pub(crate) fn close_queue(&self) {
        let mut state = self.state.lock();
        state.sender = None;
        state.flush_tx = None;
    }

    /// Block until nothing is pending or `deadline` passes. `None` waits
    /// without limit.
    pub(crate) fn wait_drained(&self, deadline: Option<Instant>) -> Result<(), CloseError> {
        let mut state = self.state.lock();
        while state.pending > 0 {
            let Some(deadline) = deadline else {
                self.drained.wait(&mut state);
                continue;
            };
            if self.drained.wait_until(&mut state, deadline).timed_out() {
                if state.pending > 0 {
                    return Err(CloseError::FlushTimeout {
                        remaining: state.pending,
                    });
                }
                break;
            }
        }
        Ok(())
    }

    /// Current connection, unless it has been marked broken.
    pub(crate) fn current(&self) -> Option<Arc<dyn RemoteConnection>> {
        self.state
            .lock()
            .connection
            .as_ref()
            .filter(|conn| !conn.is_broken())
            .cloned()
    }

    /// Publish `conn` as current. Refused once the handler is closed.
    pub(crate) fn publish(&self, conn: Arc<dyn RemoteConnection>) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.connection = Some(conn);
        true
    }

    /// Clear the current connection if it is still `conn`.
    ///
    /// Returns `true` when the caller now owns closing it.
    pub(crate) fn withdraw(&self, conn: &Arc<dyn RemoteConnection>) -> bool {
        let mut state = self.state.lock();
        match state.connection.as_ref() {
            Some(current) if std::ptr::addr_eq(Arc::as_ptr(current), Arc::as_ptr(conn)) => {
                state.connection = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn take_current(&self) -> Option<Arc<dyn RemoteConnection>> {
        self.state.lock().connection.take()
    }

    pub(crate) fn status(&self) -> ConnectionState {
        ConnectionState::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: ConnectionState) {
        self.status.store(status.as_u8(), Ordering::Release);
    }

    /// Move to `Closed` unless the manager already gave up.
    pub(crate) fn finish_status(&self) {
        let _ = self.status.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
            (ConnectionState::from_u8(v) != ConnectionState::GaveUp)
                .then_some(ConnectionState::Closed.as_u8())
        });
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Count a failed attempt, returning the new total.
    pub(crate) fn record_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::Relaxed).saturating_add(1)
    }

    pub(crate) fn reset_attempts(&self) {
        self.attempts.store(0, Ordering::Relaxed);
    }
}
