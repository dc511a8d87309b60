//! Cooperative cancellation shared by the remote worker threads.
//!
//! Cancelling drops the token's internal sender, so every clone's
//! [`receiver`](CancellationToken::receiver) becomes disconnected and wakes
//! any `select!` waiting on it. Dropping a token never cancels it.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;

struct Inner {
    cancelled: AtomicBool,
    tx: Mutex<Option<Sender<()>>>,
}

/// Cloneable handle that signals all holders to stop.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
    rx: Receiver<()>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        }
    }

    /// Signal cancellation to every clone. Subsequent calls do nothing.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.tx.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Channel that disconnects once the token is cancelled.
    ///
    /// Intended for `crossbeam_channel::select!`; nothing is ever sent on it.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }

    /// Block for up to `timeout`, returning `true` if cancelled meanwhile.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        match self.rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => true,
            Ok(()) | Err(RecvTimeoutError::Timeout) => self.is_cancelled(),
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
