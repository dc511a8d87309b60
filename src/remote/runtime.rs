//! Worker threads of a started remote pipeline.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use log::warn;

use crate::cancel::CancellationToken;

use super::{
    batch::BatchWriter,
    config::RemoteSettings,
    connection::Connector,
    manager::ConnectionManager,
    state::{QueueEnds, Shared},
};

/// The batch writer and connection manager of one root handler.
pub(crate) struct Pipeline {
    writer: Worker,
    manager: Worker,
    stop: CancellationToken,
}

impl Pipeline {
    /// Spawn both workers. `cancel` reaches both; the manager is also
    /// stopped by [`stop_manager`](Self::stop_manager).
    pub(crate) fn launch(
        shared: &Arc<Shared>,
        settings: &Arc<RemoteSettings>,
        queue: QueueEnds,
        connector: Arc<dyn Connector>,
        cancel: &CancellationToken,
    ) -> Self {
        let options = settings.options();
        let writer = BatchWriter::new(
            Arc::clone(shared),
            queue,
            cancel.clone(),
            options.batch_interval,
            options.batch_max_size,
        );
        let stop = CancellationToken::new();
        let manager = ConnectionManager::new(
            Arc::clone(shared),
            Arc::clone(settings),
            connector,
            cancel.clone(),
            stop.clone(),
        );
        Self {
            writer: Worker::spawn("batch writer", move || writer.run()),
            manager: Worker::spawn("connection manager", move || manager.run()),
            stop,
        }
    }

    /// Join the writer once the queue has been closed.
    pub(crate) fn join_writer(&mut self, timeout: Duration) -> bool {
        self.writer.join_within(timeout)
    }

    /// Stop the manager's loop and join it.
    pub(crate) fn stop_manager(&mut self, timeout: Duration) -> bool {
        self.stop.cancel();
        self.manager.join_within(timeout)
    }
}

/// A spawned worker that signals completion before its thread exits.
pub(crate) struct Worker {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
    done_rx: Receiver<()>,
}

impl Worker {
    pub(crate) fn spawn(name: &'static str, body: impl FnOnce() + Send + 'static) -> Self {
        let (done_tx, done_rx) = bounded(1);
        let handle = thread::spawn(move || {
            body();
            let _ = done_tx.send(());
        });
        Self {
            name,
            handle: Some(handle),
            done_rx,
        }
    }

    /// Wait up to `timeout` for the worker to finish, then join it.
    ///
    /// A worker that does not finish in time is detached. Returns `true` if
    /// the thread was joined.
    pub(crate) fn join_within(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    warn!("relaylog {} thread panicked", self.name);
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "relaylog {} thread did not shut down within {timeout:?}",
                    self.name
                );
                false
            }
        }
    }
}
