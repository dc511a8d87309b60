//! Single consumer of the dispatch queue.
//!
//! The writer accumulates payloads into a batch and flushes it over the
//! current connection when the batch fills, when the batch interval ticks, or
//! when a flush is explicitly requested. A flush with no usable connection
//! keeps the batch; while the kept batch is full the writer stops draining
//! the queue so overflow lands on the producers' drop path.

use std::{sync::Arc, time::Duration};

use crossbeam_channel::{Receiver, never, select, tick};
use log::{debug, warn};

use crate::cancel::CancellationToken;

use super::state::{QueueEnds, Shared};

pub(crate) struct BatchWriter {
    shared: Arc<Shared>,
    intake: Receiver<String>,
    flush_rx: Receiver<()>,
    cancel: CancellationToken,
    interval: Duration,
    max_size: usize,
    batch: Vec<String>,
}

impl BatchWriter {
    pub(crate) fn new(
        shared: Arc<Shared>,
        queue: QueueEnds,
        cancel: CancellationToken,
        interval: Duration,
        max_size: usize,
    ) -> Self {
        Self {
            shared,
            intake: queue.intake,
            flush_rx: queue.flush,
            cancel,
            interval,
            max_size,
            batch: Vec::with_capacity(max_size),
        }
    }

    pub(crate) fn run(mut self) {
        let ticker = tick(self.interval);
        let stalled = never::<String>();
        loop {
            let intake = if self.batch.len() >= self.max_size {
                &stalled
            } else {
                &self.intake
            };
            select! {
                recv(intake) -> msg => match msg {
                    Ok(payload) => {
                        self.batch.push(payload);
                        if self.batch.len() >= self.max_size {
                            self.flush();
                        }
                    }
                    Err(_) => break,
                },
                recv(ticker) -> _ => {
                    self.flush();
                }
                recv(self.flush_rx) -> msg => match msg {
                    Ok(()) => self.drain_and_flush(),
                    Err(_) => break,
                },
                recv(self.cancel.receiver()) -> _ => break,
            }
        }
        self.shared.close_queue();
        self.finish();
    }

    /// Move queued payloads into batches and flush until the queue is empty
    /// or no connection is available.
    fn drain_and_flush(&mut self) {
        loop {
            while self.batch.len() < self.max_size {
                match self.intake.try_recv() {
                    Ok(payload) => self.batch.push(payload),
                    Err(_) => break,
                }
            }
            if self.batch.is_empty() || !self.flush() || self.intake.is_empty() {
                return;
            }
        }
    }

    /// Transmit the batch in order. Returns `false` if no connection was
    /// available and the batch was kept.
    fn flush(&mut self) -> bool {
        if self.batch.is_empty() {
            return true;
        }
        let Some(conn) = self.shared.current() else {
            return false;
        };
        let total = self.batch.len();
        let mut sent = 0;
        for payload in self.batch.drain(..) {
            if let Err(err) = conn.send_text(&payload) {
                warn!("relaylog remote transmit failed: {err}");
                conn.mark_broken();
                break;
            }
            sent += 1;
            self.shared.complete(1);
        }
        if sent < total {
            self.shared.record_drops(total - sent);
            self.shared.complete(total - sent);
        }
        true
    }

    /// Last best-effort delivery before the writer exits.
    fn finish(&mut self) {
        self.drain_and_flush();
        let mut leftover = self.batch.len();
        self.batch.clear();
        leftover += self.intake.try_iter().count();
        if leftover > 0 {
            warn!("relaylog discarded {leftover} undelivered events on shutdown");
            self.shared.record_drops(leftover);
            self.shared.complete(leftover);
        }
        self.shared.flush_drop_warnings();
        debug!("relaylog batch writer stopped");
    }
}
