//! Connection supervision: connect, watch liveness, reconnect.
//!
//! The manager owns the lifecycle of every connection for one root handler.
//! A successful connect resets the attempt counter and publishes the
//! connection; two helper threads then watch it. The liveness loop consumes
//! acknowledgements and extends a read deadline on each one, and the
//! keepalive ticker sends a probe every ping interval. Whichever detects a
//! problem first reports the loss and the manager tears the connection down
//! before waiting out the reconnect delay.

use std::{
    fmt,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Sender, bounded, select, tick};
use log::{error, info, warn};

use crate::{cancel::CancellationToken, error::TransmitError};

use super::{
    config::RemoteSettings,
    connection::{Connector, Incoming, RemoteConnection},
    state::{ConnectionState, Shared},
};

/// Why a connected session ended.
#[derive(Debug)]
enum Loss {
    Broken,
    Read(TransmitError),
    Probe(TransmitError),
    Deadline(Duration),
}

impl fmt::Display for Loss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Loss::Broken => f.write_str("transmit failed"),
            Loss::Read(err) => write!(f, "read failed: {err}"),
            Loss::Probe(err) => write!(f, "liveness probe failed: {err}"),
            Loss::Deadline(wait) => write!(f, "no acknowledgement within {wait:?}"),
        }
    }
}

pub(crate) struct ConnectionManager {
    shared: Arc<Shared>,
    settings: Arc<RemoteSettings>,
    connector: Arc<dyn Connector>,
    cancel: CancellationToken,
    stop: CancellationToken,
}

impl ConnectionManager {
    /// `cancel` is the caller's token; `stop` is fired by `close`.
    pub(crate) fn new(
        shared: Arc<Shared>,
        settings: Arc<RemoteSettings>,
        connector: Arc<dyn Connector>,
        cancel: CancellationToken,
        stop: CancellationToken,
    ) -> Self {
        Self {
            shared,
            settings,
            connector,
            cancel,
            stop,
        }
    }

    fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || self.stop.is_cancelled() || self.shared.is_closed()
    }

    pub(crate) fn run(self) {
        let options = self.settings.options();
        let limit = options.reconnect_limit;
        while !self.should_stop() {
            self.shared.set_status(ConnectionState::Connecting);
            match self.connector.connect(&self.settings) {
                Ok(conn) => {
                    self.shared.reset_attempts();
                    if !self.shared.publish(Arc::clone(&conn)) {
                        conn.close();
                        break;
                    }
                    self.shared.set_status(ConnectionState::Connected);
                    info!("relaylog connected to {}", self.settings.url());
                    self.serve(&conn);
                    self.shared.set_status(ConnectionState::Disconnected);
                }
                Err(err) => {
                    let attempt = self.shared.record_attempt();
                    self.shared.set_status(ConnectionState::Disconnected);
                    warn!(
                        "relaylog connection attempt {attempt}/{limit} to {} failed: {err}",
                        self.settings.url()
                    );
                    if limit.exhausted(attempt) {
                        error!(
                            "relaylog giving up on remote logging to {} after {attempt} failed attempts",
                            self.settings.url()
                        );
                        self.shared.set_status(ConnectionState::GaveUp);
                        self.shared.close_queue();
                        return;
                    }
                }
            }
            if self.should_stop() || !self.wait_reconnect_delay(options.reconnect_delay) {
                break;
            }
        }
        self.shared.finish_status();
    }

    /// Sleep for `delay`; returns `false` if interrupted by cancel or close.
    fn wait_reconnect_delay(&self, delay: Duration) -> bool {
        select! {
            recv(self.cancel.receiver()) -> _ => false,
            recv(self.stop.receiver()) -> _ => false,
            default(delay) => !self.should_stop(),
        }
    }

    /// Watch a published connection until it is lost or the manager stops.
    fn serve(&self, conn: &Arc<dyn RemoteConnection>) {
        let options = self.settings.options();
        let session = CancellationToken::new();
        let (lost_tx, lost_rx) = bounded::<Loss>(2);

        let liveness = {
            let conn = Arc::clone(conn);
            let session = session.clone();
            let lost = lost_tx.clone();
            let pong_wait = options.pong_wait;
            thread::spawn(move || liveness_loop(conn.as_ref(), &session, &lost, pong_wait))
        };
        let keepalive = {
            let conn = Arc::clone(conn);
            let session = session.clone();
            let ping_interval = options.ping_interval;
            thread::spawn(move || keepalive_loop(conn.as_ref(), &session, &lost_tx, ping_interval))
        };

        select! {
            recv(lost_rx) -> loss => {
                if let Ok(loss) = loss {
                    warn!("relaylog connection to {} lost: {loss}", self.settings.url());
                }
            }
            recv(self.cancel.receiver()) -> _ => {}
            recv(self.stop.receiver()) -> _ => {}
        }

        session.cancel();
        for (name, handle) in [("liveness", liveness), ("keepalive", keepalive)] {
            if handle.join().is_err() {
                warn!("relaylog {name} thread panicked");
            }
        }
        if self.shared.withdraw(conn) {
            conn.close();
        }
    }
}

fn liveness_loop(
    conn: &dyn RemoteConnection,
    session: &CancellationToken,
    lost: &Sender<Loss>,
    pong_wait: Duration,
) {
    // An acknowledgement window too large for `Instant` never expires.
    let mut deadline = Instant::now().checked_add(pong_wait);
    while !session.is_cancelled() {
        if conn.is_broken() {
            let _ = lost.try_send(Loss::Broken);
            return;
        }
        match conn.poll_incoming() {
            Ok(Some(Incoming::Ack)) => deadline = Instant::now().checked_add(pong_wait),
            Ok(Some(Incoming::Other) | None) => {}
            Err(err) => {
                if !session.is_cancelled() {
                    let _ = lost.try_send(Loss::Read(err));
                }
                return;
            }
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            let _ = lost.try_send(Loss::Deadline(pong_wait));
            return;
        }
    }
}

fn keepalive_loop(
    conn: &dyn RemoteConnection,
    session: &CancellationToken,
    lost: &Sender<Loss>,
    ping_interval: Duration,
) {
    let ticker = tick(ping_interval);
    loop {
        select! {
            recv(ticker) -> _ => {
                if let Err(err) = conn.ping() {
                    let _ = lost.try_send(Loss::Probe(err));
                    return;
                }
            }
            recv(session.receiver()) -> _ => return,
        }
    }
}
