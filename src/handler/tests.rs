use std::{
    io,
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

use rstest::{fixture, rstest};
use serial_test::serial;

use super::*;
use crate::{
    record::attr,
    remote::{
        ReconnectLimit,
        connection::test_support::{FakeConnector, capture_logs, wait_for},
    },
};

const URL: &str = "ws://collector.test/logs";
const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct MemorySink {
    events: Mutex<Vec<LogEvent>>,
    failing: AtomicBool,
    flushes: Mutex<usize>,
}

impl MemorySink {
    fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|e| e.message().to_owned())
            .collect()
    }

    fn len(&self) -> usize {
        self.events.lock().len()
    }
}

impl LocalSink for MemorySink {
    fn write(&self, event: &LogEvent) -> io::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::other("disk full"));
        }
        self.events.lock().push(event.clone());
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        *self.flushes.lock() += 1;
        Ok(())
    }
}

struct Fixture {
    handler: RelayHandler,
    sink: Arc<MemorySink>,
    connector: Arc<FakeConnector>,
    cancel: CancellationToken,
}

impl Fixture {
    fn new(connector: FakeConnector) -> Self {
        let sink = Arc::new(MemorySink::default());
        let connector = Arc::new(connector);
        let handler = RelayHandler::builder()
            .with_sink(Arc::clone(&sink))
            .with_connector(connector.clone())
            .build();
        Self {
            handler,
            sink,
            connector,
            cancel: CancellationToken::new(),
        }
    }

    fn configure(self, options: RemoteOptions) -> Self {
        self.handler
            .configure_remote_with(URL, "secret", options)
            .expect("valid remote configuration");
        self
    }

    fn start(self) -> Self {
        self.handler.start(&self.cancel).expect("first start");
        self
    }

    fn wait_connected(&self) {
        assert!(wait_for(WAIT, || {
            self.handler.connection_state() == ConnectionState::Connected
        }));
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn fast_options() -> RemoteOptions {
    RemoteOptions::default()
        .with_batch_interval(Duration::from_millis(10))
        .with_reconnect_delay(Duration::from_millis(20))
        .with_liveness(Duration::from_millis(10), Duration::from_millis(500))
}

#[fixture]
fn local_only() -> Fixture {
    Fixture::new(FakeConnector::succeeding())
}

#[fixture]
fn connected() -> Fixture {
    let fx = Fixture::new(FakeConnector::succeeding())
        .configure(fast_options())
        .start();
    fx.wait_connected();
    fx
}

#[rstest]
fn writes_to_sink_without_remote(local_only: Fixture) {
    local_only.handler.info("hello", [attr("n", 1)]).expect("log");
    assert_eq!(local_only.sink.messages(), ["hello"]);
    assert!(!local_only.handler.is_remote_enabled());
    assert_eq!(local_only.handler.pending(), 0);
}

#[rstest]
fn sink_failure_is_returned(local_only: Fixture) {
    local_only.sink.failing.store(true, Ordering::SeqCst);
    let err = local_only.handler.error("lost", []).expect_err("sink error");
    assert!(matches!(err, LogError::Sink(_)));
}

#[rstest]
fn records_below_minimum_level_are_ignored() {
    let sink = Arc::new(MemorySink::default());
    let handler = RelayHandler::builder()
        .with_sink(Arc::clone(&sink))
        .with_level(Level::Warn)
        .build();
    handler.info("quiet", []).expect("ignored record");
    handler.warn("loud", []).expect("accepted record");
    assert_eq!(sink.messages(), ["loud"]);
    assert!(!handler.enabled(Level::Debug));
    assert!(handler.enabled(Level::Critical));
}

#[rstest]
fn empty_derivations_share_scope(local_only: Fixture) {
    let root = &local_only.handler;
    assert!(Arc::ptr_eq(&root.scope, &root.with_attributes([]).scope));
    assert!(Arc::ptr_eq(&root.scope, &root.with_group("").scope));
}

#[rstest]
fn sibling_derivations_are_isolated(local_only: Fixture) {
    let base = local_only.handler.with_group("req");
    let left = base.with_attributes([attr("side", "left")]);
    let right = base.with_attributes([attr("side", "right")]);
    left.info("l", []).expect("log");
    right.info("r", [attr("extra", true)]).expect("log");
    base.info("b", []).expect("log");

    let events = local_only.sink.events.lock().clone();
    assert_eq!(events[0].attributes()["req"], serde_json::json!({"side": "left"}));
    assert_eq!(
        events[1].attributes()["req"],
        serde_json::json!({"side": "right", "extra": true})
    );
    assert!(events[2].attributes().is_empty());
}

#[rstest]
#[case::http("http://example.com", "InvalidScheme")]
#[case::empty("", "EmptyUrl")]
#[case::garbage("ws://", "InvalidUrl")]
fn rejects_bad_urls(local_only: Fixture, #[case] url: &str, #[case] kind: &str) {
    let err = local_only
        .handler
        .configure_remote(url, "t")
        .expect_err("invalid url");
    assert!(format!("{err:?}").starts_with(kind), "{err:?}");
    assert!(!local_only.handler.is_remote_enabled());
}

#[rstest]
fn configure_twice_is_rejected(local_only: Fixture) {
    local_only.handler.configure_remote(URL, "t").expect("first");
    let err = local_only
        .handler
        .configure_remote(URL, "t")
        .expect_err("second");
    assert!(matches!(err, ConfigError::AlreadyConfigured));
}

#[rstest]
fn configure_after_start_is_rejected(local_only: Fixture) {
    local_only.handler.start(&local_only.cancel).expect("start");
    let err = local_only
        .handler
        .configure_remote(URL, "t")
        .expect_err("late configure");
    assert!(matches!(err, ConfigError::AlreadyStarted));
    let err = local_only
        .handler
        .start(&local_only.cancel)
        .expect_err("second start");
    assert!(matches!(err, ConfigError::AlreadyStarted));
}

#[rstest]
#[serial]
fn empty_token_is_accepted_with_warning(local_only: Fixture) {
    let records = capture_logs(|| {
        local_only
            .handler
            .configure_remote(URL, "")
            .expect("empty token accepted");
    });
    assert!(local_only.handler.is_remote_enabled());
    let warned = records.iter().any(|rec| {
        rec.level() == log::Level::Warn && rec.args().contains("without an auth token")
    });
    assert!(warned);
}

#[rstest]
#[serial]
fn reserved_outer_group_is_reported(local_only: Fixture) {
    let records = capture_logs(|| {
        let _ = local_only.handler.with_group("message").with_group("level");
    });
    let warnings: Vec<_> = records
        .iter()
        .filter(|rec| rec.level() == log::Level::Warn && rec.args().contains("shadows a built-in"))
        .collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].args().contains("\"message\""));
}

#[rstest]
fn overflow_drops_remote_copies_only() {
    let fx = Fixture::new(FakeConnector::failing())
        .configure(RemoteOptions::default().with_queue_capacity(10));
    for i in 0..25 {
        fx.handler.info(format!("m{i}"), []).expect("sink write");
        assert!(fx.handler.queued() <= 10);
    }
    assert_eq!(fx.sink.len(), 25);
    assert_eq!(fx.handler.queued(), 10);
    assert_eq!(fx.handler.dropped(), 15);
}

#[rstest]
fn oversized_event_is_dropped_from_remote_path() {
    let fx = Fixture::new(FakeConnector::failing())
        .configure(RemoteOptions::default().with_max_message_size(64));
    fx.handler.info("x".repeat(200), []).expect("sink write");
    assert_eq!(fx.sink.len(), 1);
    assert_eq!(fx.handler.queued(), 0);
    assert_eq!(fx.handler.dropped(), 1);
}

#[rstest]
fn events_reach_collector_in_order(connected: Fixture) {
    for i in 0..5 {
        connected
            .handler
            .with_attributes([attr("service", "apps")])
            .info(format!("m{i}"), [])
            .expect("log");
    }
    let conn = connected.connector.latest().expect("connection");
    assert!(wait_for(WAIT, || conn.sent().len() == 5));
    let first: serde_json::Value = serde_json::from_str(&conn.sent()[0]).expect("json payload");
    assert_eq!(first["message"], "m0");
    assert_eq!(first["level"], "INFO");
    assert_eq!(first["service"], "apps");
    assert!(first["timestamp"].is_string());
}

#[rstest]
fn close_flushes_pending_events(connected: Fixture) {
    let conn = connected.connector.latest().expect("connection");
    for i in 0..50 {
        connected.handler.info(format!("m{i}"), []).expect("log");
    }
    connected.handler.close(WAIT).expect("flush in time");
    assert_eq!(conn.sent().len(), 50);
    assert_eq!(conn.closes(), 1);
    assert_eq!(connected.handler.pending(), 0);
    assert_eq!(connected.handler.connection_state(), ConnectionState::Closed);
    assert_eq!(*connected.sink.flushes.lock(), 1);
}

#[rstest]
fn close_reports_events_left_behind() {
    let fx = Fixture::new(FakeConnector::failing())
        .configure(fast_options().with_reconnect_delay(Duration::from_secs(3600)))
        .start();
    for i in 0..5 {
        fx.handler.info(format!("m{i}"), []).expect("log");
    }
    let started = Instant::now();
    let err = fx
        .handler
        .close(Duration::from_millis(50))
        .expect_err("nothing can be delivered");
    assert!(matches!(err, CloseError::FlushTimeout { remaining: 5 }));
    assert!(started.elapsed() < WAIT);
    assert_eq!(fx.handler.pending(), 0);
    assert_eq!(fx.handler.dropped(), 5);
}

#[rstest]
fn close_timeout_counts_only_unsent_events(connected: Fixture) {
    let conn = connected.connector.latest().expect("connection");
    conn.set_send_delay(Duration::from_millis(30));
    for i in 0..10 {
        connected.handler.info(format!("m{i}"), []).expect("log");
    }
    let err = connected
        .handler
        .close(Duration::from_millis(150))
        .expect_err("slow link cannot finish in time");
    let CloseError::FlushTimeout { remaining } = err;
    assert!(remaining > 0 && remaining < 10, "remaining = {remaining}");
    assert_eq!(conn.sent().len(), 10);
    assert_eq!(connected.handler.dropped(), 0);
    assert_eq!(connected.handler.pending(), 0);
}

#[rstest]
fn close_with_unbounded_deadline_waits_for_flush(connected: Fixture) {
    let conn = connected.connector.latest().expect("connection");
    for i in 0..20 {
        connected.handler.info(format!("m{i}"), []).expect("log");
    }
    connected
        .handler
        .close(Duration::MAX)
        .expect("flush completes");
    assert_eq!(conn.sent().len(), 20);
    assert_eq!(conn.closes(), 1);
    assert_eq!(connected.handler.connection_state(), ConnectionState::Closed);
}

#[rstest]
fn close_without_start_reports_queued_events() {
    let fx = Fixture::new(FakeConnector::succeeding()).configure(RemoteOptions::default());
    fx.handler.info("never sent", []).expect("log");
    let err = fx.handler.close(WAIT).expect_err("no workers to drain");
    assert!(matches!(err, CloseError::FlushTimeout { remaining: 1 }));
    assert_eq!(fx.connector.attempts(), 0);
}

#[rstest]
fn close_is_idempotent(connected: Fixture) {
    let conn = connected.connector.latest().expect("connection");
    let clone = connected.handler.with_group("g");
    assert!(connected.handler.close(WAIT).is_ok());
    assert!(clone.close(Duration::ZERO).is_ok());
    assert_eq!(conn.closes(), 1);
}

#[rstest]
fn log_after_close_reaches_neither_destination(connected: Fixture) {
    let conn = connected.connector.latest().expect("connection");
    connected.handler.close(WAIT).expect("close");
    let err = connected.handler.info("late", []).expect_err("closed");
    assert!(matches!(err, LogError::Closed));
    assert!(connected.sink.messages().is_empty());
    assert!(conn.sent().is_empty());
    assert!(!connected.handler.enabled(Level::Critical));
    assert!(matches!(
        connected.handler.start(&connected.cancel),
        Err(ConfigError::Closed)
    ));
}

#[rstest]
fn dropping_last_handle_closes() {
    let sink = Arc::new(MemorySink::default());
    let connector = Arc::new(FakeConnector::succeeding());
    let handler = RelayHandler::builder()
        .with_sink(Arc::clone(&sink))
        .with_connector(connector.clone())
        .build();
    handler
        .configure_remote_with(URL, "secret", fast_options())
        .expect("configure");
    handler.start(&CancellationToken::new()).expect("start");
    assert!(wait_for(WAIT, || handler.connection_state() == ConnectionState::Connected));
    let conn = connector.latest().expect("connection");

    let derived = handler.with_attributes([attr("k", "v")]);
    drop(handler);
    derived.info("still open", []).expect("derived handle keeps root alive");
    assert!(wait_for(WAIT, || conn.sent().len() == 1));
    assert_eq!(conn.closes(), 0);

    drop(derived);
    assert_eq!(conn.closes(), 1);
    assert_eq!(*sink.flushes.lock(), 1);
}

#[rstest]
fn cancellation_stops_remote_but_not_sink(connected: Fixture) {
    connected.cancel.cancel();
    assert!(wait_for(WAIT, || {
        connected.handler.connection_state() == ConnectionState::Closed
    }));
    connected.handler.info("local only", []).expect("sink still works");
    assert_eq!(connected.sink.len(), 1);
    assert!(connected.handler.close(WAIT).is_ok());
}

#[rstest]
fn gives_up_and_keeps_logging_locally() {
    let fx = Fixture::new(FakeConnector::failing())
        .configure(fast_options().with_reconnect_limit(ReconnectLimit::Limited(2)))
        .start();
    assert!(wait_for(WAIT, || {
        fx.handler.connection_state() == ConnectionState::GaveUp
    }));
    assert_eq!(fx.handler.reconnect_attempts(), 2);
    fx.handler.info("after give up", []).expect("sink write");
    assert_eq!(fx.sink.len(), 1);
    assert!(wait_for(WAIT, || fx.handler.dropped() >= 1));
    assert!(fx.handler.close(WAIT).is_ok());
    assert_eq!(fx.handler.connection_state(), ConnectionState::GaveUp);
}

#[rstest]
fn reconnects_after_link_loss(connected: Fixture) {
    let first = connected.connector.latest().expect("connection");
    first.drop_link();
    assert!(wait_for(WAIT, || connected.connector.connections().len() == 2
        && connected.handler.connection_state() == ConnectionState::Connected));
    connected.handler.info("after reconnect", []).expect("log");
    let second = connected.connector.latest().expect("replacement");
    assert!(wait_for(WAIT, || second.sent().len() == 1));
    assert_eq!(first.closes(), 1);
    assert_eq!(connected.handler.reconnect_attempts(), 0);
}

#[rstest]
fn concurrent_producers_never_block(connected: Fixture) {
    let workers: Vec<_> = (0..4)
        .map(|t| {
            let handler = connected.handler.with_attributes([attr("thread", t)]);
            thread::spawn(move || {
                for i in 0..100 {
                    handler.debug(format!("t{t}-{i}"), []).expect("log");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("producer thread");
    }
    assert_eq!(connected.sink.len(), 400);
    connected.handler.close(WAIT).expect("flush");
    let conn = connected.connector.latest().expect("connection");
    assert_eq!(conn.sent().len() as u64 + connected.handler.dropped(), 400);
}
