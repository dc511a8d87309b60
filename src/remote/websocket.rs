//! WebSocket transport built on blocking `tungstenite`.
//!
//! The socket is shared behind a mutex by the batch writer, the keepalive
//! ticker and the liveness loop. The liveness loop waits for readability on a
//! cloned TCP handle before taking the lock, so idle reads never hold up a
//! transmit.

use std::{
    io,
    net::{Shutdown, TcpStream, ToSocketAddrs},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use log::debug;
use parking_lot::Mutex;
use tungstenite::{
    Connector as StreamConnector, HandshakeError, Message, WebSocket,
    client::IntoClientRequest,
    http::{HeaderValue, header::AUTHORIZATION},
    protocol::WebSocketConfig,
    stream::MaybeTlsStream,
};

use crate::error::{ConnectError, TransmitError};

use super::{
    config::{RemoteSettings, Scheme},
    connection::{Connector, Incoming, RemoteConnection},
};

/// How long a single liveness poll waits for incoming data.
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Upper bound on waiting for the peer's close frame.
const CLOSE_WAIT: Duration = Duration::from_millis(500);

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, ConnectError> {
    let target = format!("{host}:{port}");
    let tcp_err = |source: io::Error| ConnectError::Tcp {
        target: target.clone(),
        source,
    };
    let addrs = (host, port).to_socket_addrs().map_err(tcp_err)?;
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_nodelay(true).map_err(tcp_err)?;
                return Ok(stream);
            }
            Err(err) => last_err = Some(err),
        }
    }
    Err(tcp_err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
    })))
}

/// Opens authenticated WebSocket connections.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn connect(
        &self,
        settings: &RemoteSettings,
    ) -> Result<Arc<dyn RemoteConnection>, ConnectError> {
        let options = settings.options();
        let stream = connect_tcp(settings.host(), settings.port(), options.handshake_timeout)?;
        let tcp_err = |source: io::Error| ConnectError::Tcp {
            target: format!("{}:{}", settings.host(), settings.port()),
            source,
        };
        let control = stream.try_clone().map_err(tcp_err)?;
        control
            .set_read_timeout(Some(options.handshake_timeout))
            .map_err(tcp_err)?;
        control
            .set_write_timeout(Some(options.handshake_timeout))
            .map_err(tcp_err)?;

        let mut request = settings
            .url()
            .into_client_request()
            .map_err(|err| ConnectError::Request(err.to_string()))?;
        if !settings.token().is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {}", settings.token()))
                .map_err(|err| ConnectError::Request(err.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let mut config = WebSocketConfig::default();
        config.read_buffer_size = options.read_buffer_size;
        config.write_buffer_size = options.write_buffer_size;
        config.max_message_size = Some(options.max_message_size);
        config.max_frame_size = Some(options.max_message_size);

        let connector = match settings.scheme() {
            Scheme::Ws => StreamConnector::Plain,
            Scheme::Wss => StreamConnector::NativeTls(options.tls.connector()?),
        };
        let (socket, response) =
            tungstenite::client_tls_with_config(request, stream, Some(config), Some(connector))
                .map_err(|err| match err {
                    HandshakeError::Failure(err) => ConnectError::Handshake(err.to_string()),
                    HandshakeError::Interrupted(_) => {
                        ConnectError::Handshake("handshake timed out".into())
                    }
                })?;
        debug!(
            "relaylog websocket handshake with {} completed: {}",
            settings.url(),
            response.status()
        );

        control
            .set_read_timeout(Some(POLL_INTERVAL))
            .map_err(tcp_err)?;
        control
            .set_write_timeout(Some(options.write_timeout))
            .map_err(tcp_err)?;
        Ok(Arc::new(WsConnection {
            socket: Mutex::new(socket),
            control,
            write_timeout: options.write_timeout,
            broken: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }
}

struct WsConnection {
    socket: Mutex<WebSocket<MaybeTlsStream<TcpStream>>>,
    /// Second handle to the same socket, used for timeouts, peeking and
    /// shutdown without taking the socket lock.
    control: TcpStream,
    write_timeout: Duration,
    broken: AtomicBool,
    closed: AtomicBool,
}

impl WsConnection {
    fn ensure_open(&self) -> Result<(), TransmitError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransmitError::Closed);
        }
        Ok(())
    }

    fn send(&self, message: Message) -> Result<(), TransmitError> {
        self.ensure_open()?;
        self.socket.lock().send(message)?;
        Ok(())
    }
}

impl RemoteConnection for WsConnection {
    fn send_text(&self, payload: &str) -> Result<(), TransmitError> {
        self.send(Message::text(payload.to_owned()))
    }

    fn ping(&self) -> Result<(), TransmitError> {
        self.send(Message::Ping(Default::default()))
    }

    fn poll_incoming(&self) -> Result<Option<Incoming>, TransmitError> {
        self.ensure_open()?;
        let mut probe = [0u8; 1];
        match self.control.peek(&mut probe) {
            Ok(0) => return Err(TransmitError::Closed),
            Ok(_) => {}
            Err(err) if is_timeout(&err) => return Ok(None),
            Err(err) => return Err(err.into()),
        }
        let mut socket = self.socket.lock();
        match socket.read() {
            Ok(Message::Pong(_)) => Ok(Some(Incoming::Ack)),
            Ok(Message::Close(_)) => Err(TransmitError::Closed),
            Ok(_) => Ok(Some(Incoming::Other)),
            Err(tungstenite::Error::Io(err)) if is_timeout(&err) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn mark_broken(&self) {
        self.broken.store(true, Ordering::Release);
    }

    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if !self.is_broken()
            && let Some(mut socket) = self.socket.try_lock_for(self.write_timeout)
        {
            if socket.close(None).is_ok() {
                let deadline = Instant::now() + CLOSE_WAIT;
                while Instant::now() < deadline {
                    match socket.read() {
                        Ok(_) => {}
                        Err(tungstenite::Error::Io(err)) if is_timeout(&err) => {}
                        Err(_) => break,
                    }
                }
            }
        }
        let _ = self.control.shutdown(Shutdown::Both);
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        let _ = self.control.shutdown(Shutdown::Both);
    }
}
