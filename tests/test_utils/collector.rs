//! A local WebSocket collector for end-to-end tests.
//!
//! Accepts any number of connections, records the `Authorization` header of
//! each handshake and every text message received, and can drop its live
//! connections on demand to simulate a collector restart.

use std::{
    io::ErrorKind,
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tungstenite::{
    Error, Message,
    handshake::server::{ErrorResponse, Request, Response},
};

const READ_POLL: Duration = Duration::from_millis(20);

#[derive(Default)]
struct State {
    messages: Mutex<Vec<String>>,
    auth: Mutex<Vec<Option<String>>>,
    accepted: AtomicUsize,
    generation: AtomicUsize,
    stop: AtomicBool,
}

pub struct Collector {
    addr: SocketAddr,
    state: Arc<State>,
    acceptor: Option<JoinHandle<()>>,
}

impl Collector {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind collector");
        listener
            .set_nonblocking(true)
            .expect("non-blocking listener");
        let addr = listener.local_addr().expect("collector address");
        let state = Arc::new(State::default());
        let acceptor = {
            let state = Arc::clone(&state);
            thread::spawn(move || accept_loop(&listener, &state))
        };
        Self {
            addr,
            state,
            acceptor: Some(acceptor),
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/logs", self.addr)
    }

    pub fn messages(&self) -> Vec<String> {
        self.state.messages.lock().expect("messages lock").clone()
    }

    /// `Authorization` header of each accepted handshake, in order.
    pub fn auth_headers(&self) -> Vec<Option<String>> {
        self.state.auth.lock().expect("auth lock").clone()
    }

    pub fn connections(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    /// Drop every live connection without a close handshake.
    pub fn kick(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.state.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.acceptor.take() {
            let _ = handle.join();
        }
    }
}

/// Return a `ws://` URL on which nothing is listening.
pub fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let addr = listener.local_addr().expect("ephemeral address");
    drop(listener);
    format!("ws://{addr}/logs")
}

fn accept_loop(listener: &TcpListener, state: &Arc<State>) {
    let mut sessions = Vec::new();
    while !state.stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                let state = Arc::clone(state);
                sessions.push(thread::spawn(move || serve(stream, &state)));
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(_) => break,
        }
    }
    for session in sessions {
        let _ = session.join();
    }
}

fn serve(stream: TcpStream, state: &State) {
    if stream.set_nonblocking(false).is_err() {
        return;
    }
    let record_auth = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let auth = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        state.auth.lock().expect("auth lock").push(auth);
        Ok(resp)
    };
    let Ok(mut ws) = tungstenite::accept_hdr(stream, record_auth) else {
        return;
    };
    if ws.get_mut().set_read_timeout(Some(READ_POLL)).is_err() {
        return;
    }
    state.accepted.fetch_add(1, Ordering::SeqCst);
    let generation = state.generation.load(Ordering::SeqCst);
    loop {
        if state.stop.load(Ordering::SeqCst)
            || state.generation.load(Ordering::SeqCst) != generation
        {
            return;
        }
        match ws.read() {
            Ok(Message::Text(text)) => state
                .messages
                .lock()
                .expect("messages lock")
                .push(text.as_str().to_owned()),
            Ok(Message::Close(_)) => {
                let _ = ws.flush();
                return;
            }
            Ok(_) => {}
            Err(Error::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(_) => return,
        }
    }
}
