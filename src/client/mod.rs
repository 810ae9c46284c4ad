//! Client side of the ticket protocol.
//!
//! [`Client`] owns one non-blocking connection driven by its own mio `Poll`.
//! `send` is synchronous from the caller's point of view: it writes one
//! request frame and waits for exactly one response frame, reconnecting and
//! retrying once if the link drops in between.
//!
//! ```text
//! Disconnected --connect--> Connecting --established--> Connected
//!      ^                        |                           |
//!      +------ failure ---------+                      I/O failure
//!      |                                                    v
//!      +------ budget exhausted ---------------------- Reconnecting
//! ```

pub mod builder;
pub mod console;
pub mod reconnect;

use crate::config::ClientConfig;
use crate::protocol::codec::{self, DecodeError, EncodeError};
use crate::protocol::{Request, Response};
use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use reconnect::{OnExhausted, ReconnectPolicy, ReconnectState, Sleeper, ThreadSleeper};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

const CLIENT_TOKEN: Token = Token(0);
const READ_CHUNK: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("cannot resolve server address '{0}'")]
    Unresolvable(String),
    #[error("connection to {addr} failed: {source}")]
    Io {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("connection to {0} timed out")]
    Timeout(SocketAddr),
}

/// Failure of one request/response exchange.
#[derive(Debug, Error)]
enum ExchangeError {
    #[error("connection lost: {0}")]
    Lost(#[source] io::Error),
    #[error("timed out waiting for the server")]
    TimedOut,
    #[error("request cannot be sent: {0}")]
    Encode(#[from] EncodeError),
    #[error("unreadable response: {0}")]
    BadResponse(#[source] DecodeError),
}

/// Socket plus the poll instance watching it.
struct Link {
    poll: Poll,
    stream: TcpStream,
}

pub struct Client {
    host: String,
    port: u16,
    connect_timeout: Duration,
    response_timeout: Duration,
    policy: ReconnectPolicy,
    backoff: ReconnectState,
    sleeper: Box<dyn Sleeper>,
    state: LinkState,
    link: Option<Link>,
    events: Events,
    read_buf: BytesMut,
    connect_attempts: u64,
}

impl Client {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            connect_timeout: config.connect_timeout,
            response_timeout: config.response_timeout,
            policy: config.reconnect.clone(),
            backoff: ReconnectState::default(),
            sleeper: Box::new(ThreadSleeper),
            state: LinkState::Disconnected,
            link: None,
            events: Events::with_capacity(8),
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            connect_attempts: 0,
        }
    }

    /// Replace the pause used between reconnect attempts.
    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected && self.link.is_some()
    }

    /// Number of TCP connection attempts made so far.
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts
    }

    pub fn reconnect_state(&self) -> &ReconnectState {
        &self.backoff
    }

    /// Open a fresh connection, dropping any existing one.
    ///
    /// An address that does not resolve exhausts the reconnect budget at once.
    pub fn connect(&mut self) -> Result<(), ConnectError> {
        self.close();

        let addr = match self.resolve() {
            Ok(addr) => addr,
            Err(e) => {
                error!(host = %self.host, port = self.port, "Server address does not resolve");
                self.backoff.exhaust(&self.policy, Instant::now());
                return Err(e);
            }
        };

        self.connect_attempts += 1;
        self.state = LinkState::Connecting;
        debug!(%addr, "Connecting");

        let io_err = |source: io::Error| ConnectError::Io { addr, source };
        let poll = Poll::new().map_err(io_err)?;
        let mut stream = TcpStream::connect(addr).map_err(io_err)?;
        poll.registry()
            .register(&mut stream, CLIENT_TOKEN, Interest::WRITABLE)
            .map_err(io_err)?;
        self.link = Some(Link { poll, stream });

        match self.finish_connect(addr) {
            Ok(()) => {
                self.state = LinkState::Connected;
                self.backoff.reset();
                info!(%addr, "Connected to server");
                Ok(())
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// First connection at startup.
    ///
    /// A failure here is charged to the reconnect budget, so an unreachable
    /// server still sees at most `max_attempts` connection attempts before
    /// the cool-down starts.
    pub fn open(&mut self) -> Result<(), ConnectError> {
        let Err(e) = self.connect() else {
            return Ok(());
        };
        if !matches!(e, ConnectError::Unresolvable(_)) {
            self.backoff.next_attempt(&self.policy);
            if self.backoff.attempt() >= self.policy.max_attempts {
                self.give_up();
            }
        }
        Err(e)
    }

    fn resolve(&self) -> Result<SocketAddr, ConnectError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ConnectError::Unresolvable(format!("{}:{}", self.host, self.port)))
    }

    /// Wait for the non-blocking connect to complete.
    fn finish_connect(&mut self, addr: SocketAddr) -> Result<(), ConnectError> {
        let deadline = Instant::now() + self.connect_timeout;
        let io_err = |source: io::Error| ConnectError::Io { addr, source };

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ConnectError::Timeout(addr));
            }
            let Some(link) = self.link.as_mut() else {
                return Err(io_err(io::ErrorKind::NotConnected.into()));
            };

            match link.poll.poll(&mut self.events, Some(remaining)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(io_err(e)),
            }
            if self.events.is_empty() {
                continue;
            }

            if let Some(e) = link.stream.take_error().map_err(io_err)? {
                return Err(io_err(e));
            }
            match link.stream.peer_addr() {
                Ok(_) => {
                    link.poll
                        .registry()
                        .reregister(&mut link.stream, CLIENT_TOKEN, Interest::READABLE)
                        .map_err(io_err)?;
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::NotConnected => continue,
                Err(e) => return Err(io_err(e)),
            }
        }
    }

    /// Drop the connection and any buffered bytes.
    pub fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            let _ = link.poll.registry().deregister(&mut link.stream);
            trace!("Connection closed");
        }
        self.read_buf.clear();
        self.state = LinkState::Disconnected;
    }

    /// Send one request and wait for its response.
    ///
    /// Failures never escape as errors; they come back as
    /// `SERVER_ERROR`/`ARGS_ERROR` responses for the caller to display.
    pub fn send(&mut self, request: &Request) -> Response {
        if request.is_empty() {
            return Response::args_error("empty request");
        }
        if !self.is_connected() && !self.ensure_connected() {
            return Response::server_error("server is unavailable");
        }

        match self.exchange(request) {
            Ok(response) => response,
            Err(ExchangeError::Lost(e)) => {
                warn!(error = %e, "Connection lost, reconnecting");
                self.close();
                if !self.reconnect() {
                    return Response::server_error(format!("connection lost: {e}"));
                }
                match self.exchange(request) {
                    Ok(response) => response,
                    Err(e) => {
                        if matches!(e, ExchangeError::Lost(_)) {
                            self.close();
                        }
                        Response::server_error(format!("retry failed: {e}"))
                    }
                }
            }
            Err(e @ ExchangeError::Encode(_)) => Response::args_error(e.to_string()),
            Err(e @ ExchangeError::TimedOut) => {
                // A partial late frame must not complete into the next answer.
                self.read_buf.clear();
                Response::server_error(e.to_string())
            }
            Err(e) => Response::server_error(e.to_string()),
        }
    }

    fn ensure_connected(&mut self) -> bool {
        if !self.backoff.permits(&self.policy, Instant::now()) {
            debug!(
                attempt = self.backoff.attempt(),
                "Reconnect not permitted yet"
            );
            return false;
        }
        self.reconnect()
    }

    /// Retry `connect` until it succeeds or the attempt budget runs out.
    fn reconnect(&mut self) -> bool {
        if let Err(e) = self.resolve() {
            error!(error = %e, "Giving up on reconnect");
            return self.give_up();
        }

        while let Some(attempt) = self.backoff.next_attempt(&self.policy) {
            self.close();
            self.state = LinkState::Reconnecting;
            warn!(
                attempt,
                max = self.policy.max_attempts,
                delay_ms = self.policy.delay.as_millis() as u64,
                "Reconnecting"
            );
            self.sleeper.sleep(self.policy.delay);

            match self.connect() {
                Ok(()) => return true,
                Err(e @ ConnectError::Unresolvable(_)) => {
                    error!(error = %e, "Giving up on reconnect");
                    break;
                }
                Err(e) => warn!(attempt, error = %e, "Reconnect attempt failed"),
            }
        }

        self.give_up()
    }

    /// Start the cool-down, then either report failure or exit.
    fn give_up(&mut self) -> bool {
        self.state = LinkState::Disconnected;
        self.backoff.exhaust(&self.policy, Instant::now());
        error!(
            attempts = self.policy.max_attempts,
            cooldown_ms = self.policy.cooldown.as_millis() as u64,
            "Server unreachable"
        );
        if self.policy.on_exhausted == OnExhausted::Exit {
            std::process::exit(1);
        }
        false
    }

    fn exchange(&mut self, request: &Request) -> Result<Response, ExchangeError> {
        let frame = codec::encode(request)?;
        let deadline = Instant::now() + self.response_timeout;
        trace!(command = %request.command_name, bytes = frame.len(), "Sending request");
        self.write_frame(&frame, deadline)?;
        self.read_response(deadline)
    }

    fn write_frame(&mut self, frame: &[u8], deadline: Instant) -> Result<(), ExchangeError> {
        let mut written = 0;
        while written < frame.len() {
            let link = self.link.as_mut().ok_or_else(not_connected)?;
            match link.stream.write(&frame[written..]) {
                Ok(0) => return Err(ExchangeError::Lost(io::ErrorKind::WriteZero.into())),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => self.wait_writable(deadline)?,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(ExchangeError::Lost(e)),
            }
        }
        Ok(())
    }

    fn wait_writable(&mut self, deadline: Instant) -> Result<(), ExchangeError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ExchangeError::TimedOut);
        }
        let link = self.link.as_mut().ok_or_else(not_connected)?;
        let registry = link.poll.registry();
        registry
            .reregister(&mut link.stream, CLIENT_TOKEN, Interest::WRITABLE)
            .map_err(ExchangeError::Lost)?;
        let polled = link.poll.poll(&mut self.events, Some(remaining));
        link.poll
            .registry()
            .reregister(&mut link.stream, CLIENT_TOKEN, Interest::READABLE)
            .map_err(ExchangeError::Lost)?;
        match polled {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(()),
            Err(e) => Err(ExchangeError::Lost(e)),
        }
    }

    fn read_response(&mut self, deadline: Instant) -> Result<Response, ExchangeError> {
        let mut eof = false;
        loop {
            match codec::decode_frame::<Response>(&self.read_buf) {
                Ok((response, used)) => {
                    self.read_buf.advance(used);
                    trace!(status = %response.status, "Response received");
                    return Ok(response);
                }
                Err(e) if e.is_incomplete() => {}
                Err(e) => {
                    self.read_buf.clear();
                    return Err(ExchangeError::BadResponse(e));
                }
            }
            if eof {
                return Err(ExchangeError::Lost(io::ErrorKind::UnexpectedEof.into()));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ExchangeError::TimedOut);
            }
            let link = self.link.as_mut().ok_or_else(not_connected)?;
            match link.poll.poll(&mut self.events, Some(remaining)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ExchangeError::Lost(e)),
            }
            eof = self.drain_socket()?;
        }
    }

    /// Read everything available; `true` once the peer has closed.
    fn drain_socket(&mut self) -> Result<bool, ExchangeError> {
        let link = self.link.as_mut().ok_or_else(not_connected)?;
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match link.stream.read(&mut chunk) {
                Ok(0) => return Ok(true),
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(ExchangeError::Lost(e)),
            }
        }
    }
}

fn not_connected() -> ExchangeError {
    ExchangeError::Lost(io::ErrorKind::NotConnected.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ResponseStatus;
    use crate::runtime::tests::spawn_server;
    use reconnect::tests::RecordingSleeper;
    use std::net::TcpListener;
    use std::thread;

    fn config(port: u16, max_attempts: u32, delay_ms: u64) -> ClientConfig {
        ClientConfig {
            host: "127.0.0.1".to_string(),
            port,
            connect_timeout: Duration::from_secs(2),
            response_timeout: Duration::from_secs(2),
            reconnect: ReconnectPolicy {
                max_attempts,
                delay: Duration::from_millis(delay_ms),
                cooldown: Duration::from_secs(60),
                on_exhausted: OnExhausted::ReturnError,
            },
            log_level: "warn".to_string(),
        }
    }

    /// A port nothing listens on.
    fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn read_request(stream: &mut std::net::TcpStream) -> Option<Request> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match codec::decode_frame::<Request>(&buf) {
                Ok((request, _)) => return Some(request),
                Err(e) if e.is_incomplete() => {}
                Err(_) => return None,
            }
            match stream.read(&mut chunk) {
                Ok(0) | Err(_) => return None,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
    }

    #[test]
    fn test_empty_request_skips_network() {
        let mut client = Client::new(&config(closed_port(), 3, 0));
        let response = client.send(&Request::empty());
        assert_eq!(response.status, ResponseStatus::ArgsError);
        assert_eq!(client.connect_attempts(), 0);
    }

    #[test]
    fn test_roundtrip_against_server() {
        let server = spawn_server();
        let mut client = Client::new(&config(server.addr.port(), 3, 0));
        client.connect().unwrap();
        assert_eq!(client.state(), LinkState::Connected);

        let response = client.send(&Request::new("show", vec![]));
        assert!(response.is_ok());
        assert_eq!(response.result_set.as_deref().map(<[_]>::len), Some(0));

        let response = client.send(&Request::new("bogus", vec![]));
        assert_eq!(response.status, ResponseStatus::NoSuchCommand);

        server.stop();
    }

    #[test]
    fn test_unreachable_server_exhausts_budget() {
        let mut client = Client::new(&config(closed_port(), 2, 50));

        let started = Instant::now();
        let response = client.send(&Request::new("show", vec![]));
        let elapsed = started.elapsed();

        assert_eq!(response.status, ResponseStatus::ServerError);
        assert_eq!(client.connect_attempts(), 2);
        assert!(elapsed >= Duration::from_millis(100), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
        assert_eq!(client.state(), LinkState::Disconnected);

        // Cool-down: no new attempts until it passes.
        let response = client.send(&Request::new("show", vec![]));
        assert_eq!(response.status, ResponseStatus::ServerError);
        assert_eq!(client.connect_attempts(), 2);
    }

    #[test]
    fn test_cooldown_restores_budget() {
        let mut cfg = config(closed_port(), 1, 0);
        cfg.reconnect.cooldown = Duration::from_millis(50);
        let sleeper = RecordingSleeper::default();
        let mut client = Client::new(&cfg).with_sleeper(sleeper.clone());

        client.send(&Request::new("show", vec![]));
        assert_eq!(client.connect_attempts(), 1);
        thread::sleep(Duration::from_millis(80));
        client.send(&Request::new("show", vec![]));
        assert_eq!(client.connect_attempts(), 2);
        assert_eq!(sleeper.pauses.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_lost_connection_retries_once() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let peer = thread::spawn(move || {
            // First connection: take the request and hang up without answering.
            let (mut first, _) = listener.accept().unwrap();
            let dropped = read_request(&mut first).unwrap();
            drop(first);

            let (mut second, _) = listener.accept().unwrap();
            let retried = read_request(&mut second).unwrap();
            let frame = codec::encode(&Response::ok("retried")).unwrap();
            second.write_all(&frame).unwrap();
            (dropped, retried)
        });

        let sleeper = RecordingSleeper::default();
        let mut client = Client::new(&config(port, 3, 10)).with_sleeper(sleeper.clone());
        client.connect().unwrap();

        let request = Request::new("info", vec![]);
        let response = client.send(&request);
        assert_eq!(response.message, "retried");
        assert_eq!(client.connect_attempts(), 2);
        assert_eq!(*sleeper.pauses.lock().unwrap(), [Duration::from_millis(10)]);

        let (dropped, retried) = peer.join().unwrap();
        assert_eq!(dropped, request);
        assert_eq!(retried, request);
    }

    #[test]
    fn test_response_timeout_keeps_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();

        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            read_request(&mut stream);
            let _ = done_rx.recv();
        });

        let mut cfg = config(port, 3, 0);
        cfg.response_timeout = Duration::from_millis(100);
        let mut client = Client::new(&cfg);
        client.connect().unwrap();

        let response = client.send(&Request::new("show", vec![]));
        assert_eq!(response.status, ResponseStatus::ServerError);
        assert!(response.message.contains("timed out"), "{}", response.message);
        assert!(client.is_connected());
        assert_eq!(client.connect_attempts(), 1);

        done_tx.send(()).unwrap();
        peer.join().unwrap();
    }

    #[test]
    fn test_unresolvable_host_exhausts_at_once() {
        let mut cfg = config(0, 5, 200);
        cfg.host = "nonexistent.invalid".to_string();
        let sleeper = RecordingSleeper::default();
        let mut client = Client::new(&cfg).with_sleeper(sleeper.clone());

        let response = client.send(&Request::new("show", vec![]));
        assert_eq!(response.status, ResponseStatus::ServerError);
        assert_eq!(client.connect_attempts(), 0);
        assert_eq!(client.reconnect_state().attempt(), 5);
        assert!(client.reconnect_state().next_allowed_at().is_some());
        assert!(sleeper.pauses.lock().unwrap().is_empty());

        let response = client.send(&Request::new("show", vec![]));
        assert_eq!(response.status, ResponseStatus::ServerError);
        assert_eq!(client.connect_attempts(), 0);
        assert!(sleeper.pauses.lock().unwrap().is_empty());
    }

    #[test]
    fn test_open_failure_counts_against_budget() {
        let sleeper = RecordingSleeper::default();
        let mut client = Client::new(&config(closed_port(), 2, 10)).with_sleeper(sleeper.clone());

        assert!(client.open().is_err());
        assert_eq!(client.connect_attempts(), 1);
        assert_eq!(client.reconnect_state().attempt(), 1);

        let response = client.send(&Request::new("show", vec![]));
        assert_eq!(response.status, ResponseStatus::ServerError);
        assert_eq!(client.connect_attempts(), 2);
        assert_eq!(sleeper.pauses.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_open_failure_with_single_attempt_starts_cooldown() {
        let sleeper = RecordingSleeper::default();
        let mut client = Client::new(&config(closed_port(), 1, 10)).with_sleeper(sleeper.clone());

        assert!(client.open().is_err());
        assert!(client.reconnect_state().next_allowed_at().is_some());

        client.send(&Request::new("show", vec![]));
        assert_eq!(client.connect_attempts(), 1);
        assert!(sleeper.pauses.lock().unwrap().is_empty());
    }

    #[test]
    fn test_partial_late_frame_dropped_after_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (go_tx, go_rx) = std::sync::mpsc::channel::<()>();

        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            read_request(&mut stream);
            let late = codec::encode(&Response::ok("late")).unwrap();
            let split = codec::HEADER_LEN + 2;
            stream.write_all(&late[..split]).unwrap();
            go_rx.recv().unwrap();
            stream.write_all(&late[split..]).unwrap();
            read_request(&mut stream);
        });

        let mut cfg = config(port, 3, 0);
        cfg.response_timeout = Duration::from_millis(100);
        let mut client = Client::new(&cfg);
        client.connect().unwrap();

        let response = client.send(&Request::new("show", vec![]));
        assert_eq!(response.status, ResponseStatus::ServerError);
        assert!(response.message.contains("timed out"), "{}", response.message);

        go_tx.send(()).unwrap();
        let response = client.send(&Request::new("info", vec![]));
        assert_eq!(response.status, ResponseStatus::ServerError);
        assert_ne!(response.message, "late");
        peer.join().unwrap();
    }

    #[test]
    fn test_garbage_response_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            read_request(&mut stream);
            stream.write_all(b"Zgarbage").unwrap();
            thread::sleep(Duration::from_millis(100));
        });

        let mut client = Client::new(&config(port, 3, 0));
        client.connect().unwrap();
        let response = client.send(&Request::new("show", vec![]));
        assert_eq!(response.status, ResponseStatus::ServerError);
        assert!(response.message.contains("unreadable"), "{}", response.message);
        peer.join().unwrap();
    }
}
