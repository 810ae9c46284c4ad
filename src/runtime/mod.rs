//! Single-threaded server runtime.
//!
//! One mio `Poll` multiplexes the listening socket and every client session.
//! Requests are dispatched in arrival order on the loop thread, so command
//! handlers see the collection without any locking.
//!
//! Lifecycle: `Init --bind--> Bound --start--> Running --stop--> Stopped`.
//! [`ServerHandle::stop`] may be called from any thread (signal handler,
//! test harness) and wakes the loop through a `mio::Waker`.

mod connection;
mod event_loop;

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use connection::Session;
use mio::net::TcpListener;
use mio::{Interest, Poll, Token, Waker};
use slab::Slab;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const WAKER_TOKEN: Token = Token(usize::MAX - 1);

/// Listen backlog
const BACKLOG: i32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Init,
    Bound,
    Running,
    Stopped,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot bind '{addr}': {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("event loop failure: {0}")]
    Poll(#[source] io::Error),
}

/// Thread-safe stop switch for a running server.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    stop: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ServerHandle {
    /// Ask the loop to exit. Safe to call more than once.
    pub fn stop(&self) {
        if self.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Stop requested");
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "Failed to wake event loop");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

pub struct Server<S> {
    listen: String,
    max_connections: usize,
    poll_timeout: Duration,
    write_timeout: Duration,
    dispatcher: Dispatcher<S>,
    poll: Poll,
    waker: Arc<Waker>,
    stop: Arc<AtomicBool>,
    listener: Option<TcpListener>,
    sessions: Slab<Session>,
    state: ServerState,
}

impl<S> Server<S> {
    pub fn new(config: &ServerConfig, dispatcher: Dispatcher<S>) -> Result<Self, ServerError> {
        let poll = Poll::new().map_err(ServerError::Poll)?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN).map_err(ServerError::Poll)?;

        Ok(Self {
            listen: config.listen.clone(),
            max_connections: config.max_connections,
            poll_timeout: config.poll_timeout,
            write_timeout: config.write_timeout,
            dispatcher,
            poll,
            waker: Arc::new(waker),
            stop: Arc::new(AtomicBool::new(false)),
            listener: None,
            sessions: Slab::new(),
            state: ServerState::Init,
        })
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            stop: Arc::clone(&self.stop),
            waker: Arc::clone(&self.waker),
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Open the listening socket. Returns the bound address, which differs
    /// from the configured one when port 0 was requested.
    pub fn bind(&mut self) -> Result<SocketAddr, ServerError> {
        if let Some(addr) = self.local_addr() {
            return Ok(addr);
        }

        let bind_err = |source: io::Error| ServerError::Bind {
            addr: self.listen.clone(),
            source,
        };
        let addr = self
            .listen
            .to_socket_addrs()
            .map_err(bind_err)?
            .next()
            .ok_or_else(|| {
                bind_err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "address resolves to nothing",
                ))
            })?;

        let mut listener = TcpListener::from_std(create_listener(addr).map_err(bind_err)?);
        self.poll
            .registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
            .map_err(bind_err)?;
        let local = listener.local_addr().map_err(bind_err)?;

        self.listener = Some(listener);
        self.state = ServerState::Bound;
        info!(addr = %local, "Server listening");
        Ok(local)
    }

    /// Run the event loop until stopped. Binds first if needed.
    pub fn start(&mut self) -> Result<(), ServerError> {
        if self.state == ServerState::Stopped {
            debug!("Server already stopped");
            return Ok(());
        }
        if self.state == ServerState::Init {
            self.bind()?;
        }

        self.state = ServerState::Running;
        info!(
            max_connections = self.max_connections,
            poll_timeout_ms = self.poll_timeout.as_millis() as u64,
            "Server started"
        );
        let result = self.run_loop();
        self.shutdown();
        result
    }

    pub fn dispatcher(&self) -> &Dispatcher<S> {
        &self.dispatcher
    }

    pub fn into_dispatcher(self) -> Dispatcher<S> {
        self.dispatcher
    }

    /// Close every session and the listener.
    fn shutdown(&mut self) {
        let ids: Vec<usize> = self.sessions.iter().map(|(id, _)| id).collect();
        for id in ids {
            self.close_session(id);
        }
        if let Some(mut listener) = self.listener.take() {
            let _ = self.poll.registry().deregister(&mut listener);
        }
        self.state = ServerState::Stopped;
        info!("Server stopped");
    }
}

/// Create a non-blocking listener with `SO_REUSEADDR` set.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}
