//! mio event loop.
//!
//! Readiness-based: poll reports which sockets are ready, then the loop does
//! non-blocking reads, dispatches every complete frame and writes each
//! response before handling the next event. A failure on one session closes
//! that session only; the loop itself stops on a poll failure or a stop
//! request.

use super::connection::{next_frame, FrameState, Session};
use super::{Server, ServerError, LISTENER_TOKEN, WAKER_TOKEN};
use crate::protocol::Response;
use mio::event::Event;
use mio::{Events, Interest, Token};
use std::io;
use std::sync::atomic::Ordering;
use tracing::{debug, error, trace, warn};

const EVENTS_CAPACITY: usize = 1024;

impl<S> Server<S> {
    pub(super) fn run_loop(&mut self) -> Result<(), ServerError> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        while !self.stop.load(Ordering::Acquire) {
            match self.poll.poll(&mut events, Some(self.poll_timeout)) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ServerError::Poll(e)),
            }

            for event in events.iter() {
                match event.token() {
                    WAKER_TOKEN => trace!("Event loop woken"),
                    LISTENER_TOKEN => self.accept_connections(),
                    Token(conn_id) => match self.handle_session_event(conn_id, event) {
                        Ok(true) => {}
                        Ok(false) => self.close_session(conn_id),
                        Err(e) => {
                            debug!(conn_id, error = %e, "Connection error");
                            self.close_session(conn_id);
                        }
                    },
                }
            }
        }

        Ok(())
    }

    fn accept_connections(&mut self) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };

        loop {
            match listener.accept() {
                Ok((mut stream, peer)) => {
                    if self.sessions.len() >= self.max_connections {
                        warn!(peer = %peer, "Connection limit reached");
                        continue;
                    }

                    let entry = self.sessions.vacant_entry();
                    let conn_id = entry.key();
                    if let Err(e) = self.poll.registry().register(
                        &mut stream,
                        Token(conn_id),
                        Interest::READABLE,
                    ) {
                        warn!(peer = %peer, error = %e, "Failed to register connection");
                        continue;
                    }
                    entry.insert(Session::new(stream, peer));
                    debug!(conn_id, peer = %peer, "Accepted connection");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    error!(error = %e, "Accept error");
                    break;
                }
            }
        }
    }

    /// Read, decode and answer everything available on one session.
    ///
    /// Returns `Ok(false)` when the peer has closed its side.
    fn handle_session_event(&mut self, conn_id: usize, event: &Event) -> io::Result<bool> {
        if !(event.is_readable() || event.is_read_closed() || event.is_error()) {
            return Ok(true);
        }
        let Some(session) = self.sessions.get_mut(conn_id) else {
            return Ok(true);
        };

        let open = session.fill()?;

        loop {
            match next_frame(&mut session.read_buf) {
                FrameState::WaitingForMore => break,
                FrameState::Complete(request) if request.is_empty() => {
                    trace!(conn_id, "Empty request ignored");
                }
                FrameState::Complete(request) => {
                    trace!(conn_id, command = %request.command_name, "Dispatching");
                    let response = self.dispatcher.dispatch(&request);
                    session.send(&response, self.write_timeout)?;
                }
                FrameState::Corrupt(e) => {
                    warn!(conn_id, peer = %session.peer, error = %e, "Malformed request");
                    let response = Response::command_error(format!("malformed request: {e}"));
                    session.send(&response, self.write_timeout)?;
                }
            }
        }

        Ok(open)
    }

    pub(super) fn close_session(&mut self, conn_id: usize) {
        if let Some(mut session) = self.sessions.try_remove(conn_id) {
            let _ = self.poll.registry().deregister(&mut session.stream);
            debug!(conn_id, peer = %session.peer, "Connection closed");
        }
    }
}
