//! Per-connection session state.
//!
//! A session owns the accepted socket and an accumulating read buffer.
//! Frames are cut from the buffer with [`next_frame`]; responses are written
//! back synchronously before the loop moves on to the next event.

use crate::protocol::codec::{self, DecodeError};
use crate::protocol::{Request, Response};
use bytes::BytesMut;
use mio::net::TcpStream;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Read chunk size
const READ_CHUNK: usize = 16 * 1024;

/// Pause between write retries while the socket is full.
const WRITE_RETRY_PAUSE: Duration = Duration::from_millis(1);

/// Outcome of trying to cut one request frame from a session buffer.
#[derive(Debug)]
pub(crate) enum FrameState {
    /// Not enough bytes for a full frame yet.
    WaitingForMore,
    Complete(Request),
    /// The bytes were not a valid request frame.
    Corrupt(DecodeError),
}

/// Cut the next request frame from `buf`.
///
/// A frame with a readable header is consumed even if its body is bad.
/// When the header itself is unusable the frame boundary is lost and the
/// whole buffer is discarded.
pub(crate) fn next_frame(buf: &mut BytesMut) -> FrameState {
    let header = match codec::peek_header(buf) {
        Ok(header) => header,
        Err(e) if e.is_incomplete() => return FrameState::WaitingForMore,
        Err(e) => {
            buf.clear();
            return FrameState::Corrupt(e);
        }
    };

    if buf.len() < header.frame_len() {
        return FrameState::WaitingForMore;
    }

    let frame = buf.split_to(header.frame_len());
    match codec::decode::<Request>(&frame) {
        Ok(request) => FrameState::Complete(request),
        Err(e) => FrameState::Corrupt(e),
    }
}

/// A single accepted client connection.
#[derive(Debug)]
pub(crate) struct Session {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub read_buf: BytesMut,
}

impl Session {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Drain the socket into the read buffer.
    ///
    /// Returns `false` once the peer has closed its side.
    pub fn fill(&mut self) -> io::Result<bool> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    self.read_buf.extend_from_slice(&chunk[..n]);
                    trace!(peer = %self.peer, bytes = n, "Read");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Encode and write one response, retrying a full socket until `timeout`.
    pub fn send(&mut self, response: &Response, timeout: Duration) -> io::Result<()> {
        let frame = match codec::encode(response) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "Response cannot be encoded");
                codec::encode(&Response::server_error(format!("response cannot be sent: {e}")))
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
            }
        };
        self.write_all(&frame, timeout)
    }

    fn write_all(&mut self, mut buf: &[u8], timeout: Duration) -> io::Result<()> {
        let deadline = Instant::now() + timeout;
        while !buf.is_empty() {
            match self.stream.write(buf) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => buf = &buf[n..],
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "peer is not reading responses",
                        ));
                    }
                    thread::sleep(WRITE_RETRY_PAUSE);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageKind;

    fn framed(request: &Request) -> BytesMut {
        BytesMut::from(&codec::encode(request).unwrap()[..])
    }

    #[test]
    fn test_frames_split_across_reads() {
        let request = Request::new("show", vec![]);
        let whole = framed(&request);

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&whole[..3]);
        assert!(matches!(next_frame(&mut buf), FrameState::WaitingForMore));
        buf.extend_from_slice(&whole[3..whole.len() - 1]);
        assert!(matches!(next_frame(&mut buf), FrameState::WaitingForMore));
        buf.extend_from_slice(&whole[whole.len() - 1..]);

        match next_frame(&mut buf) {
            FrameState::Complete(decoded) => assert_eq!(decoded, request),
            other => panic!("unexpected {other:?}"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_pipelined_frames() {
        let mut buf = framed(&Request::new("info", vec![]));
        buf.extend_from_slice(&framed(&Request::new("head", vec![])));

        let names: Vec<String> = std::iter::from_fn(|| match next_frame(&mut buf) {
            FrameState::Complete(r) => Some(r.command_name),
            _ => None,
        })
        .collect();
        assert_eq!(names, ["info", "head"]);
    }

    #[test]
    fn test_corrupt_body_consumes_only_that_frame() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"Q\x00\x00\x00\x03{x}");
        buf.extend_from_slice(&framed(&Request::new("show", vec![])));

        assert!(matches!(
            next_frame(&mut buf),
            FrameState::Corrupt(DecodeError::Malformed(_))
        ));
        assert!(matches!(next_frame(&mut buf), FrameState::Complete(_)));
    }

    #[test]
    fn test_unknown_tag_discards_buffer() {
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\n"[..]);
        assert!(matches!(
            next_frame(&mut buf),
            FrameState::Corrupt(DecodeError::UnknownKind(b'G'))
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_response_frame_rejected() {
        let mut buf = BytesMut::from(&codec::encode(&Response::ok("x")).unwrap()[..]);
        assert!(matches!(
            next_frame(&mut buf),
            FrameState::Corrupt(DecodeError::WrongKind {
                expected: MessageKind::Request,
                found: MessageKind::Response,
            })
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversized_header_discards_buffer() {
        let mut buf = BytesMut::from(&b"Q\xff\xff\xff\xff"[..]);
        assert!(matches!(
            next_frame(&mut buf),
            FrameState::Corrupt(DecodeError::TooLarge { .. })
        ));
        assert!(buf.is_empty());
    }
}
