//! Wire framing for requests and responses.
//!
//! ## Frame Format
//!
//! ```text
//! +---------+------------------+----------------------+
//! | kind u8 | body_len u32 BE  | body (JSON, body_len) |
//! +---------+------------------+----------------------+
//! ```
//!
//! `kind` is `b'Q'` for a [`Request`] and `b'R'` for a [`Response`]. Stream
//! readers call [`peek_header`] on their accumulated bytes to learn how long
//! the frame is, then decode once [`FrameHeader::frame_len`] bytes are
//! buffered. Every failure is a [`DecodeError`] variant, so callers can tell
//! "need more bytes" from "corrupt data" from "wrong message type".

use super::{Request, Response};
use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Length of the fixed frame header (tag + length prefix).
pub const HEADER_LEN: usize = 5;

/// Maximum accepted body length.
pub const MAX_BODY_LEN: usize = 16 * 1024 * 1024;

const REQUEST_TAG: u8 = b'Q';
const RESPONSE_TAG: u8 = b'R';

/// Which message a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
}

impl MessageKind {
    fn tag(self) -> u8 {
        match self {
            MessageKind::Request => REQUEST_TAG,
            MessageKind::Response => RESPONSE_TAG,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            REQUEST_TAG => Some(MessageKind::Request),
            RESPONSE_TAG => Some(MessageKind::Response),
            _ => None,
        }
    }
}

/// A message that can be framed on the wire.
pub trait WireMessage: Serialize + DeserializeOwned {
    const KIND: MessageKind;
}

impl WireMessage for Request {
    const KIND: MessageKind = MessageKind::Request;
}

impl WireMessage for Response {
    const KIND: MessageKind = MessageKind::Response;
}

/// Errors produced while decoding a frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("incomplete frame: {needed} more bytes needed")]
    Incomplete { needed: usize },
    #[error("unknown frame tag 0x{0:02x}")]
    UnknownKind(u8),
    #[error("expected {expected:?} frame, found {found:?}")]
    WrongKind {
        expected: MessageKind,
        found: MessageKind,
    },
    #[error("frame body of {len} bytes exceeds limit of {max}")]
    TooLarge { len: usize, max: usize },
    #[error("malformed frame body: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
}

impl DecodeError {
    /// True when more bytes may still complete the frame.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, DecodeError::Incomplete { .. })
    }
}

/// Errors produced while encoding a frame.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("message body of {len} bytes exceeds limit of {max}")]
    TooLarge { len: usize, max: usize },
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: MessageKind,
    pub body_len: usize,
}

impl FrameHeader {
    /// Total bytes occupied by the frame, header included.
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.body_len
    }
}

/// Encode a message into a single frame.
pub fn encode<M: WireMessage>(message: &M) -> Result<Bytes, EncodeError> {
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_BODY_LEN {
        return Err(EncodeError::TooLarge {
            len: body.len(),
            max: MAX_BODY_LEN,
        });
    }

    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    buf.put_u8(M::KIND.tag());
    buf.put_u32(body.len() as u32);
    buf.extend_from_slice(&body);
    Ok(buf.freeze())
}

/// Read the frame header at the start of `buf`.
///
/// An unknown tag is reported as soon as the first byte is available.
pub fn peek_header(buf: &[u8]) -> Result<FrameHeader, DecodeError> {
    let Some(&tag) = buf.first() else {
        return Err(DecodeError::Incomplete { needed: HEADER_LEN });
    };
    let kind = MessageKind::from_tag(tag).ok_or(DecodeError::UnknownKind(tag))?;

    if buf.len() < HEADER_LEN {
        return Err(DecodeError::Incomplete {
            needed: HEADER_LEN - buf.len(),
        });
    }

    let body_len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    if body_len > MAX_BODY_LEN {
        return Err(DecodeError::TooLarge {
            len: body_len,
            max: MAX_BODY_LEN,
        });
    }

    Ok(FrameHeader { kind, body_len })
}

/// Decode the first frame in `buf`, returning the message and bytes consumed.
pub fn decode_frame<M: WireMessage>(buf: &[u8]) -> Result<(M, usize), DecodeError> {
    let header = peek_header(buf)?;
    if header.kind != M::KIND {
        return Err(DecodeError::WrongKind {
            expected: M::KIND,
            found: header.kind,
        });
    }

    let frame_len = header.frame_len();
    if buf.len() < frame_len {
        return Err(DecodeError::Incomplete {
            needed: frame_len - buf.len(),
        });
    }

    let message = serde_json::from_slice(&buf[HEADER_LEN..frame_len])?;
    Ok((message, frame_len))
}

/// Decode exactly one frame spanning all of `buf`.
pub fn decode<M: WireMessage>(buf: &[u8]) -> Result<M, DecodeError> {
    let (message, consumed) = decode_frame(buf)?;
    if consumed != buf.len() {
        return Err(DecodeError::TrailingBytes(buf.len() - consumed));
    }
    Ok(message)
}
