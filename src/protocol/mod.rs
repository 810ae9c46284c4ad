//! Request/response messages exchanged between client and server.
//!
//! A client sends one [`Request`] naming a command, its arguments and an
//! optional [`Ticket`] payload. The server answers with exactly one
//! [`Response`] carrying a [`ResponseStatus`], a human-readable message and
//! an optional result set. Framing and serialization live in [`codec`].

pub mod codec;

use crate::model::Ticket;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use codec::{DecodeError, EncodeError, FrameHeader, MessageKind, WireMessage};

/// A command invocation sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub command_name: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub payload: Option<Ticket>,
}

impl Request {
    /// Create a request without a payload.
    pub fn new(command_name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command_name: command_name.into(),
            args,
            payload: None,
        }
    }

    /// The no-op sentinel: a request with an empty command name.
    pub fn empty() -> Self {
        Self::new(String::new(), Vec::new())
    }

    /// Parse a console line: first word is the command, the rest are args.
    ///
    /// A blank line yields [`Request::empty`].
    pub fn parse_line(line: &str) -> Self {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some(name) => Self::new(name, parts.map(str::to_string).collect()),
            None => Self::empty(),
        }
    }

    /// Return a copy of this request carrying `payload`.
    pub fn with_payload(mut self, payload: Ticket) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.command_name.is_empty()
    }
}

/// Outcome category of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Ok,
    ServerError,
    CommandError,
    ArgsError,
    NoSuchCommand,
    ObjectRequired,
    ValidationError,
    ExecuteScript,
    Exit,
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResponseStatus::Ok => "OK",
            ResponseStatus::ServerError => "SERVER_ERROR",
            ResponseStatus::CommandError => "COMMAND_ERROR",
            ResponseStatus::ArgsError => "ARGS_ERROR",
            ResponseStatus::NoSuchCommand => "NO_SUCH_COMMAND",
            ResponseStatus::ObjectRequired => "OBJECT_REQUIRED",
            ResponseStatus::ValidationError => "VALIDATION_ERROR",
            ResponseStatus::ExecuteScript => "EXECUTE_SCRIPT",
            ResponseStatus::Exit => "EXIT",
        };
        f.write_str(s)
    }
}

/// The server's answer to one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: ResponseStatus,
    pub message: String,
    #[serde(default)]
    pub result_set: Option<Vec<Ticket>>,
}

impl Response {
    pub fn new(status: ResponseStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            result_set: None,
        }
    }

    /// Attach records to the response.
    pub fn with_records(mut self, records: Vec<Ticket>) -> Self {
        self.result_set = Some(records);
        self
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(ResponseStatus::Ok, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ResponseStatus::ServerError, message)
    }

    pub fn command_error(message: impl Into<String>) -> Self {
        Self::new(ResponseStatus::CommandError, message)
    }

    pub fn args_error(message: impl Into<String>) -> Self {
        Self::new(ResponseStatus::ArgsError, message)
    }

    pub fn no_such_command(name: &str) -> Self {
        Self::new(
            ResponseStatus::NoSuchCommand,
            format!("unknown command '{name}', try 'help'"),
        )
    }

    pub fn object_required(message: impl Into<String>) -> Self {
        Self::new(ResponseStatus::ObjectRequired, message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new(ResponseStatus::ValidationError, message)
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        let req = Request::parse_line("  filter_starts_with_name  con ");
        assert_eq!(req.command_name, "filter_starts_with_name");
        assert_eq!(req.args, vec!["con"]);
        assert!(req.payload.is_none());
    }

    #[test]
    fn test_blank_line_is_empty_sentinel() {
        assert!(Request::parse_line("   ").is_empty());
        assert_eq!(Request::parse_line(""), Request::empty());
    }

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&ResponseStatus::NoSuchCommand).unwrap();
        assert_eq!(json, "\"NO_SUCH_COMMAND\"");
        assert_eq!(ResponseStatus::ObjectRequired.to_string(), "OBJECT_REQUIRED");
    }
}
