//! Command registry and request dispatch.
//!
//! The [`Dispatcher`] owns the domain state `S`, the table of registered
//! commands and the invocation history. It runs synchronously on the server
//! loop thread, so none of it needs synchronization.

use crate::model::ValidationError;
use crate::protocol::{Request, Response};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, trace};

/// A named command executed against domain state `S`.
pub trait Command<S>: Send {
    fn execute(
        &self,
        ctx: &mut Context<'_, S>,
        request: &Request,
    ) -> Result<Response, CommandError>;
}

/// Failure raised by a handler and translated at the dispatch boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Wrong number or shape of arguments.
    #[error("{0}")]
    Arguments(String),
    /// Payload failed domain validation.
    #[error("{0}")]
    Validation(String),
}

impl CommandError {
    pub fn arity(name: &str, expected: usize, got: usize) -> Self {
        CommandError::Arguments(format!(
            "'{name}' takes {expected} argument(s), got {got}"
        ))
    }
}

impl From<ValidationError> for CommandError {
    fn from(e: ValidationError) -> Self {
        CommandError::Validation(e.to_string())
    }
}

/// Fail with [`CommandError::Arguments`] unless `request` has exactly `n` args.
pub fn expect_args(request: &Request, n: usize) -> Result<(), CommandError> {
    if request.args.len() != n {
        return Err(CommandError::arity(&request.command_name, n, request.args.len()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("command '{0}' is already registered")]
    Duplicate(String),
    #[error("command name must not be empty")]
    EmptyName,
}

struct Entry<S> {
    handler: Box<dyn Command<S>>,
    help: String,
}

/// What a handler sees while executing.
pub struct Context<'a, S> {
    pub state: &'a mut S,
    history: &'a [String],
    commands: &'a BTreeMap<String, Entry<S>>,
}

impl<S> Context<'_, S> {
    /// Names of invoked commands, oldest first, including the current one.
    pub fn history(&self) -> &[String] {
        self.history
    }

    /// `(name, help)` of every registered command, sorted by name.
    pub fn catalog(&self) -> impl Iterator<Item = (&str, &str)> {
        self.commands
            .iter()
            .map(|(name, entry)| (name.as_str(), entry.help.as_str()))
    }
}

/// Maps command names to handlers and executes requests.
pub struct Dispatcher<S> {
    state: S,
    commands: BTreeMap<String, Entry<S>>,
    history: Vec<String>,
}

impl<S> Dispatcher<S> {
    pub fn new(state: S) -> Self {
        Self {
            state,
            commands: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    /// Register a handler under `name`.
    ///
    /// The first registration of a name wins; registering it again fails
    /// with [`RegistryError::Duplicate`] and leaves the table unchanged.
    pub fn register(
        &mut self,
        name: &str,
        handler: impl Command<S> + 'static,
        help: &str,
    ) -> Result<(), RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.commands.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        self.commands.insert(
            name.to_string(),
            Entry {
                handler: Box::new(handler),
                help: help.to_string(),
            },
        );
        trace!(command = name, "Registered command");
        Ok(())
    }

    /// Execute `request` and produce exactly one response.
    pub fn dispatch(&mut self, request: &Request) -> Response {
        let Some(entry) = self.commands.get(&request.command_name) else {
            debug!(command = %request.command_name, "Unknown command");
            return Response::no_such_command(&request.command_name);
        };

        self.history.push(request.command_name.clone());

        let mut ctx = Context {
            state: &mut self.state,
            history: &self.history,
            commands: &self.commands,
        };

        match entry.handler.execute(&mut ctx, request) {
            Ok(response) => {
                trace!(
                    command = %request.command_name,
                    status = %response.status,
                    "Command executed"
                );
                response
            }
            Err(CommandError::Arguments(msg)) => {
                debug!(command = %request.command_name, error = %msg, "Bad arguments");
                Response::command_error(format!("invalid arguments: {msg}"))
            }
            Err(CommandError::Validation(msg)) => {
                debug!(command = %request.command_name, error = %msg, "Validation failed");
                Response::validation_error(msg)
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn into_state(self) -> S {
        self.state
    }
}
