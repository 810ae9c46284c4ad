//! ticketbox: a remote ticket collection.
//!
//! The server keeps an ordered collection of [`model::Ticket`] records and
//! executes named commands against it, one framed request at a time, on a
//! single mio event loop. The client keeps one connection to the server,
//! reconnecting with a bounded retry budget when it drops.
//!
//! - [`protocol`]: request/response messages and their wire framing
//! - [`dispatch`]: command registry and dispatcher
//! - [`runtime`]: server event loop
//! - [`client`]: client state machine and console front-end
//! - [`commands`], [`storage`], [`persistence`]: the ticket collection itself

pub mod client;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod model;
pub mod persistence;
pub mod protocol;
pub mod runtime;
pub mod storage;
