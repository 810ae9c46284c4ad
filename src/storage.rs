//! In-memory ticket collection.
//!
//! Provides the ordered collection the server commands operate on:
//! - Tickets kept in natural order (ascending price, then id)
//! - Server-side id assignment (smallest free positive id)
//! - Creation timestamps assigned on insert
//!
//! The store is owned by the dispatcher and only touched from the server
//! loop thread, so it carries no locks.

use crate::model::{Ticket, ValidationError};
use chrono::{DateTime, Local};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Result of a storage operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageResult {
    /// Item stored under the given id
    Stored(i32),
    /// Existing item replaced
    Updated,
    /// Item removed
    Removed,
    /// No item with that id
    NotFound,
}

/// Rejected initial collection
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("duplicate ticket id {0}")]
    DuplicateId(i32),
    #[error("ticket {id} is invalid: {source}")]
    Invalid {
        id: i32,
        #[source]
        source: ValidationError,
    },
}

/// Summary returned by `info`
#[derive(Debug, Clone)]
pub struct StoreInfo {
    pub kind: &'static str,
    pub initialized_at: DateTime<Local>,
    pub len: usize,
}

/// Ordered ticket collection
#[derive(Debug)]
pub struct CollectionStore {
    /// Tickets sorted by `Ticket::natural_cmp`
    tickets: Vec<Ticket>,
    initialized_at: DateTime<Local>,
}

impl Default for CollectionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionStore {
    /// Create an empty collection
    pub fn new() -> Self {
        Self {
            tickets: Vec::new(),
            initialized_at: Local::now(),
        }
    }

    /// Build a collection from loaded tickets, checking ids and fields.
    pub fn from_tickets(mut tickets: Vec<Ticket>) -> Result<Self, StoreError> {
        let mut seen = HashSet::with_capacity(tickets.len());
        for ticket in &tickets {
            if !seen.insert(ticket.id) {
                return Err(StoreError::DuplicateId(ticket.id));
            }
            ticket
                .validate_stored()
                .map_err(|source| StoreError::Invalid {
                    id: ticket.id,
                    source,
                })?;
        }

        tickets.sort_by(Ticket::natural_cmp);
        info!(items = tickets.len(), "Initializing collection");
        Ok(Self {
            tickets,
            initialized_at: Local::now(),
        })
    }

    /// Smallest positive id not used by any ticket
    fn next_free_id(&self) -> i32 {
        let used: HashSet<i32> = self.tickets.iter().map(|t| t.id).collect();
        (1..).find(|id| !used.contains(id)).unwrap_or(i32::MAX)
    }

    fn position(&self, id: i32) -> Option<usize> {
        self.tickets.iter().position(|t| t.id == id)
    }

    fn insert_sorted(&mut self, ticket: Ticket) {
        let at = self
            .tickets
            .partition_point(|t| t.natural_cmp(&ticket).is_lt());
        self.tickets.insert(at, ticket);
    }

    /// Add a ticket, assigning its id and creation date.
    pub fn insert(&mut self, mut ticket: Ticket) -> StorageResult {
        ticket.id = self.next_free_id();
        ticket.creation_date = Local::now();
        let id = ticket.id;
        self.insert_sorted(ticket);
        trace!(id, items = self.tickets.len(), "Ticket stored");
        StorageResult::Stored(id)
    }

    /// Replace the ticket with `id`, keeping its id and creation date.
    pub fn update(&mut self, id: i32, mut ticket: Ticket) -> StorageResult {
        let Some(pos) = self.position(id) else {
            return StorageResult::NotFound;
        };
        let old = self.tickets.remove(pos);
        ticket.id = old.id;
        ticket.creation_date = old.creation_date;
        self.insert_sorted(ticket);
        trace!(id, "Ticket updated");
        StorageResult::Updated
    }

    pub fn remove_by_id(&mut self, id: i32) -> StorageResult {
        match self.position(id) {
            Some(pos) => {
                self.tickets.remove(pos);
                trace!(id, "Ticket removed");
                StorageResult::Removed
            }
            None => StorageResult::NotFound,
        }
    }

    pub fn contains(&self, id: i32) -> bool {
        self.position(id).is_some()
    }

    pub fn clear(&mut self) {
        self.tickets.clear();
        debug!("Collection cleared");
    }

    /// First ticket in natural order
    pub fn head(&self) -> Option<&Ticket> {
        self.tickets.first()
    }

    pub fn remove_head(&mut self) -> Option<Ticket> {
        if self.tickets.is_empty() {
            None
        } else {
            Some(self.tickets.remove(0))
        }
    }

    /// Tickets in natural order
    pub fn iter(&self) -> impl Iterator<Item = &Ticket> {
        self.tickets.iter()
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    pub fn info(&self) -> StoreInfo {
        StoreInfo {
            kind: "priority queue of Ticket",
            initialized_at: self.initialized_at,
            len: self.tickets.len(),
        }
    }
}
