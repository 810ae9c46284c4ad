//! JSON file persistence for the ticket collection.
//!
//! The server loads the collection once at startup and writes it back once
//! after the event loop stops. The protocol layer never calls into this
//! module and nothing here is retried.

use crate::model::Ticket;
use crate::storage::{CollectionStore, StoreError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read '{path}': {source}", path = .0.display(), source = .1)]
    Read(PathBuf, #[source] io::Error),
    #[error("failed to write '{path}': {source}", path = .0.display(), source = .1)]
    Write(PathBuf, #[source] io::Error),
    #[error("'{path}' is not a valid ticket document: {source}", path = .0.display(), source = .1)]
    Parse(PathBuf, #[source] serde_json::Error),
    #[error("failed to serialize collection: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("'{path}' contains an invalid collection: {source}", path = .0.display(), source = .1)]
    Invalid(PathBuf, #[source] StoreError),
}

/// Collection stored as a JSON array of tickets.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the collection. A missing or blank file yields an empty one.
    pub fn load_initial(&self) -> Result<CollectionStore, PersistenceError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "Data file not found, starting empty");
                return Ok(CollectionStore::new());
            }
            Err(e) => return Err(PersistenceError::Read(self.path.clone(), e)),
        };

        let trimmed = contents.trim();
        if trimmed.is_empty() || trimmed == "{}" {
            warn!(path = %self.path.display(), "Data file is empty, starting empty");
            return Ok(CollectionStore::new());
        }

        let tickets: Vec<Ticket> = serde_json::from_str(trimmed)
            .map_err(|e| PersistenceError::Parse(self.path.clone(), e))?;
        let store = CollectionStore::from_tickets(tickets)
            .map_err(|e| PersistenceError::Invalid(self.path.clone(), e))?;

        info!(path = %self.path.display(), items = store.len(), "Collection loaded");
        Ok(store)
    }

    /// Write the collection, replacing the file atomically.
    pub fn persist(&self, store: &CollectionStore) -> Result<(), PersistenceError> {
        let tickets: Vec<&Ticket> = store.iter().collect();
        let json = serde_json::to_string_pretty(&tickets)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, json).map_err(|e| PersistenceError::Write(tmp.clone(), e))?;
        fs::rename(&tmp, &self.path).map_err(|e| PersistenceError::Write(self.path.clone(), e))?;

        info!(path = %self.path.display(), items = store.len(), "Collection saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::sample_ticket;

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonFileStore::new(dir.path().join("tickets.json"));

        let mut store = CollectionStore::new();
        store.insert(sample_ticket(0, "a", 2.0));
        store.insert(sample_ticket(0, "b", 1.0));
        file.persist(&store).unwrap();

        let loaded = file.load_initial().unwrap();
        let original: Vec<&Ticket> = store.iter().collect();
        let reloaded: Vec<&Ticket> = loaded.iter().collect();
        assert_eq!(original, reloaded);
    }

    #[test]
    fn test_missing_and_blank_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tickets.json");
        assert!(JsonFileStore::new(&path).load_initial().unwrap().is_empty());

        fs::write(&path, "  {} \n").unwrap();
        assert!(JsonFileStore::new(&path).load_initial().unwrap().is_empty());
    }

    #[test]
    fn test_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tickets.json");
        fs::write(&path, "[{\"id\": ").unwrap();
        assert!(matches!(
            JsonFileStore::new(&path).load_initial(),
            Err(PersistenceError::Parse(..))
        ));
    }

    #[test]
    fn test_invalid_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tickets.json");
        let tickets = vec![sample_ticket(4, "a", 1.0), sample_ticket(4, "b", 1.0)];
        fs::write(&path, serde_json::to_string(&tickets).unwrap()).unwrap();
        assert!(matches!(
            JsonFileStore::new(&path).load_initial(),
            Err(PersistenceError::Invalid(_, StoreError::DuplicateId(4)))
        ));
    }
}
