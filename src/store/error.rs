use ulid::Ulid;

use super::Collection;

#[derive(Debug)]
pub enum StoreError {
    /// The driver has no usable connection. Fatal for a benchmark run.
    Connection(String),
    CollectionNotFound(Collection),
    DuplicateKey(Ulid),
    WrongCollection {
        expected: Collection,
        id: Ulid,
    },
    WalError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Connection(msg) => write!(f, "connection error: {msg}"),
            StoreError::CollectionNotFound(c) => write!(f, "ns not found: {}", c.name()),
            StoreError::DuplicateKey(id) => write!(f, "duplicate key: {id}"),
            StoreError::WrongCollection { expected, id } => {
                write!(f, "document {id} does not belong in {}", expected.name())
            }
            StoreError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Returned by statistics calls the store cannot answer exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsUnavailable {
    pub collection: Collection,
    pub reason: String,
}

impl std::fmt::Display for StatsUnavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stats unavailable for {}: {}", self.collection.name(), self.reason)
    }
}

impl std::error::Error for StatsUnavailable {}
