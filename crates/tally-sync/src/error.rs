//! Error types for tally-sync

use thiserror::Error;

use crate::model::{EntityKind, LocalId};

/// Result type alias using tally-sync's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during synchronization
#[derive(Error, Debug)]
pub enum Error {
    /// A record's foreign key points at a record that has never been synced,
    /// so the relation cannot be expressed with a remote identifier.
    /// Indicates a push-ordering bug, not a transient condition.
    #[error("Unresolved {kind} relation for {local_id}")]
    RelationUnresolved { kind: EntityKind, local_id: LocalId },

    /// Network-level failure. Retryable: affected records stay dirty and
    /// are picked up by the next run.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The server refused the pushed record (validation, permissions, ...).
    #[error("Record rejected by server: {0}")]
    Rejected(String),

    /// Storage layer failure
    #[error("Store error: {0}")]
    Store(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A sync run was requested while another is still in flight
    #[error("A sync run is already in progress")]
    AlreadyRunning,

    /// Unexpected local fault; aborts the whole run
    #[error("Fatal sync failure: {0}")]
    Fatal(String),
}

impl Error {
    /// Soft errors isolate a dependency branch and let the rest of the run
    /// continue; everything else aborts the run.
    pub const fn is_soft(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Rejected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_rejected_are_soft() {
        assert!(Error::Transport("connection reset".into()).is_soft());
        assert!(Error::Rejected("name too long".into()).is_soft());
    }

    #[test]
    fn local_faults_are_fatal() {
        assert!(!Error::Store("disk full".into()).is_soft());
        assert!(!Error::Fatal("logic error".into()).is_soft());
        assert!(!Error::AlreadyRunning.is_soft());
    }
}
