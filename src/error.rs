//! Error types for the ledger, the membership filter and their stores.

use thiserror::Error;

/// Failures talking to a snapshot store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors surfaced by [`crate::ledger::Ledger`].
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The block was appended in memory but the chain could not be written out.
    /// Durability is at risk; the append must not be retried.
    #[error("block {index} appended but not persisted: {source}")]
    NotPersisted {
        index: u64,
        #[source]
        source: StorageError,
    },

    #[error("failed to read ledger store: {0}")]
    Load(#[source] StorageError),
}

/// Errors surfaced by [`crate::filter::Filter`].
#[derive(Debug, Error)]
pub enum FilterError {
    /// The key was recorded in memory but the filter state could not be written out.
    #[error("filter updated but not persisted: {0}")]
    NotPersisted(#[source] StorageError),

    #[error("invalid filter parameters: {0}")]
    InvalidParameters(String),

    #[error("failed to read filter store: {0}")]
    Load(#[source] StorageError),
}

/// Errors bringing up a [`crate::registry::MemoRegistry`] from settings.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Filter(#[from] FilterError),
}

/// Errors loading [`crate::config::Settings`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Source(#[from] ::config::ConfigError),

    #[error(transparent)]
    Filter(#[from] FilterError),
}
