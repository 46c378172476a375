//! Tamper-evident registry of memo content hashes.
//!
//! A single-writer hash-linked [`ledger::Ledger`] is the record of which
//! documents were registered, and a [`filter::Filter`] answers "possibly
//! seen before?" cheaply so most uploads skip the ledger scan.
//! [`registry::MemoRegistry`] composes the two on the write path.

pub mod blockchain;
pub mod config;
pub mod error;
pub mod filter;
pub mod ledger;
pub mod registry;
pub mod storage;
pub mod tx;

pub use blockchain::Block;
pub use error::{FilterError, LedgerError, RegistryError, StorageError};
pub use filter::{Filter, FilterMode, FilterParams, FilterStats, MembershipFilter};
pub use ledger::{Ledger, LedgerSummary, LoadOutcome};
pub use registry::{MemoRegistry, Registration};
pub use tx::{content_key, Transaction};
