//! Memo registration: the write path that composes the filter and the ledger.
//!
//! filter says "possibly present" → confirm with the ledger → if truly
//! absent, insert into the filter and append a block. The filter never
//! decides on its own that a memo exists.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::blockchain::Block;
use crate::config::{Backend, Settings};
use crate::error::{FilterError, LedgerError, RegistryError, StorageError};
use crate::filter::{Filter, FilterLoadOutcome};
use crate::ledger::{Ledger, LoadOutcome};
use crate::storage::{FileStore, SledStore};
use crate::tx::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Registration {
    /// A new block was appended for the memo.
    Created { block_index: u64 },
    /// The memo was already on the ledger; nothing was written.
    Exists { block_index: u64 },
}

impl Registration {
    pub fn block_index(&self) -> u64 {
        match self {
            Registration::Created { block_index } | Registration::Exists { block_index } => {
                *block_index
            }
        }
    }
}

/// What [`MemoRegistry::open`] found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenReport {
    pub ledger: LoadOutcome,
    pub filter: FilterLoadOutcome,
    /// Ledger keys the filter did not know about and were inserted at startup.
    pub reconciled: usize,
}

pub struct MemoRegistry {
    ledger: Arc<Ledger>,
    filter: Arc<Filter>,
    write: Mutex<()>,
}

impl MemoRegistry {
    pub fn new(ledger: Arc<Ledger>, filter: Arc<Filter>) -> Self {
        Self {
            ledger,
            filter,
            write: Mutex::new(()),
        }
    }

    /// Build the ledger and filter from the stores named by `settings`,
    /// then reconcile the filter with the ledger.
    pub fn open(settings: &Settings) -> Result<(Self, OpenReport), RegistryError> {
        let (ledger, ledger_outcome, filter, filter_outcome) = match settings.backend {
            Backend::Json => {
                let (ledger, lo) = Ledger::open(FileStore::new(settings.ledger_path()))?;
                let (filter, fo) =
                    Filter::open(settings.filter, FileStore::new(settings.filter_path()))?;
                (ledger, lo, filter, fo)
            }
            Backend::Sled => {
                let db = sled::open(settings.sled_path()).map_err(StorageError::from)?;
                let (ledger, lo) = Ledger::open(SledStore::open(&db, "ledger")?)?;
                let (filter, fo) = Filter::open(settings.filter, SledStore::open(&db, "filter")?)?;
                (ledger, lo, filter, fo)
            }
        };

        let registry = Self::new(Arc::new(ledger), Arc::new(filter));
        let reconciled = registry.reconcile()?;
        let report = OpenReport {
            ledger: ledger_outcome,
            filter: filter_outcome,
            reconciled,
        };
        Ok((registry, report))
    }

    /// Insert every ledger key the filter does not report as present.
    ///
    /// Afterwards the filter has no false negatives relative to the ledger,
    /// even if its own store was lost or recovered empty.
    pub fn reconcile(&self) -> Result<usize, FilterError> {
        let _guard = self.write.lock();
        let mut missing: Vec<String> = self
            .ledger
            .keys()
            .into_iter()
            .filter(|k| !self.filter.might_contain(k))
            .collect();
        missing.sort();
        missing.dedup();

        if missing.is_empty() {
            return Ok(0);
        }
        info!(count = missing.len(), "reconciling filter with ledger");
        self.filter.insert_many(missing.iter().map(String::as_str))?;
        Ok(missing.len())
    }

    /// Record `transaction` unless its key is already on the ledger.
    ///
    /// Registrations are serialized, so concurrent calls with the same key
    /// produce one block. A filter persistence failure is logged and does not
    /// stop the append; [`MemoRegistry::reconcile`] repairs the filter on the
    /// next start. A ledger persistence failure is returned as
    /// [`LedgerError::NotPersisted`] with the block already in memory.
    pub fn register(&self, transaction: Transaction) -> Result<Registration, LedgerError> {
        let _guard = self.write.lock();
        let key = transaction.hash.clone();

        if self.filter.might_contain(&key) {
            if let Some(block_index) = self.ledger.find(&key) {
                debug!(%key, block_index, "memo already registered");
                return Ok(Registration::Exists { block_index });
            }
            debug!(%key, "filter hit not on ledger");
        }

        if let Err(e) = self.filter.insert(&key) {
            warn!(%key, error = %e, "continuing without durable filter entry");
        }
        let block_index = self.ledger.append(transaction)?;
        info!(%key, block_index, "memo registered");
        Ok(Registration::Created { block_index })
    }

    /// Look a key up on the ledger directly, bypassing the filter.
    pub fn verify(&self, key: &str) -> Option<(u64, Block)> {
        let index = self.ledger.find(key)?;
        self.ledger.get(index).map(|block| (index, block))
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn filter(&self) -> &Arc<Filter> {
        &self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterMode, FilterParams};
    use crate::storage::MemoryStore;
    use crate::tx::content_key;

    fn registry(params: FilterParams) -> MemoRegistry {
        let (ledger, _) = Ledger::open(MemoryStore::new()).unwrap();
        let (filter, _) = Filter::open(params, MemoryStore::new()).unwrap();
        MemoRegistry::new(Arc::new(ledger), Arc::new(filter))
    }

    #[test]
    fn same_memo_registers_once() {
        let registry = registry(FilterParams::default());
        let key = content_key(b"memo body");

        let first = registry.register(Transaction::new(key.clone())).unwrap();
        let second = registry.register(Transaction::new(key.clone())).unwrap();

        assert_eq!(first, Registration::Created { block_index: 1 });
        assert_eq!(second, Registration::Exists { block_index: 1 });
        assert_eq!(registry.ledger().transactions_by_key(&key).len(), 1);
        assert_eq!(registry.ledger().block_count(), 2);
    }

    #[test]
    fn false_positive_is_vetoed_by_ledger() {
        // one bit: every lookup after the first insert is a hit
        let registry = registry(FilterParams {
            mode: FilterMode::Bloom,
            size: 1,
            hash_count: 1,
        });
        let a = content_key(b"a");
        let b = content_key(b"b");
        registry.register(Transaction::new(a)).unwrap();
        assert!(registry.filter().might_contain(&b));

        let outcome = registry.register(Transaction::new(b.clone())).unwrap();
        assert_eq!(outcome, Registration::Created { block_index: 2 });
        assert_eq!(registry.ledger().find(&b), Some(2));
    }

    #[test]
    fn reconcile_restores_keys_missing_from_filter() {
        let (ledger, _) = Ledger::open(MemoryStore::new()).unwrap();
        let key = content_key(b"appended directly");
        ledger.append(Transaction::new(key.clone())).unwrap();
        ledger.append(Transaction::new(key.clone())).unwrap();

        let (filter, _) = Filter::open(FilterParams::default(), MemoryStore::new()).unwrap();
        let registry = MemoRegistry::new(Arc::new(ledger), Arc::new(filter));
        assert!(!registry.filter().might_contain(&key));

        assert_eq!(registry.reconcile().unwrap(), 1);
        assert!(registry.filter().might_contain(&key));
        assert_eq!(registry.reconcile().unwrap(), 0);

        let outcome = registry.register(Transaction::new(key)).unwrap();
        assert_eq!(outcome, Registration::Exists { block_index: 1 });
    }

    #[test]
    fn verify_reads_the_ledger() {
        let registry = registry(FilterParams::default());
        let key = content_key(b"memo");
        registry
            .register(Transaction::new(key.clone()).with_field("filename", "memo.pdf"))
            .unwrap();

        let (index, block) = registry.verify(&key).unwrap();
        assert_eq!(index, 1);
        assert_eq!(block.transactions[0].field("filename"), Some("memo.pdf".into()));
        assert!(registry.verify(&content_key(b"other")).is_none());
    }

    #[test]
    fn registration_serializes_with_status_tag() {
        let value = serde_json::to_value(Registration::Exists { block_index: 4 }).unwrap();
        assert_eq!(value, serde_json::json!({"status": "exists", "block_index": 4}));
    }
}
