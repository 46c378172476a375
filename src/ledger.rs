//! The append-only, hash-linked ledger.
//!
//! A [`Ledger`] owns its chain and the store it is persisted to. The chain
//! always starts with a genesis block and only ever grows through
//! [`Ledger::append`]; every append rewrites the whole chain to the store.

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::blockchain::{Block, GENESIS_PREVIOUS_HASH};
use crate::error::{LedgerError, StorageError};
use crate::storage::SnapshotStore;
use crate::tx::Transaction;

/// How [`Ledger::open`] arrived at its chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Nothing was stored; a genesis-only chain was created.
    Fresh,
    /// The stored chain was loaded and validates.
    Restored { blocks: usize },
    /// The store held something unreadable. It was replaced with a
    /// genesis-only chain; whatever history it held is lost.
    Recovered { reason: String },
    /// The stored chain was loaded but fails validation at `first_invalid`.
    /// It is kept as-is and never repaired.
    Invalid { blocks: usize, first_invalid: u64 },
}

/// Aggregate view polled by health endpoints.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LedgerSummary {
    pub total_blocks: usize,
    pub total_transactions: usize,
    pub latest_block: Option<Block>,
    pub is_valid: bool,
}

/// One occurrence of a key in the chain.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TransactionRecord {
    pub block_index: u64,
    pub transaction: Transaction,
    pub block_timestamp: String,
}

pub struct Ledger {
    chain: RwLock<Vec<Block>>,
    store: Box<dyn SnapshotStore>,
}

impl Ledger {
    /// Rebuild the ledger from `store`, or start a new chain if it holds
    /// nothing usable.
    ///
    /// Only a failure to *read* the store is an error. Malformed contents
    /// and integrity failures are reported through [`LoadOutcome`].
    pub fn open(store: impl SnapshotStore + 'static) -> Result<(Self, LoadOutcome), LedgerError> {
        let stored = store.read().map_err(LedgerError::Load)?;

        let (chain, outcome) = match stored {
            None => (vec![Block::genesis()], LoadOutcome::Fresh),
            Some(bytes) => match decode_chain(&bytes) {
                Ok(chain) => {
                    let blocks = chain.len();
                    let outcome = match first_invalid(&chain) {
                        None => LoadOutcome::Restored { blocks },
                        Some(first_invalid) => LoadOutcome::Invalid {
                            blocks,
                            first_invalid,
                        },
                    };
                    (chain, outcome)
                }
                Err(reason) => (vec![Block::genesis()], LoadOutcome::Recovered { reason }),
            },
        };

        let ledger = Self {
            chain: RwLock::new(chain),
            store: Box::new(store),
        };

        match &outcome {
            LoadOutcome::Fresh => {
                info!(store = %ledger.store.location(), "created genesis block");
                ledger.write_initial();
            }
            LoadOutcome::Recovered { reason } => {
                warn!(
                    store = %ledger.store.location(),
                    %reason,
                    "ledger store unreadable, starting a new chain"
                );
                ledger.write_initial();
            }
            LoadOutcome::Restored { blocks } => {
                info!(store = %ledger.store.location(), blocks, "ledger restored");
            }
            LoadOutcome::Invalid {
                blocks,
                first_invalid,
            } => {
                warn!(
                    store = %ledger.store.location(),
                    blocks,
                    first_invalid,
                    "restored ledger fails validation"
                );
            }
        }

        Ok((ledger, outcome))
    }

    /// Seal `transaction` into a new block at the tail and persist the chain.
    ///
    /// Returns the new block's index, which is the chain length before the
    /// call. On [`LedgerError::NotPersisted`] the block is already part of
    /// the in-memory chain.
    pub fn append(&self, transaction: Transaction) -> Result<u64, LedgerError> {
        let mut chain = self.chain.write();
        let index = chain.len() as u64;
        let previous_hash = chain
            .last()
            .map(|b| b.block_hash.clone())
            .unwrap_or_else(|| GENESIS_PREVIOUS_HASH.to_string());

        let block = Block::new(index, vec![transaction], previous_hash);
        debug!(index, hash = %block.block_hash, "appending block");
        chain.push(block);

        match self.persist(&chain) {
            Ok(()) => Ok(index),
            Err(source) => {
                warn!(index, error = %source, "block appended but not persisted");
                Err(LedgerError::NotPersisted { index, source })
            }
        }
    }

    /// Index of the oldest block carrying a transaction keyed `key`.
    pub fn find(&self, key: &str) -> Option<u64> {
        self.chain
            .read()
            .iter()
            .find(|b| b.contains_key(key))
            .map(|b| b.index)
    }

    /// Newest transaction whose field `field` equals `value`, with its block index.
    pub fn find_latest_by_field(&self, field: &str, value: &Value) -> Option<(u64, Transaction)> {
        let chain = self.chain.read();
        chain.iter().rev().find_map(|b| {
            b.transactions
                .iter()
                .rev()
                .find(|tx| tx.field_matches(field, value))
                .map(|tx| (b.index, tx.clone()))
        })
    }

    /// Every occurrence of `key`, oldest first.
    pub fn transactions_by_key(&self, key: &str) -> Vec<TransactionRecord> {
        let chain = self.chain.read();
        chain
            .iter()
            .flat_map(|b| {
                b.transactions
                    .iter()
                    .filter(move |tx| tx.hash == key)
                    .map(move |tx| TransactionRecord {
                        block_index: b.index,
                        transaction: tx.clone(),
                        block_timestamp: b.timestamp.clone(),
                    })
            })
            .collect()
    }

    pub fn get(&self, index: u64) -> Option<Block> {
        let chain = self.chain.read();
        usize::try_from(index)
            .ok()
            .and_then(|i| chain.get(i))
            .cloned()
    }

    pub fn latest_block(&self) -> Option<Block> {
        self.chain.read().last().cloned()
    }

    /// Number of blocks, genesis included.
    pub fn block_count(&self) -> usize {
        self.chain.read().len()
    }

    pub fn total_transactions(&self) -> usize {
        total_transactions(&self.chain.read())
    }

    /// Copy of the whole chain.
    pub fn blocks(&self) -> Vec<Block> {
        self.chain.read().clone()
    }

    /// Every transaction key in chain order, duplicates included.
    pub fn keys(&self) -> Vec<String> {
        self.chain
            .read()
            .iter()
            .flat_map(|b| b.transactions.iter().map(|tx| tx.hash.clone()))
            .collect()
    }

    /// Whether every block's stored hash and parent link check out.
    pub fn validate(&self) -> bool {
        self.first_invalid_block().is_none()
    }

    /// Index of the first block that fails validation.
    pub fn first_invalid_block(&self) -> Option<u64> {
        let bad = first_invalid(&self.chain.read());
        if let Some(index) = bad {
            warn!(index, "chain integrity violation");
        }
        bad
    }

    pub fn summary(&self) -> LedgerSummary {
        let chain = self.chain.read();
        LedgerSummary {
            total_blocks: chain.len(),
            total_transactions: total_transactions(&chain),
            latest_block: chain.last().cloned(),
            is_valid: first_invalid(&chain).is_none(),
        }
    }

    // A failure here leaves a usable in-memory chain; the next append retries the write.
    fn write_initial(&self) {
        if let Err(e) = self.persist(&self.chain.read()) {
            warn!(error = %e, "failed to write genesis chain");
        }
    }

    fn persist(&self, chain: &[Block]) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(chain)?;
        self.store.write(&bytes)
    }
}

fn decode_chain(bytes: &[u8]) -> Result<Vec<Block>, String> {
    let chain: Vec<Block> = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
    if chain.is_empty() {
        return Err("stored chain has no genesis block".to_string());
    }
    Ok(chain)
}

fn total_transactions(chain: &[Block]) -> usize {
    chain.iter().map(|b| b.transactions.len()).sum()
}

// Walks from block 1; genesis has no predecessor to link against.
fn first_invalid(chain: &[Block]) -> Option<u64> {
    chain.windows(2).enumerate().find_map(|(i, pair)| {
        let (prev, cur) = (&pair[0], &pair[1]);
        let position = (i + 1) as u64;
        let ok = cur.index == position
            && cur.hash_matches()
            && cur.previous_hash == prev.block_hash;
        (!ok).then_some(position)
    })
}
