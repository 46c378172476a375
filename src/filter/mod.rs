//! Write-path membership pre-check.
//!
//! [`MembershipFilter`] is the capability: `insert`, `might_contain`,
//! `stats`, with the guarantee that an inserted key is always reported as
//! present. Two implementations sit behind it:
//!
//! - [`BloomFilter`]: a true bit-vector Bloom filter (false positives possible).
//! - [`ExactSet`]: an exact key set. A documented substitute, not a
//!   probabilistic filter; it never reports false positives.
//!
//! [`Filter`] wraps whichever one is configured with a lock and a store.
//! A hit is only a hint: the ledger stays the authority on whether a key exists.

pub mod bloom;
pub mod exact;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{FilterError, StorageError};
use crate::storage::SnapshotStore;

pub use bloom::BloomFilter;
pub use exact::ExactSet;

/// Upper bound on seeds per key.
pub const MAX_HASH_COUNT: usize = 32;

pub trait MembershipFilter: Send + Sync {
    /// Record `key`. Inserting the same key again changes nothing.
    fn insert(&mut self, key: &str);

    /// `true` for every inserted key. May be `true` for others.
    fn might_contain(&self, key: &str) -> bool;

    fn stats(&self) -> FilterStats;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Exact,
    Bloom,
}

impl std::fmt::Display for FilterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterMode::Exact => write!(f, "exact"),
            FilterMode::Bloom => write!(f, "bloom"),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FilterStats {
    pub mode: FilterMode,
    pub size: usize,
    pub hash_count: usize,
    pub set_bits: usize,
    /// Fraction of bits set.
    pub load_factor: f64,
    /// Distinct keys inserted (exact), or inserts that set a new bit (bloom).
    pub items_added: usize,
    /// Chance a never-inserted key reads as present. Always 0 for the exact set.
    pub false_positive_rate: f64,
}

impl FilterStats {
    pub fn new(
        mode: FilterMode,
        size: usize,
        hash_count: usize,
        set_bits: usize,
        items_added: usize,
        false_positive_rate: f64,
    ) -> Self {
        let load_factor = if size == 0 {
            0.0
        } else {
            set_bits as f64 / size as f64
        };
        Self {
            mode,
            size,
            hash_count,
            set_bits,
            load_factor,
            items_added,
            false_positive_rate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterParams {
    pub mode: FilterMode,
    pub size: usize,
    pub hash_count: usize,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            mode: FilterMode::Exact,
            size: 10_000,
            hash_count: 3,
        }
    }
}

impl FilterParams {
    /// Bloom parameters sized for `expected_items` at `target_fpr`.
    pub fn bloom_for(expected_items: usize, target_fpr: f64) -> Self {
        let (size, hash_count) = bloom::optimal_parameters(expected_items, target_fpr);
        Self {
            mode: FilterMode::Bloom,
            size,
            hash_count,
        }
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        check_dimensions(self.size, self.hash_count)
    }
}

/// At least one bit and `1..=MAX_HASH_COUNT` seeds.
pub(crate) fn check_dimensions(size: usize, hash_count: usize) -> Result<(), FilterError> {
    if size == 0 {
        return Err(FilterError::InvalidParameters(
            "size must be at least 1 bit".into(),
        ));
    }
    if hash_count == 0 || hash_count > MAX_HASH_COUNT {
        return Err(FilterError::InvalidParameters(format!(
            "hash_count must be between 1 and {MAX_HASH_COUNT}, got {hash_count}"
        )));
    }
    Ok(())
}

/// How [`Filter::open`] arrived at its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterLoadOutcome {
    Fresh,
    Restored { items_added: usize },
    /// An exact snapshot was re-inserted into a filter with the configured
    /// parameters, which differ from the persisted ones.
    Rebuilt { items_added: usize },
    /// The store held something unreadable and an empty filter replaced it.
    Recovered { reason: String },
}

#[derive(Debug, Clone)]
enum FilterState {
    Bloom(BloomFilter),
    Exact(ExactSet),
}

impl FilterState {
    fn empty(params: &FilterParams) -> Result<Self, FilterError> {
        Ok(match params.mode {
            FilterMode::Bloom => Self::Bloom(BloomFilter::new(params.size, params.hash_count)?),
            FilterMode::Exact => Self::Exact(ExactSet::new(params.size, params.hash_count)?),
        })
    }

    fn as_filter(&self) -> &dyn MembershipFilter {
        match self {
            Self::Bloom(f) => f,
            Self::Exact(f) => f,
        }
    }

    fn as_filter_mut(&mut self) -> &mut dyn MembershipFilter {
        match self {
            Self::Bloom(f) => f,
            Self::Exact(f) => f,
        }
    }

    fn snapshot(&self) -> FilterSnapshot {
        match self {
            Self::Bloom(f) => FilterSnapshot {
                mode: FilterMode::Bloom,
                size: f.size(),
                hash_count: f.hash_count(),
                items_added: f.items_added(),
                bit_vector: Some(hex::encode(f.as_raw())),
                added_items: None,
            },
            Self::Exact(f) => FilterSnapshot {
                mode: FilterMode::Exact,
                size: f.size(),
                hash_count: f.hash_count(),
                items_added: f.len(),
                bit_vector: None,
                added_items: Some(f.items().map(str::to_string).collect()),
            },
        }
    }

    fn restore(
        snapshot: FilterSnapshot,
        params: &FilterParams,
    ) -> Result<(Self, FilterLoadOutcome), String> {
        let stored = FilterParams {
            mode: snapshot.mode,
            size: snapshot.size,
            hash_count: snapshot.hash_count,
        };
        stored.validate().map_err(|e| e.to_string())?;

        match snapshot.mode {
            FilterMode::Exact => {
                let items = snapshot
                    .added_items
                    .ok_or_else(|| "exact snapshot has no added_items".to_string())?;
                let mut state = Self::empty(params).map_err(|e| e.to_string())?;
                for item in &items {
                    state.as_filter_mut().insert(item);
                }
                let items_added = state.as_filter().stats().items_added;
                let outcome = if stored == *params {
                    FilterLoadOutcome::Restored { items_added }
                } else {
                    FilterLoadOutcome::Rebuilt { items_added }
                };
                Ok((state, outcome))
            }
            FilterMode::Bloom => {
                let hex_bits = snapshot
                    .bit_vector
                    .ok_or_else(|| "bloom snapshot has no bit_vector".to_string())?;
                let raw = hex::decode(hex_bits).map_err(|e| e.to_string())?;
                let filter =
                    BloomFilter::from_raw(raw, stored.size, stored.hash_count, snapshot.items_added)
                        .map_err(|e| e.to_string())?;
                if stored != *params {
                    warn!(
                        persisted_size = stored.size,
                        persisted_hash_count = stored.hash_count,
                        configured_mode = %params.mode,
                        "keeping persisted bloom filter; its keys cannot be re-derived"
                    );
                }
                let items_added = filter.items_added();
                Ok((Self::Bloom(filter), FilterLoadOutcome::Restored { items_added }))
            }
        }
    }
}

/// Persisted form: `{mode, size, hash_count, items_added, bit_vector | added_items}`.
/// `bit_vector` is the hex of the raw bytes, least significant bit first.
#[derive(Debug, Serialize, Deserialize)]
struct FilterSnapshot {
    mode: FilterMode,
    size: usize,
    hash_count: usize,
    #[serde(default)]
    items_added: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bit_vector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    added_items: Option<Vec<String>>,
}

/// Shared, persisted membership filter.
pub struct Filter {
    state: RwLock<FilterState>,
    store: Box<dyn SnapshotStore>,
}

impl Filter {
    pub fn open(
        params: FilterParams,
        store: impl SnapshotStore + 'static,
    ) -> Result<(Self, FilterLoadOutcome), FilterError> {
        params.validate()?;
        let stored = store.read().map_err(FilterError::Load)?;

        let (state, outcome) = match stored {
            None => (FilterState::empty(&params)?, FilterLoadOutcome::Fresh),
            Some(bytes) => {
                let restored = serde_json::from_slice::<FilterSnapshot>(&bytes)
                    .map_err(|e| e.to_string())
                    .and_then(|snapshot| FilterState::restore(snapshot, &params));
                match restored {
                    Ok(restored) => restored,
                    Err(reason) => (
                        FilterState::empty(&params)?,
                        FilterLoadOutcome::Recovered { reason },
                    ),
                }
            }
        };

        let filter = Self {
            state: RwLock::new(state),
            store: Box::new(store),
        };

        match &outcome {
            FilterLoadOutcome::Fresh => {
                info!(store = %filter.store.location(), mode = %params.mode, "created empty filter");
            }
            FilterLoadOutcome::Restored { items_added } => {
                info!(store = %filter.store.location(), items_added, "filter restored");
            }
            FilterLoadOutcome::Rebuilt { items_added } => {
                info!(
                    store = %filter.store.location(),
                    items_added,
                    mode = %params.mode,
                    "filter rebuilt with configured parameters"
                );
            }
            FilterLoadOutcome::Recovered { reason } => {
                warn!(
                    store = %filter.store.location(),
                    %reason,
                    "filter store unreadable, starting empty"
                );
            }
        }
        if !matches!(outcome, FilterLoadOutcome::Restored { .. }) {
            if let Err(e) = filter.persist(&filter.state.read()) {
                warn!(error = %e, "failed to write initial filter state");
            }
        }

        Ok((filter, outcome))
    }

    /// Record `key` and persist. On [`FilterError::NotPersisted`] the key is
    /// already recorded in memory.
    pub fn insert(&self, key: &str) -> Result<(), FilterError> {
        self.insert_many(std::iter::once(key))
    }

    /// Record every key, persisting once at the end.
    pub fn insert_many<'a, I>(&self, keys: I) -> Result<(), FilterError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut state = self.state.write();
        let mut count = 0usize;
        for key in keys {
            state.as_filter_mut().insert(key);
            count += 1;
        }
        debug!(count, "filter insert");

        self.persist(&state).map_err(|e| {
            warn!(error = %e, "filter updated but not persisted");
            FilterError::NotPersisted(e)
        })
    }

    pub fn might_contain(&self, key: &str) -> bool {
        self.state.read().as_filter().might_contain(key)
    }

    pub fn stats(&self) -> FilterStats {
        self.state.read().as_filter().stats()
    }

    pub fn mode(&self) -> FilterMode {
        match &*self.state.read() {
            FilterState::Bloom(_) => FilterMode::Bloom,
            FilterState::Exact(_) => FilterMode::Exact,
        }
    }

    fn persist(&self, state: &FilterState) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(&state.snapshot())?;
        self.store.write(&bytes)
    }
}
