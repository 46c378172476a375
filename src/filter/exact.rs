//! Exact-set substitute for the Bloom filter.
//!
//! This is not a probabilistic filter. Membership is answered from the full
//! set of inserted keys, so there are neither false positives nor false
//! negatives, at the cost of memory proportional to the number of keys.
//! A bit vector is still maintained alongside so that [`FilterStats`]
//! reports the same fill figures a Bloom filter of this size would show.

use std::collections::BTreeSet;

use super::bloom::BloomFilter;
use super::{FilterMode, FilterStats, MembershipFilter};
use crate::error::FilterError;

#[derive(Clone, Debug, PartialEq)]
pub struct ExactSet {
    items: BTreeSet<String>,
    bits: BloomFilter,
}

impl ExactSet {
    /// Same dimension rules as [`BloomFilter::new`].
    pub fn new(size: usize, hash_count: usize) -> Result<Self, FilterError> {
        Ok(Self {
            items: BTreeSet::new(),
            bits: BloomFilter::new(size, hash_count)?,
        })
    }

    pub fn from_items<I, S>(size: usize, hash_count: usize, items: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::new(size, hash_count)?;
        for item in items {
            let item: String = item.into();
            set.insert(&item);
        }
        Ok(set)
    }

    /// Inserted keys in sorted order.
    pub fn items(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(String::as_str)
    }

    pub fn size(&self) -> usize {
        self.bits.size()
    }

    pub fn hash_count(&self) -> usize {
        self.bits.hash_count()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl MembershipFilter for ExactSet {
    fn insert(&mut self, key: &str) {
        if self.items.insert(key.to_string()) {
            self.bits.insert(key);
        }
    }

    fn might_contain(&self, key: &str) -> bool {
        self.items.contains(key)
    }

    fn stats(&self) -> FilterStats {
        FilterStats::new(
            FilterMode::Exact,
            self.bits.size(),
            self.bits.hash_count(),
            self.bits.set_bits(),
            self.items.len(),
            0.0,
        )
    }
}
