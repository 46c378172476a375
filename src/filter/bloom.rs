//! Bit-vector Bloom filter.
//!
//! Inserting a key sets `hash_count` positions, one per seed:
//! `murmur3_x64_128(key, seed) mod size` for `seed` in `0..hash_count`.
//! A lookup answers "possibly present" only if every position is set.

use std::f64::consts::LN_2;
use std::io::Cursor;

use bitvec::prelude::*;

use super::{check_dimensions, FilterMode, FilterStats, MembershipFilter};
use crate::error::FilterError;

#[derive(Clone, Debug, PartialEq)]
pub struct BloomFilter {
    bits: BitVec<u8, Lsb0>,
    hash_count: usize,
    /// Inserts that flipped at least one bit. Repeat inserts never count, so
    /// this estimates distinct keys from below.
    items_added: usize,
}

impl BloomFilter {
    /// An empty filter of `size` bits. Fails unless `size >= 1` and
    /// `hash_count` is in `1..=MAX_HASH_COUNT`.
    pub fn new(size: usize, hash_count: usize) -> Result<Self, FilterError> {
        check_dimensions(size, hash_count)?;
        Ok(Self {
            bits: bitvec![u8, Lsb0; 0; size],
            hash_count,
            items_added: 0,
        })
    }

    /// Rebuild from persisted raw bytes (LSB-first within each byte).
    pub fn from_raw(
        raw: Vec<u8>,
        size: usize,
        hash_count: usize,
        items_added: usize,
    ) -> Result<Self, FilterError> {
        check_dimensions(size, hash_count)?;
        if raw.len() != size.div_ceil(8) {
            return Err(FilterError::InvalidParameters(format!(
                "bit vector holds {} bytes, expected {} for {size} bits",
                raw.len(),
                size.div_ceil(8)
            )));
        }
        let mut bits = BitVec::<u8, Lsb0>::from_vec(raw);
        bits.truncate(size);
        Ok(Self {
            bits,
            hash_count,
            items_added,
        })
    }

    pub fn as_raw(&self) -> &[u8] {
        self.bits.as_raw_slice()
    }

    pub fn size(&self) -> usize {
        self.bits.len()
    }

    pub fn hash_count(&self) -> usize {
        self.hash_count
    }

    pub fn items_added(&self) -> usize {
        self.items_added
    }

    pub fn set_bits(&self) -> usize {
        self.bits.count_ones()
    }

    /// Probability that a never-inserted key reads as present, given the
    /// current fill: `load_factor ^ hash_count`.
    pub fn false_positive_rate(&self) -> f64 {
        let load = self.set_bits() as f64 / self.size() as f64;
        load.powi(self.hash_count as i32)
    }

    fn positions<'a>(&self, key: &'a str) -> impl Iterator<Item = usize> + 'a {
        let size = self.size() as u64;
        (0..self.hash_count as u32).map(move |seed| {
            let mut cursor = Cursor::new(key.as_bytes());
            let hash = murmur3::murmur3_x64_128(&mut cursor, seed).unwrap_or_default();
            (hash as u64 % size) as usize
        })
    }
}

impl MembershipFilter for BloomFilter {
    fn insert(&mut self, key: &str) {
        let mut flipped = false;
        for pos in self.positions(key).collect::<Vec<_>>() {
            if !self.bits[pos] {
                self.bits.set(pos, true);
                flipped = true;
            }
        }
        if flipped {
            self.items_added += 1;
        }
    }

    fn might_contain(&self, key: &str) -> bool {
        self.positions(key).all(|pos| self.bits[pos])
    }

    fn stats(&self) -> FilterStats {
        FilterStats::new(
            FilterMode::Bloom,
            self.size(),
            self.hash_count,
            self.set_bits(),
            self.items_added,
            self.false_positive_rate(),
        )
    }
}

/// Size and hash count for `expected_items` keys at `target_fpr`:
/// `m = -n ln(p) / ln(2)^2`, `k = (m / n) ln(2)`.
pub fn optimal_parameters(expected_items: usize, target_fpr: f64) -> (usize, usize) {
    if expected_items == 0 || !(target_fpr > 0.0 && target_fpr < 1.0) {
        return (1, 1);
    }
    let n = expected_items as f64;
    let m = (-n * target_fpr.ln() / (LN_2 * LN_2)).ceil() as usize;
    let k = ((m as f64 / n) * LN_2).round() as usize;
    (m.max(1), k.clamp(1, super::MAX_HASH_COUNT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn insert_sets_at_most_hash_count_bits() {
        let mut filter = BloomFilter::new(10_000, 3).unwrap();
        filter.insert("memo");
        let set = filter.set_bits();
        assert!((1..=3).contains(&set));
        assert_eq!(filter.items_added(), 1);
        assert!(filter.might_contain("memo"));
    }

    #[test]
    fn reinsert_is_idempotent() {
        let mut filter = BloomFilter::new(1_000, 4).unwrap();
        filter.insert("memo");
        let snapshot = filter.clone();
        filter.insert("memo");
        assert_eq!(filter, snapshot);
    }

    #[test]
    fn empty_filter_contains_nothing() {
        let filter = BloomFilter::new(1_000, 3).unwrap();
        assert!(!filter.might_contain("memo"));
        assert_eq!(filter.false_positive_rate(), 0.0);
    }

    #[test]
    fn saturated_filter_reports_everything() {
        let mut filter = BloomFilter::new(8, 2).unwrap();
        for n in 0..200 {
            filter.insert(&n.to_string());
        }
        assert_eq!(filter.set_bits(), 8);
        assert!(filter.might_contain("never inserted"));
        assert_eq!(filter.false_positive_rate(), 1.0);
    }

    #[test]
    fn raw_round_trip_preserves_answers() {
        let mut filter = BloomFilter::new(1_001, 3).unwrap();
        for n in 0..50 {
            filter.insert(&format!("key-{n}"));
        }
        let restored =
            BloomFilter::from_raw(filter.as_raw().to_vec(), 1_001, 3, filter.items_added())
                .unwrap();
        assert_eq!(restored, filter);
    }

    #[test]
    fn raw_with_wrong_length_is_rejected() {
        assert!(BloomFilter::from_raw(vec![0; 3], 1_000, 3, 0).is_err());
        assert!(BloomFilter::from_raw(Vec::new(), 0, 3, 0).is_err());
    }

    #[test]
    fn degenerate_dimensions_are_rejected() {
        assert!(matches!(
            BloomFilter::new(0, 3),
            Err(FilterError::InvalidParameters(_))
        ));
        assert!(BloomFilter::new(64, 0).is_err());
        assert!(BloomFilter::new(64, crate::filter::MAX_HASH_COUNT + 1).is_err());
        assert!(BloomFilter::new(1, 1).is_ok());
    }

    #[test]
    fn optimal_parameters_follow_standard_formulas() {
        let (m, k) = optimal_parameters(10_000, 0.01);
        assert_eq!(m, 95_851);
        assert_eq!(k, 7);
        assert_eq!(optimal_parameters(0, 0.01), (1, 1));
    }

    proptest! {
        #[test]
        fn no_false_negatives(keys in proptest::collection::vec("[0-9a-f]{64}", 1..200)) {
            let mut filter = BloomFilter::new(2_048, 3).unwrap();
            for key in &keys {
                filter.insert(key);
            }
            for key in &keys {
                prop_assert!(filter.might_contain(key));
            }
        }
    }
}
