//! Bloom filter
//!
//! `m` bits and `k` probe positions per key, derived from the expected
//! number of keys (`capacity`) and the target false positive rate (`error`).
//! Probe positions use double hashing over two seeded xxh64 hashes.

use crate::sketch::{QueryResult, Sketch, decode, encode, key_string, positive_property, rate_property};
use serde::{Deserialize, Serialize};
use sketchio_common::{Error, Result, SketchInfo, SketchKind};
use std::collections::BTreeMap;
use xxhash_rust::xxh64::xxh64;

/// Expected number of keys
pub const PROP_CAPACITY: &str = "capacity";
/// Target false positive rate
pub const PROP_ERROR: &str = "error";

const DEFAULT_CAPACITY: f64 = 1_000_000.0;
const DEFAULT_ERROR: f64 = 0.01;

/// Bit-array membership filter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloomFilter {
    bits: Vec<u64>,
    /// Number of bits
    m: u64,
    /// Probes per key
    k: u32,
    /// Keys whose insertion set at least one new bit
    inserted: u64,
}

/// Estimate `(m, k)` for `n` keys at false positive rate `p`
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn estimate_parameters(n: u64, p: f64) -> (u64, u32) {
    let ln2 = std::f64::consts::LN_2;
    let m = (-(n as f64) * p.ln() / (ln2 * ln2)).ceil().max(64.0);
    let k = (ln2 * m / n as f64).ceil().clamp(1.0, 32.0);
    (m as u64, k as u32)
}

impl BloomFilter {
    /// Create a filter with explicit bit count and probe count
    pub fn with_params(m: u64, k: u32) -> Result<Self> {
        if m == 0 || k == 0 {
            return Err(Error::invalid_argument("bloom filter needs m > 0 and k > 0"));
        }
        let words = usize::try_from(m.div_ceil(64))
            .map_err(|_| Error::invalid_argument(format!("bloom filter of {m} bits too large")))?;
        Ok(Self {
            bits: vec![0; words],
            m,
            k,
            inserted: 0,
        })
    }

    /// Create a filter sized for `capacity` keys at false positive rate `error`
    pub fn new(capacity: u64, error: f64) -> Result<Self> {
        let (m, k) = estimate_parameters(capacity, error);
        Self::with_params(m, k)
    }

    /// Create from metadata, filling in default sizing properties
    pub fn from_info(info: &mut SketchInfo) -> Result<Self> {
        let capacity = info.property_or(PROP_CAPACITY, DEFAULT_CAPACITY);
        let error = info.property_or(PROP_ERROR, DEFAULT_ERROR);
        info.set_property(PROP_CAPACITY, capacity);
        info.set_property(PROP_ERROR, error);
        Self::new(
            positive_property(PROP_CAPACITY, capacity)?,
            rate_property(PROP_ERROR, error)?,
        )
    }

    /// Restore a marshalled filter
    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        let filter: Self = decode(data)?;
        if filter.m == 0 || filter.k == 0 || filter.bits.len() as u64 != filter.m.div_ceil(64) {
            return Err(Error::deserialization("bloom filter bit array does not match m"));
        }
        Ok(filter)
    }

    /// Number of bits
    pub const fn bits(&self) -> u64 {
        self.m
    }

    /// Probes per key
    pub const fn probes(&self) -> u32 {
        self.k
    }

    fn locations(&self, data: &[u8]) -> impl Iterator<Item = u64> + use<> {
        let h1 = xxh64(data, 0);
        let h2 = xxh64(data, 1) | 1;
        let m = self.m;
        (0..u64::from(self.k)).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % m)
    }

    /// Insert a key. Returns true if any bit changed.
    pub fn insert(&mut self, data: &[u8]) -> bool {
        let mut changed = false;
        for bit in self.locations(data) {
            let (word, mask) = ((bit / 64) as usize, 1u64 << (bit % 64));
            if self.bits[word] & mask == 0 {
                self.bits[word] |= mask;
                changed = true;
            }
        }
        if changed {
            self.inserted += 1;
        }
        changed
    }

    /// Test a key; false positives are possible, false negatives are not
    pub fn contains(&self, data: &[u8]) -> bool {
        self.locations(data).all(|bit| {
            let (word, mask) = ((bit / 64) as usize, 1u64 << (bit % 64));
            self.bits[word] & mask != 0
        })
    }
}

impl Sketch for BloomFilter {
    fn kind(&self) -> SketchKind {
        SketchKind::Bloom
    }

    fn add(&mut self, values: &[&[u8]]) -> Result<bool> {
        for value in values {
            self.insert(value);
        }
        Ok(true)
    }

    fn count(&self) -> u64 {
        self.inserted
    }

    fn query(&self, values: &[&[u8]]) -> QueryResult {
        let membership: BTreeMap<String, bool> = values
            .iter()
            .map(|v| (key_string(v), self.contains(v)))
            .collect();
        QueryResult::Membership(membership)
    }

    fn marshal(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    fn reset(&mut self) {
        self.bits.fill(0);
        self.inserted = 0;
    }
}
