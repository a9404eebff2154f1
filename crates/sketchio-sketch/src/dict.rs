//! Exact frequency dictionary
//!
//! The only variant that supports removal. A key whose count drops to zero
//! is forgotten.

use crate::sketch::{QueryResult, Sketch, decode, encode, key_string};
use serde::{Deserialize, Serialize};
use sketchio_common::{Result, SketchKind};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dict {
    counts: BTreeMap<Vec<u8>, u64>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        decode(data)
    }

    /// Exact count of a key
    pub fn get(&self, data: &[u8]) -> u64 {
        self.counts.get(data).copied().unwrap_or(0)
    }
}

impl Sketch for Dict {
    fn kind(&self) -> SketchKind {
        SketchKind::Dict
    }

    fn add(&mut self, values: &[&[u8]]) -> Result<bool> {
        for value in values {
            *self.counts.entry(value.to_vec()).or_default() += 1;
        }
        Ok(true)
    }

    /// Decrement each key; returns false if any key was absent
    fn remove(&mut self, values: &[&[u8]]) -> Result<bool> {
        let mut all_present = true;
        for value in values {
            match self.counts.get_mut(*value) {
                Some(count) if *count > 1 => *count -= 1,
                Some(_) => {
                    self.counts.remove(*value);
                }
                None => all_present = false,
            }
        }
        Ok(all_present)
    }

    /// Number of distinct keys
    fn count(&self) -> u64 {
        self.counts.len() as u64
    }

    /// Counts of the listed keys, or of every key when `values` is empty
    fn query(&self, values: &[&[u8]]) -> QueryResult {
        let frequencies = if values.is_empty() {
            self.counts
                .iter()
                .map(|(k, &c)| (key_string(k), c))
                .collect()
        } else {
            values
                .iter()
                .map(|v| (key_string(v), self.get(v)))
                .collect()
        };
        QueryResult::Frequencies(frequencies)
    }

    fn marshal(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    fn reset(&mut self) {
        self.counts.clear();
    }
}
