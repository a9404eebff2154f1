//! Space-Saving heavy hitters
//!
//! Tracks at most `size` keys. When full, a new key replaces the key with
//! the smallest count and inherits that count as its error bound.

use crate::sketch::{QueryResult, RankedItem, Sketch, decode, encode, key_string, positive_property};
use serde::{Deserialize, Serialize};
use sketchio_common::{Error, Result, SketchInfo, SketchKind};
use std::collections::BTreeMap;

/// Number of tracked keys
pub const PROP_SIZE: &str = "size";

const DEFAULT_SIZE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Counter {
    count: u64,
    error: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopK {
    size: usize,
    counters: BTreeMap<Vec<u8>, Counter>,
    total: u64,
}

impl TopK {
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::invalid_argument("top-k size must be positive"));
        }
        Ok(Self {
            size,
            counters: BTreeMap::new(),
            total: 0,
        })
    }

    /// Create from metadata, filling in the default size
    pub fn from_info(info: &mut SketchInfo) -> Result<Self> {
        let size = info.property_or(PROP_SIZE, DEFAULT_SIZE);
        info.set_property(PROP_SIZE, size);
        let size = positive_property(PROP_SIZE, size)?;
        Self::new(usize::try_from(size).map_err(|_| Error::invalid_argument("top-k size too large"))?)
    }

    /// Restore a marshalled sketch
    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        let topk: Self = decode(data)?;
        if topk.size == 0 || topk.counters.len() > topk.size {
            return Err(Error::deserialization("top-k holds more keys than its size"));
        }
        Ok(topk)
    }

    pub const fn size(&self) -> usize {
        self.size
    }

    /// Count one occurrence of a key
    pub fn offer(&mut self, data: &[u8]) {
        self.total += 1;
        if let Some(counter) = self.counters.get_mut(data) {
            counter.count += 1;
            return;
        }
        if self.counters.len() < self.size {
            self.counters.insert(data.to_vec(), Counter { count: 1, error: 0 });
            return;
        }
        // Smallest count; ties go to the smallest key
        let Some((victim, floor)) = self
            .counters
            .iter()
            .min_by_key(|(_, c)| c.count)
            .map(|(k, c)| (k.clone(), c.count))
        else {
            return;
        };
        self.counters.remove(&victim);
        self.counters.insert(
            data.to_vec(),
            Counter {
                count: floor + 1,
                error: floor,
            },
        );
    }

    /// Tracked keys, highest count first (ties by key)
    pub fn ranking(&self) -> Vec<RankedItem> {
        let mut items: Vec<RankedItem> = self
            .counters
            .iter()
            .map(|(key, c)| RankedItem {
                key: key_string(key),
                count: c.count,
                error: c.error,
            })
            .collect();
        items.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
        items
    }
}

impl Sketch for TopK {
    fn kind(&self) -> SketchKind {
        SketchKind::TopK
    }

    fn add(&mut self, values: &[&[u8]]) -> Result<bool> {
        for value in values {
            self.offer(value);
        }
        Ok(true)
    }

    fn count(&self) -> u64 {
        self.total
    }

    /// Full ranking when `values` is empty, otherwise only the listed keys
    fn query(&self, values: &[&[u8]]) -> QueryResult {
        let ranking = self.ranking();
        if values.is_empty() {
            return QueryResult::Ranking(ranking);
        }
        let wanted: Vec<String> = values.iter().map(|v| key_string(v)).collect();
        QueryResult::Ranking(
            ranking
                .into_iter()
                .filter(|item| wanted.contains(&item.key))
                .collect(),
        )
    }

    fn marshal(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    fn reset(&mut self) {
        self.counters.clear();
        self.total = 0;
    }
}
