//! Count-Min frequency sketch with conservative update

use crate::sketch::{
    QueryResult, Sketch, decode, encode, key_string, positive_property, rate_property,
};
use serde::{Deserialize, Serialize};
use sketchio_common::{Error, Result, SketchInfo, SketchKind};
use std::collections::BTreeMap;
use xxhash_rust::xxh64::xxh64;

/// Relative error bound (fraction of the total count)
pub const PROP_ERROR: &str = "error";
/// Probability of exceeding the error bound
pub const PROP_DELTA: &str = "delta";
/// Expected number of distinct keys; when set, `delta` defaults to
/// `1 / capacity` and `error` to [`CAPACITY_ERROR`]
pub const PROP_CAPACITY: &str = "capacity";

const DEFAULT_ERROR: f64 = 0.001;
const DEFAULT_DELTA: f64 = 0.01;
/// Default error of capacity-sized sketches
pub const CAPACITY_ERROR: f64 = 0.01;

/// `depth` rows of `width` saturating counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountMinSketch {
    width: u32,
    depth: u32,
    counters: Vec<u32>,
    total: u64,
}

impl CountMinSketch {
    /// Create a sketch with explicit dimensions
    pub fn with_dimensions(width: u32, depth: u32) -> Result<Self> {
        if width == 0 || depth == 0 {
            return Err(Error::invalid_argument("count-min needs width > 0 and depth > 0"));
        }
        Ok(Self {
            width,
            depth,
            counters: vec![0; width as usize * depth as usize],
            total: 0,
        })
    }

    /// Create a sketch whose estimates exceed the true count by at most
    /// `error * total` with probability `1 - delta`
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn new(error: f64, delta: f64) -> Result<Self> {
        let width = (std::f64::consts::E / error).ceil().min(f64::from(u32::MAX / 64));
        let depth = (1.0 / delta).ln().ceil().clamp(1.0, 32.0);
        Self::with_dimensions(width as u32, depth as u32)
    }

    /// Create from metadata, filling in default properties
    ///
    /// Explicit `error` and `delta` win over the defaults derived from
    /// `capacity`.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_info(info: &mut SketchInfo) -> Result<Self> {
        let (default_error, default_delta) = match info.property(PROP_CAPACITY) {
            Some(capacity) if capacity != 0.0 => {
                let capacity = positive_property(PROP_CAPACITY, capacity)? as f64;
                (CAPACITY_ERROR, (1.0 / capacity).min(DEFAULT_DELTA))
            }
            _ => (DEFAULT_ERROR, DEFAULT_DELTA),
        };
        let error = info.property_or(PROP_ERROR, default_error);
        let delta = info.property_or(PROP_DELTA, default_delta);
        info.set_property(PROP_ERROR, error);
        info.set_property(PROP_DELTA, delta);
        Self::new(rate_property(PROP_ERROR, error)?, rate_property(PROP_DELTA, delta)?)
    }

    /// Restore a marshalled sketch
    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        let sketch: Self = decode(data)?;
        if sketch.width == 0
            || sketch.depth == 0
            || sketch.counters.len() != sketch.width as usize * sketch.depth as usize
        {
            return Err(Error::deserialization("count-min counters do not match dimensions"));
        }
        Ok(sketch)
    }

    /// Counters per row
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Number of rows
    pub const fn depth(&self) -> u32 {
        self.depth
    }

    #[allow(clippy::cast_possible_truncation)]
    fn cells(&self, data: &[u8]) -> impl Iterator<Item = usize> + use<> {
        let (width, depth) = (u64::from(self.width), u64::from(self.depth));
        let h1 = xxh64(data, 0);
        let h2 = xxh64(data, 1) | 1;
        (0..depth).map(move |row| (row * width + h1.wrapping_add(row.wrapping_mul(h2)) % width) as usize)
    }

    /// Count one occurrence of a key
    pub fn increment(&mut self, data: &[u8]) {
        let cells: Vec<usize> = self.cells(data).collect();
        let current = cells.iter().map(|&c| self.counters[c]).min().unwrap_or(0);
        let target = current.saturating_add(1);
        for cell in cells {
            if self.counters[cell] < target {
                self.counters[cell] = target;
            }
        }
        self.total += 1;
    }

    /// Estimated frequency of a key (never below the true count)
    pub fn frequency(&self, data: &[u8]) -> u64 {
        self.cells(data)
            .map(|c| u64::from(self.counters[c]))
            .min()
            .unwrap_or(0)
    }
}

impl Sketch for CountMinSketch {
    fn kind(&self) -> SketchKind {
        SketchKind::CountMin
    }

    fn add(&mut self, values: &[&[u8]]) -> Result<bool> {
        for value in values {
            self.increment(value);
        }
        Ok(true)
    }

    fn count(&self) -> u64 {
        self.total
    }

    fn query(&self, values: &[&[u8]]) -> QueryResult {
        let frequencies: BTreeMap<String, u64> = values
            .iter()
            .map(|v| (key_string(v), self.frequency(v)))
            .collect();
        QueryResult::Frequencies(frequencies)
    }

    fn marshal(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    fn reset(&mut self) {
        self.counters.fill(0);
        self.total = 0;
    }
}
