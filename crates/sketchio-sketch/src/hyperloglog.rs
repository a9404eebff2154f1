//! HyperLogLog cardinality estimator
//!
//! `2^precision` one-byte registers. Small cardinalities fall back to
//! linear counting over the empty registers.

use crate::sketch::{QueryResult, Sketch, decode, encode};
use serde::{Deserialize, Serialize};
use sketchio_common::{Error, Result, SketchInfo, SketchKind};
use xxhash_rust::xxh64::xxh64;

/// Number of index bits
pub const PROP_PRECISION: &str = "precision";

const DEFAULT_PRECISION: u8 = 14;
const MIN_PRECISION: u8 = 4;
const MAX_PRECISION: u8 = 18;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperLogLog {
    precision: u8,
    registers: Vec<u8>,
}

impl HyperLogLog {
    pub fn new(precision: u8) -> Result<Self> {
        if !(MIN_PRECISION..=MAX_PRECISION).contains(&precision) {
            return Err(Error::invalid_argument(format!(
                "hyperloglog precision must be in {MIN_PRECISION}..={MAX_PRECISION}, got {precision}"
            )));
        }
        Ok(Self {
            precision,
            registers: vec![0; 1 << precision],
        })
    }

    /// Create from metadata, filling in the default precision
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_info(info: &mut SketchInfo) -> Result<Self> {
        let precision = info.property_or(PROP_PRECISION, f64::from(DEFAULT_PRECISION));
        if !precision.is_finite() || precision.fract() != 0.0 || precision < 0.0 || precision > 255.0 {
            return Err(Error::invalid_argument(format!(
                "property {PROP_PRECISION} must be an integer, got {precision}"
            )));
        }
        info.set_property(PROP_PRECISION, precision);
        Self::new(precision as u8)
    }

    /// Restore a marshalled estimator
    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        let hll: Self = decode(data)?;
        if !(MIN_PRECISION..=MAX_PRECISION).contains(&hll.precision)
            || hll.registers.len() != 1 << hll.precision
        {
            return Err(Error::deserialization("hyperloglog registers do not match precision"));
        }
        Ok(hll)
    }

    pub const fn precision(&self) -> u8 {
        self.precision
    }

    /// Observe a key. Returns true if a register grew.
    #[allow(clippy::cast_possible_truncation)]
    pub fn insert(&mut self, data: &[u8]) -> bool {
        let hash = xxh64(data, 0);
        let p = u32::from(self.precision);
        let index = (hash >> (64 - p)) as usize;
        // Rank of the first set bit in the remaining 64 - p bits
        let rest = hash << p;
        let rank = (rest.leading_zeros().min(64 - p) + 1) as u8;
        if rank > self.registers[index] {
            self.registers[index] = rank;
            true
        } else {
            false
        }
    }

    /// Estimated number of distinct keys observed
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn estimate(&self) -> u64 {
        let m = self.registers.len() as f64;
        let alpha = match self.registers.len() {
            16 => 0.673,
            32 => 0.697,
            64 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / m),
        };
        let sum: f64 = self
            .registers
            .iter()
            .map(|&r| 2f64.powi(-i32::from(r)))
            .sum();
        let raw = alpha * m * m / sum;

        let zeros = self.registers.iter().filter(|&&r| r == 0).count();
        let estimate = if raw <= 2.5 * m && zeros > 0 {
            m * (m / zeros as f64).ln()
        } else {
            raw
        };
        estimate.round() as u64
    }
}

impl Sketch for HyperLogLog {
    fn kind(&self) -> SketchKind {
        SketchKind::HyperLogLog
    }

    fn add(&mut self, values: &[&[u8]]) -> Result<bool> {
        for value in values {
            self.insert(value);
        }
        Ok(true)
    }

    fn count(&self) -> u64 {
        self.estimate()
    }

    fn query(&self, _values: &[&[u8]]) -> QueryResult {
        QueryResult::Cardinality(self.estimate())
    }

    fn marshal(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    fn reset(&mut self) {
        self.registers.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sketchio_common::SketchId;

    #[test]
    fn test_empty_is_zero() {
        let hll = HyperLogLog::new(14).unwrap();
        assert_eq!(hll.estimate(), 0);
    }

    #[test]
    fn test_small_cardinality_exact_enough() {
        let mut hll = HyperLogLog::new(14).unwrap();
        hll.add(&[b"a", b"b", b"c", b"a", b"b"]).unwrap();
        assert_eq!(hll.count(), 3);
        assert_eq!(hll.query(&[]), QueryResult::Cardinality(3));
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn test_large_cardinality_within_error() {
        let mut hll = HyperLogLog::new(14).unwrap();
        for i in 0..100_000u32 {
            hll.insert(&i.to_le_bytes());
        }
        let estimate = hll.estimate() as f64;
        let relative = (estimate - 100_000.0).abs() / 100_000.0;
        assert!(relative < 0.03, "estimate {estimate}");
    }

    #[test]
    fn test_precision_bounds() {
        assert!(HyperLogLog::new(3).is_err());
        assert!(HyperLogLog::new(19).is_err());

        let mut info = SketchInfo::new(SketchId::new("h").unwrap(), SketchKind::HyperLogLog)
            .with_property(PROP_PRECISION, 10.5);
        assert!(HyperLogLog::from_info(&mut info).is_err());
    }

    #[test]
    fn test_from_info_default() {
        let mut info = SketchInfo::new(SketchId::new("h").unwrap(), SketchKind::HyperLogLog);
        let hll = HyperLogLog::from_info(&mut info).unwrap();
        assert_eq!(hll.precision(), DEFAULT_PRECISION);
        assert_eq!(info.property(PROP_PRECISION), Some(14.0));
    }

    #[test]
    fn test_marshal_restores_state() {
        let mut hll = HyperLogLog::new(10).unwrap();
        hll.add(&[b"x", b"y"]).unwrap();
        let restored = HyperLogLog::unmarshal(&hll.marshal().unwrap()).unwrap();
        assert_eq!(restored.count(), 2);

        let mut tampered = hll.clone();
        tampered.registers.pop();
        assert!(HyperLogLog::unmarshal(&tampered.marshal().unwrap()).is_err());
    }
}
