//! Sketch capability interface
//!
//! Every sketch variant implements [`Sketch`]. Variants that cannot remove
//! keys keep the default [`Sketch::remove`], which returns
//! [`Error::Unsupported`] without touching state.

use serde::Serialize;
use sketchio_common::{Error, Result, SketchKind};
use std::collections::BTreeMap;
use std::fmt;

/// One entry of a heavy-hitter ranking
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedItem {
    pub key: String,
    pub count: u64,
    /// Maximum overestimation of `count`
    pub error: u64,
}

/// Sketch-specific answer to a count query
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum QueryResult {
    /// Exact or estimated number of distinct keys
    Cardinality(u64),
    /// Per-key membership test
    Membership(BTreeMap<String, bool>),
    /// Per-key (estimated) frequency
    Frequencies(BTreeMap<String, u64>),
    /// Most frequent keys, highest count first
    Ranking(Vec<RankedItem>),
}

/// Operations every sketch variant supports
pub trait Sketch: Send + Sync + fmt::Debug {
    /// Sketch variant
    fn kind(&self) -> SketchKind;

    /// Add keys
    fn add(&mut self, values: &[&[u8]]) -> Result<bool>;

    /// Remove keys
    fn remove(&mut self, values: &[&[u8]]) -> Result<bool> {
        let _ = values;
        Err(Error::unsupported(format!(
            "{} sketches do not support removal",
            self.kind()
        )))
    }

    /// Exact or estimated count (meaning depends on the variant)
    fn count(&self) -> u64;

    /// Answer a query for `values`
    fn query(&self, values: &[&[u8]]) -> QueryResult;

    /// Serialize the sketch state
    fn marshal(&self) -> Result<Vec<u8>>;

    /// Reset to empty, keeping the sizing parameters
    fn reset(&mut self);
}

/// Render a key for result maps
pub(crate) fn key_string(value: &[u8]) -> String {
    String::from_utf8_lossy(value).into_owned()
}

/// Serialize a sketch with bincode
pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(Error::serialization)
}

/// Deserialize a sketch with bincode
pub(crate) fn decode<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
    bincode::deserialize(data).map_err(Error::deserialization)
}

/// Read a sizing property as an integer, rejecting non-positive values
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn positive_property(name: &str, value: f64) -> Result<u64> {
    if !value.is_finite() || value < 1.0 {
        return Err(Error::invalid_argument(format!(
            "property {name} must be a positive number, got {value}"
        )));
    }
    Ok(value as u64)
}

/// Read a rate property, which must lie strictly between 0 and 1
pub(crate) fn rate_property(name: &str, value: f64) -> Result<f64> {
    if !(value > 0.0 && value < 1.0) {
        return Err(Error::invalid_argument(format!(
            "property {name} must be between 0 and 1, got {value}"
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_result_json_shape() {
        let mut freq = BTreeMap::new();
        freq.insert("a".to_string(), 2);
        let json = serde_json::to_value(QueryResult::Frequencies(freq)).unwrap();
        assert_eq!(json["type"], "frequencies");
        assert_eq!(json["value"]["a"], 2);
    }

    #[test]
    fn test_property_validation() {
        assert_eq!(positive_property("capacity", 10.0).unwrap(), 10);
        assert!(positive_property("capacity", 0.5).is_err());
        assert!(positive_property("capacity", f64::NAN).is_err());
        assert!(rate_property("error", 0.01).is_ok());
        assert!(rate_property("error", 1.0).is_err());
    }
}
