//! Core type definitions for SketchIO
//!
//! Identifiers, sketch kinds and the per-sketch metadata record that is
//! persisted next to every data file.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Maximum length of a sketch identifier in bytes
pub const MAX_SKETCH_ID_LEN: usize = 255;

/// Logical identifier of a sketch
///
/// The identifier doubles as the file name of both the data file and the
/// metadata record, so it is restricted to names that are a single path
/// component.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(try_from = "String", into = "String")]
#[display("{_0}")]
pub struct SketchId(String);

impl SketchId {
    /// Create a new sketch id (validates the name)
    pub fn new(id: impl Into<String>) -> Result<Self, SketchIdError> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Get the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> Result<(), SketchIdError> {
        if id.is_empty() {
            return Err(SketchIdError::Empty);
        }
        if id.len() > MAX_SKETCH_ID_LEN {
            return Err(SketchIdError::TooLong);
        }
        if id == "." || id == ".." {
            return Err(SketchIdError::Reserved);
        }
        if let Some(c) = id.chars().find(|c| matches!(c, '/' | '\\' | '\0')) {
            return Err(SketchIdError::InvalidChar(c));
        }
        Ok(())
    }
}

impl fmt::Debug for SketchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SketchId({:?})", self.0)
    }
}

impl TryFrom<String> for SketchId {
    type Error = SketchIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SketchId> for String {
    fn from(id: SketchId) -> Self {
        id.0
    }
}

impl FromStr for SketchId {
    type Err = SketchIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for SketchId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Errors that can occur when creating a sketch id
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SketchIdError {
    #[error("sketch id must not be empty")]
    Empty,
    #[error("sketch id must be at most 255 bytes")]
    TooLong,
    #[error("sketch id cannot be '.' or '..'")]
    Reserved,
    #[error("sketch id contains invalid character: {0:?}")]
    InvalidChar(char),
}

/// Sketch variant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SketchKind {
    /// Set membership (Bloom filter)
    Bloom,
    /// Frequency estimation (Count-Min)
    CountMin,
    /// Cardinality estimation (HyperLogLog)
    HyperLogLog,
    /// Heavy hitters (Space-Saving)
    TopK,
    /// Exact multiset
    Dict,
}

impl SketchKind {
    /// All sketch kinds
    pub const ALL: [Self; 5] = [
        Self::Bloom,
        Self::CountMin,
        Self::HyperLogLog,
        Self::TopK,
        Self::Dict,
    ];

    /// Get the kind name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Bloom => "bloom",
            Self::CountMin => "count_min",
            Self::HyperLogLog => "hyper_log_log",
            Self::TopK => "top_k",
            Self::Dict => "dict",
        }
    }

    /// Whether keys can be removed from this kind of sketch
    #[must_use]
    pub const fn supports_removal(&self) -> bool {
        matches!(self, Self::Dict)
    }
}

impl fmt::Display for SketchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SketchKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bloom" | "bloom_filter" => Ok(Self::Bloom),
            "count_min" | "count-min" | "cms" | "cml" => Ok(Self::CountMin),
            "hyper_log_log" | "hyperloglog" | "hll" | "hllpp" => Ok(Self::HyperLogLog),
            "top_k" | "topk" | "top-k" => Ok(Self::TopK),
            "dict" | "dictionary" => Ok(Self::Dict),
            _ => Err(format!("unknown sketch kind: {}", s)),
        }
    }
}

/// Property counting successful `add` calls
pub const PROP_ADDS: &str = "adds";
/// Property counting `remove` calls
pub const PROP_REMOVES: &str = "removes";

/// Metadata record of a sketch, stored separately from its data file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SketchInfo {
    /// Sketch identifier
    pub id: SketchId,
    /// Sketch variant
    pub kind: SketchKind,
    /// Free-form numeric properties (sizing parameters, operation counters)
    #[serde(default)]
    pub properties: BTreeMap<String, f64>,
}

impl SketchInfo {
    /// Create a metadata record with no properties
    #[must_use]
    pub const fn new(id: SketchId, kind: SketchKind) -> Self {
        Self {
            id,
            kind,
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style property setter
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: f64) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    /// Get a property value
    #[must_use]
    pub fn property(&self, name: &str) -> Option<f64> {
        self.properties.get(name).copied()
    }

    /// Get a property value, falling back to `default` when absent or zero
    #[must_use]
    pub fn property_or(&self, name: &str, default: f64) -> f64 {
        match self.property(name) {
            Some(v) if v != 0.0 => v,
            _ => default,
        }
    }

    /// Set a property value
    pub fn set_property(&mut self, name: impl Into<String>, value: f64) {
        self.properties.insert(name.into(), value);
    }

    /// Increment a counter property by one
    pub fn bump(&mut self, name: &str) {
        *self.properties.entry(name.to_string()).or_insert(0.0) += 1.0;
    }
}
