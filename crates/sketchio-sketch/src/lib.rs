//! SketchIO Sketches - probabilistic data structures with persistence
//!
//! This crate provides:
//! - The [`Sketch`] capability trait and its query results
//! - Bloom filter, Count-Min, HyperLogLog, Space-Saving top-k and an exact
//!   dictionary
//! - Construction and restoration of sketches by kind
//! - The [`SketchProxy`], which batches mutations and persists sketches
//!   through a [`sketchio_storage::StorageManager`]

pub mod bloom;
pub mod count_min;
pub mod dict;
pub mod factory;
pub mod hyperloglog;
pub mod proxy;
pub mod sketch;
pub mod topk;

// Re-exports
pub use bloom::BloomFilter;
pub use count_min::CountMinSketch;
pub use dict::Dict;
pub use factory::{new_sketch, unmarshal};
pub use hyperloglog::HyperLogLog;
pub use proxy::{CountReport, ProxyOptions, SketchProxy};
pub use sketch::{QueryResult, RankedItem, Sketch};
pub use topk::TopK;
