//! SketchIO Storage Engine - sketch persistence
//!
//! This crate implements the storage layer underneath the sketch proxies:
//! - Offset-keyed write-back page cache with dirty-aware LRU eviction
//! - Random-access data files whose I/O goes through that cache
//! - A bounded registry mapping sketch ids to open data files
//! - JSON metadata records stored next to the data files

pub mod file;
pub mod info;
pub mod page_cache;
pub mod registry;

// Re-exports
pub use file::CachedFile;
pub use info::InfoStore;
pub use page_cache::{CacheEntry, CacheStats, EvictCallback, PageCache};
pub use registry::StorageManager;
