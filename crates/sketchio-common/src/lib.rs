//! SketchIO Common - Shared types and utilities
//!
//! This crate provides the error type, configuration and identifier types
//! used across all SketchIO components.

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, LoggingConfig, PersistConfig, StorageConfig};
pub use error::{Error, Result};
pub use types::*;
