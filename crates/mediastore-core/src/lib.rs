//! Mediastore Core Library
//!
//! This crate provides the configuration shared by every Mediastore component:
//! the storage backend selector and the construction-time `StorageConfig`.

pub mod config;
pub mod storage_types;

// Re-export commonly used types
pub use config::StorageConfig;
pub use storage_types::StorageBackend;
