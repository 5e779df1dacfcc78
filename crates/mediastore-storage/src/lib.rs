//! Mediastore Storage Library
//!
//! This crate provides the storage abstraction for user-uploaded media and documents.
//! It includes the Storage trait, the shared error taxonomy, and implementations for
//! S3-compatible object stores and the local filesystem.
//!
//! # Storage key format
//!
//! Keys are `/`-separated and namespaced by file category and owner, e.g.
//! `posts/{owner_id}/{file name}`. Keys must not contain `..`, empty segments or a leading
//! `/`. Key generation is centralized in the `keys` module so all backends stay consistent.

pub mod content_type;
pub mod error;
pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod policy;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod sweeper;
pub mod traits;

// Re-export commonly used types
pub use error::{StorageError, StorageErrorKind, StorageResult};
pub use factory::create_storage;
pub use keys::{storage_key, FileCategory};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use mediastore_core::{StorageBackend, StorageConfig};
pub use policy::UploadPolicy;
#[cfg(feature = "storage-s3")]
pub use s3::{map_object_store_error, S3Storage};
pub use sweeper::{cleanup_expired_files, ExpirySweeper, SweepError, SweepReport};
pub use traits::{
    body_from_bytes, read_to_bytes, ByteStream, FileInfo, FileMetadata, Storage, StorageInfo,
    UploadBody, UploadResult,
};
