//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends must implement,
//! together with the value types the trait exchanges with callers.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Cursor;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncRead;

use crate::error::StorageResult;

/// Upload body: any async reader, consumed once until EOF.
pub type UploadBody = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// Download body: a stream of chunks. Dropping it releases the underlying handle.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub key: String,
    pub public_url: String,
    pub cdn_url: String,
    /// Bytes actually transferred, never the caller-declared size.
    pub size: u64,
    pub content_type: String,
    pub etag: String,
    pub metadata: HashMap<String, String>,
}

/// Point-in-time metadata snapshot of a stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub key: String,
    pub size: u64,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
    pub etag: String,
    pub metadata: HashMap<String, String>,
}

/// Lightweight listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub is_dir: bool,
}

/// Static descriptor of the active backend, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub provider: String,
    pub region: String,
    pub bucket: String,
    pub endpoint: String,
}

/// Storage abstraction trait
///
/// All storage backends (S3, local filesystem) implement this trait. Consumers hold an
/// `Arc<dyn Storage>` obtained once at start-up and never look at backend internals.
///
/// Keys are `/`-separated paths such as `posts/{owner}/{file}`; see the `keys` module.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store `body` under `key`.
    ///
    /// The body is read to completion. When `declared_size > 0` and differs from the number
    /// of bytes read, the upload fails with `InvalidInput` and nothing is left at `key`.
    async fn upload(
        &self,
        key: &str,
        body: UploadBody,
        content_type: &str,
        declared_size: u64,
    ) -> StorageResult<UploadResult>;

    /// Open a stream over the object's bytes. Fails with `NotFound` if absent.
    async fn download(&self, key: &str) -> StorageResult<ByteStream>;

    /// Remove the object. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// `Ok(false)` means confirmed absent; an error means the answer is unknown.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Stable, non-expiring public URL. Does not check that the object exists.
    fn get_url(&self, key: &str) -> String;

    /// URL that is expected to stop resolving after `ttl`.
    async fn get_signed_url(&self, key: &str, ttl: Duration) -> StorageResult<String>;

    /// Fetch a metadata snapshot. Fails with `NotFound` if absent.
    async fn get_metadata(&self, key: &str) -> StorageResult<FileMetadata>;

    /// Copy `src` to `dst`, creating whatever parent structure `dst` needs.
    async fn copy(&self, src: &str, dst: &str) -> StorageResult<()>;

    /// Move `src` to `dst`; afterwards only `dst` exists.
    async fn move_object(&self, src: &str, dst: &str) -> StorageResult<()>;

    /// List objects whose key starts with `prefix`. `limit == 0` means unbounded.
    async fn list_files(&self, prefix: &str, limit: usize) -> StorageResult<Vec<FileInfo>>;

    fn storage_info(&self) -> StorageInfo;
}

/// Wrap an in-memory buffer as an upload body.
pub fn body_from_bytes(data: impl Into<Bytes>) -> UploadBody {
    Box::pin(Cursor::new(data.into()))
}

/// Drain a download stream into memory.
pub async fn read_to_bytes(mut stream: ByteStream) -> StorageResult<Bytes> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);
    }
    Ok(buffer.freeze())
}
