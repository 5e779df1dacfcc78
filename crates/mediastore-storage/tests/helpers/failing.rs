use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mediastore_storage::{
    ByteStream, FileInfo, FileMetadata, Storage, StorageError, StorageErrorKind, StorageInfo,
    StorageResult, UploadBody, UploadResult,
};

/// Delegates to an inner backend but refuses to delete the listed keys.
pub struct FailingDelete {
    inner: Arc<dyn Storage>,
    refuse: HashSet<String>,
}

impl FailingDelete {
    pub fn new(inner: Arc<dyn Storage>, refuse: &[&str]) -> Self {
        Self {
            inner,
            refuse: refuse.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[async_trait]
impl Storage for FailingDelete {
    async fn upload(
        &self,
        key: &str,
        body: UploadBody,
        content_type: &str,
        declared_size: u64,
    ) -> StorageResult<UploadResult> {
        self.inner.upload(key, body, content_type, declared_size).await
    }

    async fn download(&self, key: &str) -> StorageResult<ByteStream> {
        self.inner.download(key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        if self.refuse.contains(key) {
            return Err(StorageError::new(StorageErrorKind::AccessDenied, "delete refused").with_key(key));
        }
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    fn get_url(&self, key: &str) -> String {
        self.inner.get_url(key)
    }

    async fn get_signed_url(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        self.inner.get_signed_url(key, ttl).await
    }

    async fn get_metadata(&self, key: &str) -> StorageResult<FileMetadata> {
        self.inner.get_metadata(key).await
    }

    async fn copy(&self, src: &str, dst: &str) -> StorageResult<()> {
        self.inner.copy(src, dst).await
    }

    async fn move_object(&self, src: &str, dst: &str) -> StorageResult<()> {
        self.inner.move_object(src, dst).await
    }

    async fn list_files(&self, prefix: &str, limit: usize) -> StorageResult<Vec<FileInfo>> {
        self.inner.list_files(prefix, limit).await
    }

    fn storage_info(&self) -> StorageInfo {
        self.inner.storage_info()
    }
}
