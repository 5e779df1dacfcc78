#[cfg(feature = "storage-local")]
use crate::LocalStorage;
#[cfg(feature = "storage-s3")]
use crate::S3Storage;
use crate::{Storage, StorageBackend, StorageError, StorageResult};
use mediastore_core::StorageConfig;
use std::sync::Arc;

/// Create a storage backend based on configuration
///
/// Configuration problems (missing bucket, unknown provider, backend compiled out) are
/// reported as `InvalidInput`.
pub async fn create_storage(config: &StorageConfig) -> StorageResult<Arc<dyn Storage>> {
    config
        .validate()
        .map_err(|e| StorageError::invalid_input(format!("invalid storage configuration: {e}")))?;

    match config.provider {
        #[cfg(feature = "storage-s3")]
        StorageBackend::S3 => {
            let storage = S3Storage::from_config(config).await?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-s3"))]
        StorageBackend::S3 => Err(StorageError::invalid_input(
            "S3 storage backend not available (storage-s3 feature not enabled)",
        )),

        #[cfg(feature = "storage-local")]
        StorageBackend::Local => {
            let storage = LocalStorage::from_config(config).await?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-local"))]
        StorageBackend::Local => Err(StorageError::invalid_input(
            "Local storage backend not available (storage-local feature not enabled)",
        )),
    }
}
