//! Upload acceptance rules shared by both backends.

use mediastore_core::StorageConfig;

use crate::error::{StorageError, StorageResult};

/// Size and content-type limits applied to every upload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadPolicy {
    /// 0 means unlimited.
    pub max_file_size: u64,
    /// Lowercased; `type/*` wildcards allowed. Empty accepts everything.
    pub allowed_types: Vec<String>,
}

impl UploadPolicy {
    pub fn from_config(config: &StorageConfig) -> Self {
        UploadPolicy {
            max_file_size: config.max_file_size,
            allowed_types: config
                .allowed_types
                .iter()
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn is_type_allowed(&self, content_type: &str) -> bool {
        if self.allowed_types.is_empty() {
            return true;
        }
        // Parameters such as `; charset=utf-8` do not take part in the match.
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        self.allowed_types.iter().any(|allowed| match allowed.strip_suffix("/*") {
            Some(top_level) => essence
                .split_once('/')
                .is_some_and(|(t, _)| t == top_level),
            None => *allowed == essence,
        })
    }

    /// Checks that can run before a single byte is read.
    pub fn check_before_transfer(
        &self,
        key: &str,
        content_type: &str,
        declared_size: u64,
    ) -> StorageResult<()> {
        if !self.is_type_allowed(content_type) {
            return Err(StorageError::invalid_input(format!(
                "content type '{}' is not allowed",
                content_type
            ))
            .with_key(key));
        }
        if self.max_file_size > 0 && declared_size > self.max_file_size {
            return Err(self.too_large(key, declared_size));
        }
        Ok(())
    }

    /// Whether `size` bytes already exceed the configured ceiling.
    pub fn exceeds_limit(&self, size: u64) -> bool {
        self.max_file_size > 0 && size > self.max_file_size
    }

    pub fn too_large(&self, key: &str, size: u64) -> StorageError {
        StorageError::invalid_input(format!(
            "file too large: {} bytes exceeds limit of {} bytes",
            size, self.max_file_size
        ))
        .with_key(key)
    }
}

/// Compare the caller-declared size with the bytes actually read.
pub fn check_declared_size(key: &str, declared_size: u64, actual_size: u64) -> StorageResult<()> {
    if declared_size > 0 && declared_size != actual_size {
        return Err(StorageError::invalid_input(format!(
            "size mismatch: expected {}, got {}",
            declared_size, actual_size
        ))
        .with_key(key));
    }
    Ok(())
}
