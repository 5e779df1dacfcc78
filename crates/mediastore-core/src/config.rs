//! Configuration module
//!
//! `StorageConfig` is read once at process start and handed to the storage factory.
//! It can be built by hand, deserialized, or loaded from the environment.

use std::collections::HashMap;
use std::env;

use serde::{Deserialize, Serialize};

use crate::storage_types::StorageBackend;

const MAX_FILE_SIZE_MB: u64 = 50;
const DEFAULT_LOCAL_PATH: &str = "./uploads";

/// Option key for the URL path prefix the local backend serves files under.
pub const OPTION_URL_PREFIX: &str = "url_prefix";
/// Option key for the base URL the local backend serves files from.
pub const OPTION_BASE_URL: &str = "base_url";

/// Construction-time configuration for a storage backend
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub provider: StorageBackend,
    pub region: String,
    pub bucket: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Custom endpoint for S3-compatible providers (MinIO, DigitalOcean Spaces, etc.)
    pub endpoint: Option<String>,
    /// Public URL override. Preferred over native object store URLs.
    pub cdn_domain: Option<String>,
    pub local_path: String,
    /// Maximum accepted upload size in bytes. 0 disables the check.
    pub max_file_size: u64,
    /// Accepted content types; `image/*` style wildcards allowed. Empty accepts all.
    pub allowed_types: Vec<String>,
    /// Backend-specific extras (`url_prefix`, `base_url`).
    pub options: HashMap<String, String>,
}

impl StorageConfig {
    /// Configuration for a local backend rooted at `local_path`.
    pub fn local(local_path: impl Into<String>) -> Self {
        StorageConfig {
            provider: StorageBackend::Local,
            local_path: local_path.into(),
            ..Default::default()
        }
    }

    /// Configuration for an S3 backend.
    pub fn s3(bucket: impl Into<String>, region: impl Into<String>) -> Self {
        StorageConfig {
            provider: StorageBackend::S3,
            bucket: bucket.into(),
            region: region.into(),
            ..Default::default()
        }
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let provider = match non_empty("STORAGE_PROVIDER").or_else(|| non_empty("STORAGE_BACKEND")) {
            Some(value) => value.parse::<StorageBackend>()?,
            None => StorageBackend::Local,
        };

        let max_file_size_mb = match non_empty("MAX_FILE_SIZE_MB") {
            Some(value) => value
                .trim()
                .parse::<u64>()
                .map_err(|_| anyhow::anyhow!("MAX_FILE_SIZE_MB must be a valid number"))?,
            None => MAX_FILE_SIZE_MB,
        };

        let allowed_types = non_empty("ALLOWED_CONTENT_TYPES")
            .map(|s| {
                s.split(',')
                    .map(|t| t.trim().to_lowercase())
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let mut options = HashMap::new();
        if let Some(prefix) = non_empty("STORAGE_URL_PREFIX") {
            options.insert(OPTION_URL_PREFIX.to_string(), prefix);
        }
        if let Some(base_url) = non_empty("LOCAL_STORAGE_BASE_URL") {
            options.insert(OPTION_BASE_URL.to_string(), base_url);
        }

        let config = StorageConfig {
            provider,
            region: non_empty("S3_REGION")
                .or_else(|| non_empty("AWS_REGION"))
                .unwrap_or_default(),
            bucket: non_empty("S3_BUCKET").unwrap_or_default(),
            access_key: non_empty("AWS_ACCESS_KEY_ID"),
            secret_key: non_empty("AWS_SECRET_ACCESS_KEY"),
            endpoint: non_empty("S3_ENDPOINT"),
            cdn_domain: non_empty("CDN_DOMAIN"),
            local_path: non_empty("LOCAL_STORAGE_PATH")
                .unwrap_or_else(|| DEFAULT_LOCAL_PATH.to_string()),
            max_file_size: max_file_size_mb * 1024 * 1024,
            allowed_types,
            options,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        match self.provider {
            StorageBackend::S3 => {
                if self.bucket.trim().is_empty() {
                    return Err(anyhow::anyhow!("S3_BUCKET must be set for the s3 provider"));
                }
                if self.region.trim().is_empty() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set for the s3 provider"
                    ));
                }
                if self.access_key.is_some() != self.secret_key.is_some() {
                    return Err(anyhow::anyhow!(
                        "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set together"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_path.trim().is_empty() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must not be empty for the local provider"
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    pub fn cdn_domain(&self) -> Option<&str> {
        self.cdn_domain.as_deref().filter(|d| !d.trim().is_empty())
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref().filter(|e| !e.trim().is_empty())
    }
}
