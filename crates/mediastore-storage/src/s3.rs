use crate::content_type::{cache_control_for, content_type_for_key, is_public_content_type};
use crate::error::{StorageError, StorageErrorKind, StorageResult};
use crate::keys::{encode_key_path, url_base, validate_key};
use crate::policy::{check_declared_size, UploadPolicy};
use crate::traits::{
    ByteStream, FileInfo, FileMetadata, Storage, StorageInfo, UploadBody, UploadResult,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;
use md5::{Digest, Md5};
use mediastore_core::StorageConfig;
use object_store::aws::AmazonS3Builder;
use object_store::client::{HttpError, HttpErrorKind};
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::Error as ObjectStoreError;
use object_store::{
    Attribute, AttributeValue, Attributes, ClientOptions, GetOptions, ObjectStore, ObjectStoreExt,
    PutOptions, PutPayload,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;

const READ_CHUNK_SIZE: usize = 64 * 1024;
const ACL_HEADER: &str = "x-amz-acl";
const ACL_PUBLIC_READ: &str = "public-read";
const ACL_PRIVATE: &str = "private";

/// Keys under which `UploadResult::metadata` reports the write decisions.
pub const METADATA_ACL: &str = "acl";
pub const METADATA_CACHE_CONTROL: &str = "cache-control";

/// S3 storage implementation
///
/// Works against AWS S3 and S3-compatible providers (MinIO, DigitalOcean Spaces, ...).
/// Uploads are buffered in memory and written with a single PUT.
#[derive(Clone)]
pub struct S3Storage {
    store: Arc<dyn ObjectStore>,
    /// Same bucket, but every write carries `x-amz-acl: public-read`.
    public_store: Arc<dyn ObjectStore>,
    signer: Option<Arc<dyn Signer>>,
    bucket: String,
    region: String,
    endpoint_url: Option<String>, // Custom endpoint for S3-compatible providers
    cdn_domain: Option<String>,
    policy: UploadPolicy,
}

impl std::fmt::Debug for S3Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Storage")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .field("cdn_domain", &self.cdn_domain)
            .finish_non_exhaustive()
    }
}

impl S3Storage {
    /// Create a new S3Storage instance from configuration
    ///
    /// Credentials fall back to the standard `AWS_*` environment when `access_key` and
    /// `secret_key` are not set. A custom `endpoint` (e.g. "http://localhost:9000" for MinIO)
    /// switches to path-style requests against that host.
    pub async fn from_config(config: &StorageConfig) -> StorageResult<Self> {
        let store = Self::builder(config).build().map_err(invalid_config)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(ACL_HEADER),
            HeaderValue::from_static(ACL_PUBLIC_READ),
        );
        let public_store = Self::builder(config)
            .with_client_options(ClientOptions::new().with_default_headers(headers))
            .build()
            .map_err(invalid_config)?;

        tracing::info!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = ?config.endpoint(),
            "S3 storage initialized"
        );

        let signer: Arc<dyn Signer> = Arc::new(store.clone());
        let storage = Self::with_store(Arc::new(store), &config.bucket, &config.region)
            .with_public_store(Arc::new(public_store))
            .with_signer(signer)
            .with_policy(UploadPolicy::from_config(config));

        Ok(S3Storage {
            endpoint_url: config.endpoint().map(String::from),
            cdn_domain: config.cdn_domain().map(String::from),
            ..storage
        })
    }

    /// Wrap an arbitrary object store, e.g. `object_store::memory::InMemory`.
    ///
    /// Public and private writes both go to `store` until [`S3Storage::with_public_store`]
    /// says otherwise. Signed URLs are unavailable until a signer is attached.
    pub fn with_store(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        S3Storage {
            public_store: store.clone(),
            store,
            signer: None,
            bucket: bucket.into(),
            region: region.into(),
            endpoint_url: None,
            cdn_domain: None,
            policy: UploadPolicy::default(),
        }
    }

    pub fn with_public_store(mut self, public_store: Arc<dyn ObjectStore>) -> Self {
        self.public_store = public_store;
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_endpoint(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

    pub fn with_cdn_domain(mut self, cdn_domain: impl Into<String>) -> Self {
        self.cdn_domain = Some(cdn_domain.into());
        self
    }

    pub fn with_policy(mut self, policy: UploadPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn builder(config: &StorageConfig) -> AmazonS3Builder {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(config.region.clone())
            .with_bucket_name(config.bucket.clone());

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            builder = builder
                .with_access_key_id(access_key.clone())
                .with_secret_access_key(secret_key.clone());
        }

        if let Some(endpoint) = config.endpoint() {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.to_string())
                .with_allow_http(allow_http);
        }

        builder
    }

    /// Object path for `key`, byte for byte.
    ///
    /// `Path::from` would percent-encode characters such as `#` or `~`, and listings
    /// would then report keys the caller never wrote.
    fn location(key: &str) -> StorageResult<Path> {
        validate_key(key)?;
        Path::parse(key).map_err(|e| {
            StorageError::invalid_input(format!("invalid storage key: {}", e))
                .with_key(key)
                .with_source(e)
        })
    }

    /// Native object URL, ignoring any CDN.
    ///
    /// For AWS S3, uses the standard format: https://{bucket}.s3.{region}.amazonaws.com/{key}
    /// For S3-compatible providers, uses path-style: {endpoint}/{bucket}/{key}
    fn native_url(&self, key: &str) -> String {
        let key = encode_key_path(key);
        match self.endpoint_url {
            Some(ref endpoint) => format!("{}/{}/{}", url_base(endpoint), self.bucket, key),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            ),
        }
    }

    fn cdn_url(&self, key: &str) -> Option<String> {
        self.cdn_domain
            .as_deref()
            .map(|cdn| format!("{}/{}", url_base(cdn), encode_key_path(key)))
    }

    /// Read the whole body, failing as soon as it exceeds the size ceiling.
    async fn buffer_body(&self, key: &str, body: &mut UploadBody) -> StorageResult<Bytes> {
        let mut buffer = BytesMut::new();
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];

        loop {
            let read = body.read(&mut chunk).await.map_err(|e| {
                StorageError::internal(format!("failed to read upload body: {}", e))
                    .with_key(key)
                    .with_source(e)
            })?;
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);
            if self.policy.exceeds_limit(buffer.len() as u64) {
                return Err(self.policy.too_large(key, buffer.len() as u64));
            }
        }

        Ok(buffer.freeze())
    }

    /// Pick the client whose writes carry the right ACL for this content type.
    fn store_for(&self, content_type: &str) -> &Arc<dyn ObjectStore> {
        if is_public_content_type(content_type) {
            &self.public_store
        } else {
            &self.store
        }
    }
}

fn invalid_config(err: ObjectStoreError) -> StorageError {
    StorageError::invalid_input(format!("invalid S3 configuration: {}", err)).with_source(err)
}

fn trim_etag(etag: Option<String>) -> Option<String> {
    etag.map(|tag| tag.trim_matches('"').to_string())
        .filter(|tag| !tag.is_empty())
}

fn attribute_text(value: &AttributeValue) -> String {
    let text: &str = value.as_ref();
    text.to_string()
}

/// Translate an object store failure into the shared error taxonomy.
///
/// Structured variants are mapped by type. Transport and HTTP failures arrive as
/// `Generic`: an [`HttpError`] in the source chain decides transport failures, otherwise
/// the response status does. The request URI in the message is never inspected.
pub fn map_object_store_error(err: ObjectStoreError, key: &str) -> StorageError {
    let kind = match &err {
        ObjectStoreError::NotFound { .. } => StorageErrorKind::NotFound,
        ObjectStoreError::PermissionDenied { .. } | ObjectStoreError::Unauthenticated { .. } => {
            StorageErrorKind::AccessDenied
        }
        ObjectStoreError::InvalidPath { .. }
        | ObjectStoreError::Precondition { .. }
        | ObjectStoreError::AlreadyExists { .. } => StorageErrorKind::InvalidInput,
        other => classify_generic(other),
    };

    let message = match kind {
        StorageErrorKind::NotFound => "file not found".to_string(),
        _ => err.to_string(),
    };

    StorageError::new(kind, message)
        .with_key(key)
        .with_source(err)
}

fn classify_generic(err: &ObjectStoreError) -> StorageErrorKind {
    if is_transport_failure(err) {
        return StorageErrorKind::NetworkError;
    }
    match response_status(&err.to_string()) {
        Some(400) => StorageErrorKind::InvalidInput,
        Some(401 | 403) => StorageErrorKind::AccessDenied,
        Some(404) => StorageErrorKind::NotFound,
        _ => StorageErrorKind::Internal,
    }
}

/// Whether the request never got a response: connect, timeout or send failures.
fn is_transport_failure(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(http) = e.downcast_ref::<HttpError>() {
            return matches!(
                http.kind(),
                HttpErrorKind::Connect | HttpErrorKind::Timeout | HttpErrorKind::Request
            );
        }
        current = e.source();
    }
    false
}

/// HTTP status reported as `... status NNN ...` in a retry error message.
///
/// URIs are percent-encoded and cannot contain the space, so a key can never fake this.
fn response_status(message: &str) -> Option<u16> {
    message.match_indices("status ").find_map(|(start, marker)| {
        let digits: String = message[start + marker.len()..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        if digits.len() == 3 {
            digits.parse().ok()
        } else {
            None
        }
    })
}

#[async_trait]
impl Storage for S3Storage {
    async fn upload(
        &self,
        key: &str,
        mut body: UploadBody,
        content_type: &str,
        declared_size: u64,
    ) -> StorageResult<UploadResult> {
        let location = Self::location(key)?;
        self.policy
            .check_before_transfer(key, content_type, declared_size)?;

        let start = Instant::now();
        let data = self.buffer_body(key, &mut body).await?;
        let size = data.len() as u64;
        check_declared_size(key, declared_size, size)?;

        let public = is_public_content_type(content_type);
        let mut metadata = HashMap::new();
        metadata.insert(
            METADATA_ACL.to_string(),
            if public { ACL_PUBLIC_READ } else { ACL_PRIVATE }.to_string(),
        );

        let mut attributes = Attributes::new();
        if !content_type.is_empty() {
            attributes.insert(Attribute::ContentType, content_type.to_string().into());
        }
        if let Some(cache_control) = cache_control_for(content_type) {
            attributes.insert(Attribute::CacheControl, cache_control.into());
            metadata.insert(
                METADATA_CACHE_CONTROL.to_string(),
                cache_control.to_string(),
            );
        }

        let digest = hex::encode(Md5::digest(&data));
        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        let result = self
            .store_for(content_type)
            .put_opts(&location, PutPayload::from(data), options)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    size_bytes = size,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 upload failed"
                );
                map_object_store_error(e, key)
            })?;

        let public_url = self.native_url(key);
        let cdn_url = self.cdn_url(key).unwrap_or_else(|| public_url.clone());

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            public,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );

        Ok(UploadResult {
            key: key.to_string(),
            public_url,
            cdn_url,
            size,
            content_type: content_type.to_string(),
            etag: trim_etag(result.e_tag).unwrap_or(digest),
            metadata,
        })
    }

    async fn download(&self, key: &str) -> StorageResult<ByteStream> {
        let location = Self::location(key)?;
        let start = Instant::now();

        let result = self.store.get(&location).await.map_err(|e| {
            if !matches!(e, ObjectStoreError::NotFound { .. }) {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 download failed"
                );
            }
            map_object_store_error(e, key)
        })?;

        let bucket = self.bucket.clone();
        let key = key.to_string();

        let stream = result.into_stream().map(move |chunk| {
            chunk.map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %key,
                    "S3 stream download error"
                );
                map_object_store_error(e, &key)
            })
        });

        Ok(Box::pin(stream))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let location = Self::location(key)?;
        let start = Instant::now();

        match self.store.delete(&location).await {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => {}
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete failed"
                );
                return Err(map_object_store_error(e, key));
            }
        }

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let location = Self::location(key)?;
        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(ObjectStoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(map_object_store_error(e, key)),
        }
    }

    fn get_url(&self, key: &str) -> String {
        self.cdn_url(key).unwrap_or_else(|| self.native_url(key))
    }

    async fn get_signed_url(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        let location = Self::location(key)?;
        let signer = self.signer.as_ref().ok_or_else(|| {
            StorageError::internal("signed URLs are not supported by this object store")
                .with_key(key)
        })?;

        let url = signer
            .signed_url(Method::GET, &location, ttl)
            .await
            .map_err(|e| map_object_store_error(e, key))?;

        Ok(url.to_string())
    }

    async fn get_metadata(&self, key: &str) -> StorageResult<FileMetadata> {
        let location = Self::location(key)?;
        let options = GetOptions {
            head: true,
            ..Default::default()
        };

        let result = self
            .store
            .get_opts(&location, options)
            .await
            .map_err(|e| map_object_store_error(e, key))?;

        let mut content_type = None;
        let mut metadata = HashMap::new();
        for (attribute, value) in result.attributes.iter() {
            match attribute {
                Attribute::ContentType => content_type = Some(attribute_text(value)),
                Attribute::CacheControl => {
                    metadata.insert(METADATA_CACHE_CONTROL.to_string(), attribute_text(value));
                }
                Attribute::Metadata(name) => {
                    metadata.insert(name.to_string(), attribute_text(value));
                }
                _ => {}
            }
        }

        Ok(FileMetadata {
            key: key.to_string(),
            size: result.meta.size,
            content_type: content_type
                .unwrap_or_else(|| content_type_for_key(key).to_string()),
            last_modified: result.meta.last_modified,
            etag: trim_etag(result.meta.e_tag).unwrap_or_default(),
            metadata,
        })
    }

    async fn copy(&self, src: &str, dst: &str) -> StorageResult<()> {
        let from = Self::location(src)?;
        let to = Self::location(dst)?;
        let start = Instant::now();

        // The copy is issued through the client matching the source's visibility so the
        // destination keeps the same ACL.
        let content_type = self.get_metadata(src).await?.content_type;

        self.store_for(&content_type)
            .copy(&from, &to)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    from_key = %src,
                    to_key = %dst,
                    "S3 copy failed"
                );
                map_object_store_error(e, src)
            })?;

        tracing::info!(
            from_key = %src,
            to_key = %dst,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 copy successful"
        );

        Ok(())
    }

    /// Copy then delete. If the delete fails both keys exist and the error is returned.
    async fn move_object(&self, src: &str, dst: &str) -> StorageResult<()> {
        if src == dst {
            return self.get_metadata(src).await.map(|_| ());
        }
        self.copy(src, dst).await?;
        self.delete(src).await?;

        tracing::info!(from_key = %src, to_key = %dst, "S3 move successful");
        Ok(())
    }

    async fn list_files(&self, prefix: &str, limit: usize) -> StorageResult<Vec<FileInfo>> {
        // Object store listing is segment-based; narrow by directory, then filter by string.
        let dir_part = prefix.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        let dir = if dir_part.is_empty() {
            None
        } else {
            Some(Self::location(dir_part)?)
        };

        let mut listing = self.store.list(dir.as_ref());
        let mut files = Vec::new();

        while let Some(item) = listing.next().await {
            let meta = item.map_err(|e| map_object_store_error(e, prefix))?;
            let key = meta.location.to_string();
            if !key.starts_with(prefix) {
                continue;
            }

            files.push(FileInfo {
                key,
                size: meta.size,
                last_modified: meta.last_modified,
                is_dir: false,
            });

            if limit > 0 && files.len() >= limit {
                break;
            }
        }

        Ok(files)
    }

    fn storage_info(&self) -> StorageInfo {
        let endpoint = match self.endpoint_url {
            Some(ref endpoint) => url_base(endpoint),
            None => format!("https://s3.{}.amazonaws.com", self.region),
        };
        StorageInfo {
            provider: "s3".to_string(),
            region: self.region.clone(),
            bucket: self.bucket.clone(),
            endpoint,
        }
    }
}
