use crate::content_type::content_type_for_key;
use crate::error::{StorageError, StorageResult};
use crate::keys::{encode_key_path, url_base, validate_key};
use crate::policy::{check_declared_size, UploadPolicy};
use crate::traits::{
    ByteStream, FileInfo, FileMetadata, Storage, StorageInfo, UploadBody, UploadResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use md5::{Digest, Md5};
use mediastore_core::config::{OPTION_BASE_URL, OPTION_URL_PREFIX};
use mediastore_core::StorageConfig;
use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_URL_PREFIX: &str = "/uploads";
/// In-flight uploads and copies live next to their target under this name prefix.
const TEMP_FILE_PREFIX: &str = ".mediastore-tmp-";
const CHUNK_SIZE: usize = 64 * 1024;
/// How often a parent directory pruned by a concurrent delete is recreated before giving up.
const PARENT_DIR_ATTEMPTS: usize = 5;
#[cfg(unix)]
const FILE_MODE: u32 = 0o644;

/// Local filesystem storage implementation
///
/// Objects live at `{base_path}/{key}` and are served by an external web server under
/// `{base_url}/{key}`.
///
/// Signed URLs from this backend are best-effort only: they carry an `expires` query
/// parameter (unix seconds) but the filesystem cannot revoke access. Whatever serves
/// `base_url` must check that parameter for the expiry to mean anything.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    base_path: PathBuf,
    base_url: String,
    policy: UploadPolicy,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory for file storage (e.g., "/var/lib/mediastore/uploads")
    /// * `base_url` - Base URL for serving files (e.g., "http://localhost:8080/uploads")
    pub async fn new(
        base_path: impl Into<PathBuf>,
        base_url: impl Into<String>,
    ) -> StorageResult<Self> {
        let base_path = base_path.into();
        let display = base_path.display().to_string();

        fs::create_dir_all(&base_path)
            .await
            .map_err(|e| StorageError::from_io(e, "failed to create storage directory", &display))?;

        let base_path = fs::canonicalize(&base_path)
            .await
            .map_err(|e| StorageError::from_io(e, "failed to canonicalize base path", &display))?;

        tracing::info!(path = %base_path.display(), "Local storage initialized");

        Ok(LocalStorage {
            base_path,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            policy: UploadPolicy::default(),
        })
    }

    /// Build from configuration: `local_path` is the root, the public base URL is
    /// `cdn_domain` (or the `base_url` option) followed by the `url_prefix` option.
    pub async fn from_config(config: &StorageConfig) -> StorageResult<Self> {
        let base = match config.cdn_domain() {
            Some(cdn) => url_base(cdn),
            None => config
                .option(OPTION_BASE_URL)
                .unwrap_or(DEFAULT_BASE_URL)
                .to_string(),
        };
        let prefix = normalize_url_prefix(config.option(OPTION_URL_PREFIX).unwrap_or(DEFAULT_URL_PREFIX));
        let base_url = format!("{}{}", base.trim_end_matches('/'), prefix);

        let storage = Self::new(&config.local_path, base_url).await?;
        Ok(storage.with_policy(UploadPolicy::from_config(config)))
    }

    pub fn with_policy(mut self, policy: UploadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Total bytes stored under the root directory.
    pub async fn disk_usage(&self) -> StorageResult<u64> {
        let files = self.list_files("", 0).await?;
        Ok(files.iter().map(|f| f.size).sum())
    }

    /// Convert storage key to filesystem path with security validation
    ///
    /// Rejects malformed keys and keys that resolve outside the base directory through
    /// an existing symlink.
    async fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        validate_key(storage_key)?;

        let path = self.base_path.join(storage_key);

        if let Ok(canonical) = fs::canonicalize(&path).await {
            if !canonical.starts_with(&self.base_path) {
                return Err(StorageError::invalid_input(
                    "storage key resolves outside storage directory",
                )
                .with_key(storage_key));
            }
        }

        Ok(path)
    }

    /// Generate public URL for file
    fn generate_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, encode_key_path(key))
    }

    /// Remove now-empty directories from `start` upward, stopping below the root.
    ///
    /// A directory that is not empty (possibly because a concurrent upload just created
    /// something in it) or that is already gone ends the walk. Never fails.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current != self.base_path && current.starts_with(&self.base_path) {
            if let Err(e) = fs::remove_dir(&current).await {
                tracing::trace!(
                    path = %current.display(),
                    error = %e,
                    "Stopped pruning empty directories"
                );
                break;
            }
            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            }
        }
    }

    /// Drop an abandoned temp file and whatever empty directories were made for it.
    async fn discard_temp(&self, temp_path: &Path) {
        if let Err(e) = fs::remove_file(temp_path).await {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(
                    path = %temp_path.display(),
                    error = %e,
                    "Failed to remove temporary file"
                );
            }
        }
        if let Some(parent) = temp_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
    }

    /// Stream the body into the temp file, hashing as it goes. Returns (size, md5 hex).
    async fn write_body(
        &self,
        mut file: fs::File,
        key: &str,
        body: &mut UploadBody,
    ) -> StorageResult<(u64, String)> {
        let mut hasher = Md5::new();
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut size: u64 = 0;

        loop {
            let read = body.read(&mut buffer).await.map_err(|e| {
                StorageError::internal(format!("failed to read upload body: {}", e))
                    .with_key(key)
                    .with_source(e)
            })?;
            if read == 0 {
                break;
            }

            size += read as u64;
            if self.policy.exceeds_limit(size) {
                return Err(self.policy.too_large(key, size));
            }

            hasher.update(&buffer[..read]);
            file.write_all(&buffer[..read])
                .await
                .map_err(|e| StorageError::from_io(e, "failed to write file", key))?;
        }

        file.flush()
            .await
            .map_err(|e| StorageError::from_io(e, "failed to write file", key))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(FILE_MODE))
                .await
                .map_err(|e| StorageError::from_io(e, "failed to set file permissions", key))?;
        }

        file.sync_all()
            .await
            .map_err(|e| StorageError::from_io(e, "failed to sync file", key))?;

        Ok((size, hex::encode(hasher.finalize())))
    }

    /// Copy `src_path` to `dst_path` through a temp file so readers never see a partial copy.
    async fn copy_file(&self, src_path: &Path, dst_path: &Path, src: &str, dst: &str) -> StorageResult<()> {
        let temp_path = temp_path_for(dst_path);
        let temp = temp_path.as_path();

        // With the parent in place, NotFound can only mean the source is gone.
        if let Err(e) = with_parent_dir(dst_path, move || fs::copy(src_path, temp)).await {
            self.discard_temp(&temp_path).await;
            return Err(if e.kind() == ErrorKind::NotFound {
                StorageError::not_found(src)
            } else {
                StorageError::from_io(e, "failed to copy file data", dst)
            });
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) =
                fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(FILE_MODE)).await
            {
                self.discard_temp(&temp_path).await;
                return Err(StorageError::from_io(e, "failed to set file permissions", dst));
            }
        }

        if let Err(e) = fs::rename(&temp_path, dst_path).await {
            self.discard_temp(&temp_path).await;
            return Err(StorageError::from_io(e, "failed to finalize copy", dst));
        }

        Ok(())
    }

    /// Move by copying, for when a rename is refused (e.g. across filesystems).
    ///
    /// The source is only deleted once the copy is in place. A failed copy leaves no
    /// destination, temp file or directories behind, and the source untouched.
    async fn copy_then_delete(
        &self,
        src_path: &Path,
        dst_path: &Path,
        src: &str,
        dst: &str,
    ) -> StorageResult<()> {
        self.copy_file(src_path, dst_path, src, dst).await?;
        self.delete(src).await
    }

    /// Metadata for `key`, which must name a regular file.
    async fn file_metadata(&self, path: &Path, key: &str) -> StorageResult<std::fs::Metadata> {
        let meta = fs::metadata(path)
            .await
            .map_err(|e| StorageError::from_io(e, "failed to get file info", key))?;
        if !meta.is_file() {
            return Err(StorageError::not_found(key));
        }
        Ok(meta)
    }
}

/// Run `op` once the parent directory of `path` exists.
///
/// A concurrent delete may prune that directory between its creation and `op`. When `op`
/// then fails with NotFound and the parent is indeed gone, the directory is recreated and
/// `op` retried, at most `PARENT_DIR_ATTEMPTS` times in total.
async fn with_parent_dir<T, F, Fut>(path: &Path, mut op: F) -> std::io::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    let Some(parent) = path.parent() else {
        return op().await;
    };

    let mut attempt = 1;
    loop {
        let result = match fs::create_dir_all(parent).await {
            Ok(()) => op().await,
            Err(e) => Err(e),
        };
        match result {
            Err(e)
                if e.kind() == ErrorKind::NotFound
                    && attempt < PARENT_DIR_ATTEMPTS
                    && !is_dir(parent).await =>
            {
                tracing::debug!(
                    path = %parent.display(),
                    attempt,
                    "Parent directory pruned concurrently, recreating"
                );
                attempt += 1;
            }
            result => return result,
        }
    }
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

/// Sibling temp path in the same directory, so the final rename stays on one filesystem.
fn temp_path_for(path: &Path) -> PathBuf {
    path.with_file_name(format!("{}{}", TEMP_FILE_PREFIX, Uuid::new_v4()))
}

fn is_temp_file(name: &str) -> bool {
    name.starts_with(TEMP_FILE_PREFIX)
}

fn normalize_url_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

async fn md5_of_file(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn relative_key(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let segments = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(segments.join("/"))
}

#[async_trait]
impl Storage for LocalStorage {
    async fn upload(
        &self,
        key: &str,
        mut body: UploadBody,
        content_type: &str,
        declared_size: u64,
    ) -> StorageResult<UploadResult> {
        let path = self.key_to_path(key).await?;
        self.policy
            .check_before_transfer(key, content_type, declared_size)?;

        let start = Instant::now();
        let temp_path = temp_path_for(&path);
        let temp = temp_path.as_path();
        let file = with_parent_dir(&path, move || fs::File::create(temp))
            .await
            .map_err(|e| StorageError::from_io(e, "failed to create file", key))?;

        let (size, etag) = match self.write_body(file, key, &mut body).await {
            Ok(written) => written,
            Err(e) => {
                self.discard_temp(&temp_path).await;
                tracing::error!(
                    error = %e,
                    path = %path.display(),
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Local storage upload failed"
                );
                return Err(e);
            }
        };

        if let Err(e) = check_declared_size(key, declared_size, size) {
            self.discard_temp(&temp_path).await;
            tracing::warn!(
                key = %key,
                declared_size,
                size_bytes = size,
                "Local storage upload rejected"
            );
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_path, &path).await {
            self.discard_temp(&temp_path).await;
            return Err(StorageError::from_io(e, "failed to finalize file", key));
        }

        let url = self.generate_url(key);

        tracing::info!(
            path = %path.display(),
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage upload successful"
        );

        Ok(UploadResult {
            key: key.to_string(),
            public_url: url.clone(),
            cdn_url: url,
            size,
            content_type: content_type.to_string(),
            etag,
            metadata: HashMap::new(),
        })
    }

    async fn download(&self, key: &str) -> StorageResult<ByteStream> {
        let path = self.key_to_path(key).await?;

        let file = fs::File::open(&path)
            .await
            .map_err(|e| StorageError::from_io(e, "failed to open file", key))?;
        let is_file = file
            .metadata()
            .await
            .map_err(|e| StorageError::from_io(e, "failed to get file info", key))?
            .is_file();
        if !is_file {
            return Err(StorageError::not_found(key));
        }

        tracing::debug!(path = %path.display(), key = %key, "Local storage download started");

        let key = key.to_string();
        let stream = tokio_util::io::ReaderStream::new(file).map(move |chunk| {
            chunk.map_err(|e| {
                tracing::error!(key = %key, error = %e, "Local storage stream download error");
                StorageError::from_io(e, "failed to read chunk", &key)
            })
        });

        Ok(Box::pin(stream))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_to_path(key).await?;
        let start = Instant::now();

        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(key = %key, "Local storage delete of absent key");
                return Ok(());
            }
            Err(e) => return Err(StorageError::from_io(e, "failed to delete file", key)),
        }

        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent).await;
        }

        tracing::info!(
            path = %path.display(),
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage delete successful"
        );

        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(key).await?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::from_io(e, "failed to check file existence", key)),
        }
    }

    fn get_url(&self, key: &str) -> String {
        self.generate_url(key)
    }

    async fn get_signed_url(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        self.key_to_path(key).await?;

        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .ok_or_else(|| {
                StorageError::invalid_input("signed URL lifetime is out of range").with_key(key)
            })?;

        Ok(format!(
            "{}?expires={}",
            self.generate_url(key),
            expires_at.timestamp()
        ))
    }

    async fn get_metadata(&self, key: &str) -> StorageResult<FileMetadata> {
        let path = self.key_to_path(key).await?;
        let meta = self.file_metadata(&path, key).await?;

        let last_modified: DateTime<Utc> = meta
            .modified()
            .map_err(|e| StorageError::from_io(e, "failed to read modification time", key))?
            .into();

        let etag = match md5_of_file(&path).await {
            Ok(etag) => etag,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to hash file for ETag");
                String::new()
            }
        };

        Ok(FileMetadata {
            key: key.to_string(),
            size: meta.len(),
            content_type: content_type_for_key(key).to_string(),
            last_modified,
            etag,
            metadata: HashMap::new(),
        })
    }

    async fn copy(&self, src: &str, dst: &str) -> StorageResult<()> {
        let src_path = self.key_to_path(src).await?;
        let dst_path = self.key_to_path(dst).await?;

        self.file_metadata(&src_path, src).await?;
        self.copy_file(&src_path, &dst_path, src, dst).await?;

        tracing::info!(
            from_key = %src,
            to_key = %dst,
            from_path = %src_path.display(),
            to_path = %dst_path.display(),
            "Local storage copy successful"
        );

        Ok(())
    }

    async fn move_object(&self, src: &str, dst: &str) -> StorageResult<()> {
        let src_path = self.key_to_path(src).await?;
        let dst_path = self.key_to_path(dst).await?;

        self.file_metadata(&src_path, src).await?;
        if src_path == dst_path {
            return Ok(());
        }

        let (from, to) = (src_path.as_path(), dst_path.as_path());
        match with_parent_dir(&dst_path, move || fs::rename(from, to)).await {
            Ok(()) => {
                if let Some(parent) = src_path.parent() {
                    self.prune_empty_dirs(parent).await;
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if let Some(parent) = dst_path.parent() {
                    self.prune_empty_dirs(parent).await;
                }
                return Err(StorageError::not_found(src));
            }
            Err(e) => {
                tracing::warn!(
                    from_key = %src,
                    to_key = %dst,
                    error = %e,
                    "Rename failed, falling back to copy and delete"
                );
                self.copy_then_delete(&src_path, &dst_path, src, dst).await?;
            }
        }

        tracing::info!(from_key = %src, to_key = %dst, "Local storage move successful");

        Ok(())
    }

    async fn list_files(&self, prefix: &str, limit: usize) -> StorageResult<Vec<FileInfo>> {
        // Walk from the deepest directory the prefix pins down, then filter by string prefix.
        let dir_part = prefix.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        let start_dir = if dir_part.is_empty() {
            self.base_path.clone()
        } else {
            validate_key(dir_part)?;
            self.base_path.join(dir_part)
        };

        let mut files = Vec::new();
        let mut pending = vec![start_dir];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    if e.kind() != ErrorKind::NotFound {
                        tracing::debug!(path = %dir.display(), error = %e, "Skipping unreadable directory");
                    }
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(path = %dir.display(), error = %e, "Skipping unreadable entry");
                        break;
                    }
                };

                let path = entry.path();
                let Some(key) = relative_key(&self.base_path, &path) else {
                    continue;
                };
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };

                if file_type.is_dir() {
                    let dir_key = format!("{}/", key);
                    if dir_key.starts_with(prefix) || prefix.starts_with(&dir_key) {
                        pending.push(path);
                    }
                    continue;
                }

                let is_temp = entry.file_name().to_str().map_or(true, is_temp_file);
                if !file_type.is_file() || is_temp || !key.starts_with(prefix) {
                    continue;
                }

                let Ok(meta) = entry.metadata().await else {
                    continue;
                };
                let last_modified = match meta.modified() {
                    Ok(modified) => DateTime::<Utc>::from(modified),
                    Err(_) => continue,
                };

                files.push(FileInfo {
                    key,
                    size: meta.len(),
                    last_modified,
                    is_dir: false,
                });

                if limit > 0 && files.len() >= limit {
                    return Ok(files);
                }
            }
        }

        Ok(files)
    }

    fn storage_info(&self) -> StorageInfo {
        StorageInfo {
            provider: "local".to_string(),
            region: "local".to_string(),
            bucket: self.base_path.display().to_string(),
            endpoint: self.base_url.clone(),
        }
    }
}

#[cfg(all(test, feature = "storage-local"))]
mod tests {
    use super::*;
    use crate::error::StorageErrorKind;
    use crate::traits::{body_from_bytes, read_to_bytes};
    use tempfile::tempdir;

    async fn storage_in(dir: &Path) -> LocalStorage {
        LocalStorage::new(dir, "http://localhost:8080/uploads")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_local_storage_upload_download() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;
        let data = b"test data".to_vec();

        let result = storage
            .upload("uploads/u1/test.txt", body_from_bytes(data.clone()), "text/plain", 9)
            .await
            .unwrap();

        assert_eq!(result.size, 9);
        assert_eq!(result.etag, hex::encode(Md5::digest(&data)));
        assert_eq!(result.public_url, "http://localhost:8080/uploads/uploads/u1/test.txt");
        assert_eq!(result.cdn_url, result.public_url);

        let downloaded = read_to_bytes(storage.download("uploads/u1/test.txt").await.unwrap())
            .await
            .unwrap();
        assert_eq!(downloaded.as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn test_size_mismatch_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;

        let err = storage
            .upload("posts/u1/a.bin", body_from_bytes(vec![1u8; 10]), "application/octet-stream", 11)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), StorageErrorKind::InvalidInput);
        assert!(!storage.exists("posts/u1/a.bin").await.unwrap());
        // Neither the temp file nor the directories created for it survive.
        assert!(!dir.path().join("posts").exists());
    }

    #[tokio::test]
    async fn test_max_file_size_enforced_while_streaming() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await.with_policy(UploadPolicy {
            max_file_size: 4,
            allowed_types: vec![],
        });

        let err = storage
            .upload("a/b.txt", body_from_bytes(b"too long".to_vec()), "text/plain", 0)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::InvalidInput);
        assert!(!storage.exists("a/b.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;

        let result = storage.download("../../../etc/passwd").await;
        assert!(matches!(result, Err(ref e) if e.kind() == StorageErrorKind::InvalidInput));

        let result = storage.delete("../etc/passwd").await;
        assert_eq!(result.unwrap_err().kind(), StorageErrorKind::InvalidInput);

        let result = storage.exists("/etc/passwd").await;
        assert_eq!(result.unwrap_err().kind(), StorageErrorKind::InvalidInput);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_rejected() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), b"secret").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let storage = storage_in(dir.path()).await;
        let err = storage.get_metadata("link/secret.txt").await.unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_local_storage_delete_nonexistent() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;

        assert!(storage.delete("nonexistent/file.txt").await.is_ok());
        assert!(storage.delete("nonexistent/file.txt").await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_prunes_only_empty_parents() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;

        storage
            .upload("stories/u1/day1/a.mp4", body_from_bytes(b"a".to_vec()), "video/mp4", 1)
            .await
            .unwrap();
        storage
            .upload("stories/u2/b.mp4", body_from_bytes(b"b".to_vec()), "video/mp4", 1)
            .await
            .unwrap();

        storage.delete("stories/u1/day1/a.mp4").await.unwrap();

        assert!(!dir.path().join("stories/u1").exists());
        assert!(dir.path().join("stories/u2/b.mp4").exists());
        assert!(dir.path().exists());

        storage.delete("stories/u2/b.mp4").await.unwrap();
        assert!(!dir.path().join("stories").exists());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn test_local_storage_exists() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;

        storage
            .upload("exists/test.txt", body_from_bytes(b"test".to_vec()), "text/plain", 0)
            .await
            .unwrap();

        assert!(storage.exists("exists/test.txt").await.unwrap());
        assert!(!storage.exists("exists").await.unwrap());
        assert!(!storage.exists("nonexistent.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_storage_copy_and_move() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;
        let data = b"original content".to_vec();

        storage
            .upload("media/original.txt", body_from_bytes(data.clone()), "text/plain", 0)
            .await
            .unwrap();

        storage
            .copy("media/original.txt", "media/deep/nested/copied.txt")
            .await
            .unwrap();
        assert!(storage.exists("media/original.txt").await.unwrap());
        let copied = read_to_bytes(storage.download("media/deep/nested/copied.txt").await.unwrap())
            .await
            .unwrap();
        assert_eq!(copied.as_ref(), data.as_slice());

        storage
            .move_object("media/deep/nested/copied.txt", "archive/moved.txt")
            .await
            .unwrap();
        assert!(!storage.exists("media/deep/nested/copied.txt").await.unwrap());
        assert!(!dir.path().join("media/deep").exists());
        let moved = read_to_bytes(storage.download("archive/moved.txt").await.unwrap())
            .await
            .unwrap();
        assert_eq!(moved.as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn test_copy_and_move_missing_source() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;

        let err = storage.copy("missing.txt", "dst/copy.txt").await.unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::NotFound);
        assert_eq!(err.key(), Some("missing.txt"));

        let err = storage.move_object("missing.txt", "dst/moved.txt").await.unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::NotFound);
        assert!(!dir.path().join("dst").exists());
    }

    #[tokio::test]
    async fn test_copy_then_delete_moves_content() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;
        storage
            .upload("media/u1/a.txt", body_from_bytes(b"payload".to_vec()), "text/plain", 7)
            .await
            .unwrap();

        let src_path = storage.key_to_path("media/u1/a.txt").await.unwrap();
        let dst_path = storage.key_to_path("archive/u1/a.txt").await.unwrap();
        storage
            .copy_then_delete(&src_path, &dst_path, "media/u1/a.txt", "archive/u1/a.txt")
            .await
            .unwrap();

        assert!(!storage.exists("media/u1/a.txt").await.unwrap());
        assert!(!dir.path().join("media").exists());
        let moved = read_to_bytes(storage.download("archive/u1/a.txt").await.unwrap())
            .await
            .unwrap();
        assert_eq!(moved.as_ref(), b"payload");
    }

    #[tokio::test]
    async fn test_copy_then_delete_failure_keeps_source_and_leaves_no_destination() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;

        // A directory cannot be copied as file data, so the copy step fails.
        std::fs::create_dir_all(dir.path().join("media/u1/folder.txt")).unwrap();
        let src_path = storage.key_to_path("media/u1/folder.txt").await.unwrap();
        let dst_path = storage.key_to_path("archive/u1/a.txt").await.unwrap();

        let err = storage
            .copy_then_delete(&src_path, &dst_path, "media/u1/folder.txt", "archive/u1/a.txt")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), StorageErrorKind::Internal);
        assert_eq!(err.key(), Some("archive/u1/a.txt"));
        assert!(src_path.is_dir());
        assert!(!storage.exists("archive/u1/a.txt").await.unwrap());
        assert!(!dir.path().join("archive").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_upload_survives_concurrent_sibling_delete() {
        let dir = tempdir().unwrap();
        let storage = std::sync::Arc::new(storage_in(dir.path()).await);

        for i in 0..400 {
            let old = format!("posts/u{i}/old.jpg");
            let new = format!("posts/u{i}/new.jpg");
            storage
                .upload(&old, body_from_bytes(b"old".to_vec()), "image/jpeg", 3)
                .await
                .unwrap();

            let deleter = {
                let storage = storage.clone();
                let old = old.clone();
                tokio::spawn(async move { storage.delete(&old).await })
            };
            let uploader = {
                let storage = storage.clone();
                let new = new.clone();
                tokio::spawn(async move {
                    storage
                        .upload(&new, body_from_bytes(b"new".to_vec()), "image/jpeg", 3)
                        .await
                })
            };

            deleter.await.unwrap().unwrap();
            uploader.await.unwrap().unwrap();
            assert!(storage.exists(&new).await.unwrap(), "round {i}");
            assert!(!storage.exists(&old).await.unwrap(), "round {i}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_copy_survives_concurrent_sibling_delete() {
        let dir = tempdir().unwrap();
        let storage = std::sync::Arc::new(storage_in(dir.path()).await);
        storage
            .upload("media/source.txt", body_from_bytes(b"src".to_vec()), "text/plain", 3)
            .await
            .unwrap();

        for i in 0..200 {
            let old = format!("copies/u{i}/old.txt");
            let new = format!("copies/u{i}/new.txt");
            storage
                .upload(&old, body_from_bytes(b"old".to_vec()), "text/plain", 3)
                .await
                .unwrap();

            let deleter = {
                let storage = storage.clone();
                tokio::spawn(async move { storage.delete(&old).await })
            };
            let copier = {
                let storage = storage.clone();
                let new = new.clone();
                tokio::spawn(async move { storage.copy("media/source.txt", &new).await })
            };

            deleter.await.unwrap().unwrap();
            copier.await.unwrap().unwrap();
            assert!(storage.exists(&new).await.unwrap(), "round {i}");
        }
    }

    #[tokio::test]
    async fn test_list_files_uses_string_prefix() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;

        for key in ["posts/u1/a.jpg", "posts/u1/b.jpg", "posts/u10/c.jpg", "posts/u2/d.jpg", "stories/u1/e.mp4"] {
            storage
                .upload(key, body_from_bytes(b"x".to_vec()), "image/jpeg", 1)
                .await
                .unwrap();
        }

        let mut keys: Vec<String> = storage
            .list_files("posts/u1", 0)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["posts/u1/a.jpg", "posts/u1/b.jpg", "posts/u10/c.jpg"]);

        let keys = storage.list_files("posts/u1/", 0).await.unwrap();
        assert_eq!(keys.len(), 2);

        assert_eq!(storage.list_files("", 0).await.unwrap().len(), 5);
        assert_eq!(storage.list_files("posts/", 2).await.unwrap().len(), 2);
        assert!(storage.list_files("nothing/here", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_files_skips_temp_files() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;

        std::fs::create_dir_all(dir.path().join("posts/u1")).unwrap();
        std::fs::write(
            dir.path().join(format!("posts/u1/{}pending", TEMP_FILE_PREFIX)),
            b"partial",
        )
        .unwrap();
        std::fs::write(dir.path().join("posts/u1/done.jpg"), b"done").unwrap();

        let files = storage.list_files("posts/", 0).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].key, "posts/u1/done.jpg");
        assert_eq!(files[0].size, 4);
        assert!(!files[0].is_dir);
    }

    #[tokio::test]
    async fn test_metadata_matches_upload() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;

        let result = storage
            .upload("posts/u1/photo.png", body_from_bytes(vec![7u8; 300]), "image/png", 300)
            .await
            .unwrap();
        let meta = storage.get_metadata("posts/u1/photo.png").await.unwrap();

        assert_eq!(meta.size, 300);
        assert_eq!(meta.etag, result.etag);
        assert_eq!(meta.content_type, "image/png");
        assert!(meta.metadata.is_empty());

        let err = storage.get_metadata("posts/u1/missing.png").await.unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_signed_url_carries_expiry() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;

        let before = Utc::now().timestamp();
        let url = storage
            .get_signed_url("posts/u1/a.jpg", Duration::from_secs(600))
            .await
            .unwrap();

        let (base, query) = url.split_once("?expires=").unwrap();
        assert_eq!(base, "http://localhost:8080/uploads/posts/u1/a.jpg");
        let expires: i64 = query.parse().unwrap();
        assert!(expires >= before + 600 && expires <= Utc::now().timestamp() + 600);
    }

    #[tokio::test]
    async fn test_from_config_builds_public_urls() {
        let dir = tempdir().unwrap();
        let mut config = StorageConfig::local(dir.path().display().to_string());
        config.cdn_domain = Some("cdn.example.com/".to_string());
        config
            .options
            .insert(OPTION_URL_PREFIX.to_string(), "media/".to_string());

        let storage = LocalStorage::from_config(&config).await.unwrap();
        assert_eq!(storage.get_url("a/b c.jpg"), "https://cdn.example.com/media/a/b%20c.jpg");

        let info = storage.storage_info();
        assert_eq!(info.provider, "local");
        assert_eq!(info.endpoint, "https://cdn.example.com/media");

        let config = StorageConfig::local(dir.path().display().to_string());
        let storage = LocalStorage::from_config(&config).await.unwrap();
        assert_eq!(storage.get_url("a.jpg"), "http://localhost:8080/uploads/a.jpg");
    }

    #[tokio::test]
    async fn test_disk_usage_sums_file_sizes() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;

        storage
            .upload("a/one.bin", body_from_bytes(vec![0u8; 100]), "application/octet-stream", 0)
            .await
            .unwrap();
        storage
            .upload("b/c/two.bin", body_from_bytes(vec![0u8; 23]), "application/octet-stream", 0)
            .await
            .unwrap();

        assert_eq!(storage.disk_usage().await.unwrap(), 123);
    }
}
