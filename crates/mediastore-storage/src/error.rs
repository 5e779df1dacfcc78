//! Storage error taxonomy
//!
//! Every backend reports failures as a [`StorageError`] whose [`StorageErrorKind`] is drawn
//! from a closed set. Callers branch on the kind and never on transport details.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Closed set of storage failure kinds shared by all backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageErrorKind {
    NotFound,
    AccessDenied,
    InvalidInput,
    QuotaExceeded,
    NetworkError,
    #[serde(rename = "INTERNAL_ERROR")]
    Internal,
}

impl StorageErrorKind {
    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            StorageErrorKind::NotFound => "NOT_FOUND",
            StorageErrorKind::AccessDenied => "ACCESS_DENIED",
            StorageErrorKind::InvalidInput => "INVALID_INPUT",
            StorageErrorKind::QuotaExceeded => "QUOTA_EXCEEDED",
            StorageErrorKind::NetworkError => "NETWORK_ERROR",
            StorageErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

impl Display for StorageErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.code())
    }
}

/// Storage operation error
#[derive(Debug, thiserror::Error)]
#[error("{}: {}{}", .kind, .message, .key.as_ref().map(|k| format!(" (key: {k})")).unwrap_or_default())]
pub struct StorageError {
    kind: StorageErrorKind,
    message: String,
    key: Option<String>,
    #[source]
    source: Option<BoxError>,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        StorageError {
            kind,
            message: message.into(),
            key: None,
            source: None,
        }
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::NotFound, "file not found").with_key(key)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::InvalidInput, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::Internal, message)
    }

    /// Translate a filesystem error by cause.
    ///
    /// `NotFound` and `PermissionDenied` keep their meaning; everything else is `Internal`.
    pub fn from_io(err: io::Error, context: &str, key: &str) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::NotFound => StorageErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => StorageErrorKind::AccessDenied,
            _ => StorageErrorKind::Internal,
        };
        Self::new(kind, format!("{context}: {err}"))
            .with_key(key)
            .with_source(err)
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == StorageErrorKind::NotFound
    }

    pub fn is_access_denied(&self) -> bool {
        self.kind == StorageErrorKind::AccessDenied
    }
}
