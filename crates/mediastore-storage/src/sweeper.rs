//! Age-based cleanup of stored objects.
//!
//! The sweep works purely through the [`Storage`] trait, so it serves every backend.
//! Backends never spawn background work themselves; applications that want periodic
//! cleanup start an [`ExpirySweeper`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::time::interval;

use crate::error::StorageError;
use crate::traits::Storage;

/// Outcome of a sweep in which every expired object was removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub prefix: String,
    pub scanned: usize,
    pub expired: usize,
    pub deleted: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("failed to list files under '{prefix}': {source}")]
    List {
        prefix: String,
        #[source]
        source: StorageError,
    },

    /// Some expired objects could not be deleted. The others are gone.
    #[error("failed to delete {failed} files")]
    Partial {
        failed: usize,
        expired: usize,
        deleted: usize,
        errors: Vec<(String, StorageError)>,
    },
}

impl SweepError {
    /// Number of objects that could not be deleted.
    pub fn failed(&self) -> usize {
        match self {
            SweepError::List { .. } => 0,
            SweepError::Partial { failed, .. } => *failed,
        }
    }
}

/// Delete every object under `prefix` last modified strictly before `older_than`.
///
/// A failed delete does not stop the sweep; failures are collected and reported together
/// as [`SweepError::Partial`].
#[tracing::instrument(skip(storage))]
pub async fn cleanup_expired_files(
    storage: &dyn Storage,
    prefix: &str,
    older_than: DateTime<Utc>,
) -> Result<SweepReport, SweepError> {
    let files = storage
        .list_files(prefix, 0)
        .await
        .map_err(|source| SweepError::List {
            prefix: prefix.to_string(),
            source,
        })?;

    let scanned = files.len();
    let mut expired = 0usize;
    let mut deleted = 0usize;
    let mut errors = Vec::new();

    for file in files
        .into_iter()
        .filter(|f| !f.is_dir && f.last_modified < older_than)
    {
        expired += 1;
        tracing::debug!(
            key = %file.key,
            last_modified = %file.last_modified,
            "Deleting expired file"
        );

        match storage.delete(&file.key).await {
            Ok(()) => deleted += 1,
            Err(e) => {
                tracing::error!(error = %e, key = %file.key, "Failed to delete expired file");
                errors.push((file.key, e));
            }
        }
    }

    if !errors.is_empty() {
        return Err(SweepError::Partial {
            failed: errors.len(),
            expired,
            deleted,
            errors,
        });
    }

    tracing::info!(scanned, expired, deleted, "Cleanup completed");

    Ok(SweepReport {
        prefix: prefix.to_string(),
        scanned,
        expired,
        deleted,
    })
}

/// Periodic sweep of one prefix
#[derive(Clone)]
pub struct ExpirySweeper {
    storage: Arc<dyn Storage>,
    prefix: String,
    max_age: Duration,
}

impl ExpirySweeper {
    pub fn new(storage: Arc<dyn Storage>, prefix: impl Into<String>, max_age: Duration) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
            max_age,
        }
    }

    /// Cutoff for the current moment. A max age too large to represent expires nothing.
    pub fn cutoff(&self) -> DateTime<Utc> {
        TimeDelta::from_std(self.max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub async fn run_once(&self) -> Result<SweepReport, SweepError> {
        cleanup_expired_files(self.storage.as_ref(), &self.prefix, self.cutoff()).await
    }

    /// Start the background sweep, running every `every`
    /// Returns a JoinHandle for graceful shutdown
    pub fn start(self: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut sweep_interval = interval(every);

            loop {
                sweep_interval.tick().await;

                tracing::info!(prefix = %self.prefix, "Starting scheduled cleanup of expired files");

                match self.run_once().await {
                    Ok(report) => {
                        tracing::info!(deleted = report.deleted, "Cleanup task completed successfully")
                    }
                    Err(e) => tracing::error!(error = %e, "Cleanup task failed"),
                }
            }
        })
    }
}
