//! Test helpers: build every backend against throwaway state.
//!
//! The local backend gets a fresh temp directory; the S3 backend runs on
//! `object_store::memory::InMemory`, so no network or credentials are needed.

pub mod failing;

use std::sync::Arc;

use mediastore_storage::{LocalStorage, S3Storage, Storage};
use object_store::memory::InMemory;
use tempfile::TempDir;

/// One backend under test plus the resources it owns.
pub struct TestBackend {
    pub name: &'static str,
    pub storage: Arc<dyn Storage>,
    pub _temp_dir: Option<TempDir>,
}

pub async fn local_backend() -> TestBackend {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let storage = LocalStorage::new(temp_dir.path(), "http://localhost:8080/uploads")
        .await
        .expect("Failed to create local storage");
    TestBackend {
        name: "local",
        storage: Arc::new(storage),
        _temp_dir: Some(temp_dir),
    }
}

pub fn s3_backend() -> TestBackend {
    let storage = S3Storage::with_store(Arc::new(InMemory::new()), "media", "eu-west-1");
    TestBackend {
        name: "s3",
        storage: Arc::new(storage),
        _temp_dir: None,
    }
}

pub async fn all_backends() -> Vec<TestBackend> {
    vec![local_backend().await, s3_backend()]
}

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
