use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub type StoreResult<T, E = anyhow::Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid path: '{0}'. Must be a relative path without '..'")]
    InvalidPath(String),
}

/// True if `err` reports a missing object, whichever backend raised it.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    if let Some(StoreError::NotFound(_)) = err.downcast_ref::<StoreError>() {
        return true;
    }
    err.downcast_ref::<std::io::Error>()
        .is_some_and(|e| e.kind() == std::io::ErrorKind::NotFound)
}

/// Flat key/value object storage that cores persist their blocks into.
///
/// Paths are relative and `/`-separated.
#[async_trait]
pub trait Store: std::fmt::Debug + Send + Sync + 'static {
    fn features(&self) -> StoreFeatures;

    async fn exists(&self, path: &str) -> StoreResult<bool>;

    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<()>;

    /// Reads `max_len` bytes (or everything) starting at `offset`.
    ///
    /// Missing objects yield [`StoreError::NotFound`].
    async fn open_read_bytes(
        &self,
        path: &str,
        offset: u64,
        max_len: Option<u64>,
    ) -> StoreResult<Bytes>;

    async fn size(&self, path: &str) -> StoreResult<u64>;

    /// Deletes a single object. Deleting a missing object is not an error.
    async fn delete(&self, path: &str) -> StoreResult<()>;

    /// Removes every object below the directory `prefix`.
    async fn delete_dir(&self, prefix: &str) -> StoreResult<()>;

    /// All object paths below `prefix`, sorted.
    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Directory on the local filesystem backing this store, if any.
    fn local_root(&self) -> Option<&Path> {
        None
    }
}

pub struct StoreFeatures {
    pub case_sensitive: bool,
    pub recommended_max_dir_size: u64,
    /// Objects are files below [`Store::local_root`].
    pub on_disk: bool,
}
