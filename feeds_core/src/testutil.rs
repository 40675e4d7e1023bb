//! Test utilities for `Store` implementations.
//!
//! A shared suite that every `Store` backend runs to verify it honours the
//! trait contract the drive layer relies on.
//!
//! # Usage
//!
//! In your store crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! feeds_core = { workspace = true, features = ["testutil"] }
//! ```
//!
//! In your test file:
//!
//! ```ignore
//! use feeds_core::testutil::StoreTests;
//!
//! #[tokio::test]
//! async fn test_my_store() {
//!     let store = MyStore::new(...);
//!     StoreTests::new(&store).run_all().await.unwrap();
//! }
//! ```

use crate::store::{Store, StoreResult, is_not_found};
use bytes::Bytes;
use rand::Rng;

/// Test suite for `Store` implementations.
pub struct StoreTests<'a, S> {
    store: &'a S,
    /// Directory all test objects live under, to avoid conflicts
    prefix: String,
}

impl<'a, S: Store> StoreTests<'a, S> {
    pub fn new(store: &'a S) -> Self {
        let prefix = format!("_test_{}", rand::rng().random::<u32>());
        Self { store, prefix }
    }

    pub fn with_prefix(store: &'a S, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn path(&self, name: &str) -> String {
        format!("{}/{}", self.prefix, name)
    }

    /// Run all tests.
    pub async fn run_all(&self) -> StoreResult<()> {
        self.test_put_get_bytes().await?;
        self.test_missing_read().await?;
        self.test_exists().await?;
        self.test_size().await?;
        self.test_delete().await?;
        self.test_list().await?;
        self.test_partial_read().await?;
        self.test_overwrite().await?;
        self.test_delete_dir().await?;

        self.cleanup().await?;

        Ok(())
    }

    pub async fn test_put_get_bytes(&self) -> StoreResult<()> {
        let path = self.path("bytes_test.bin");
        let data = Bytes::from_static(b"hello, world!");

        self.store.put_bytes(&path, data.clone()).await?;

        let retrieved = self.store.open_read_bytes(&path, 0, None).await?;
        assert_eq!(retrieved, data, "retrieved data should match original");

        Ok(())
    }

    /// Reading a missing object must be reported as not-found.
    pub async fn test_missing_read(&self) -> StoreResult<()> {
        let path = self.path("never_written.bin");
        let err = self
            .store
            .open_read_bytes(&path, 0, None)
            .await
            .expect_err("reading a missing object should fail");
        assert!(is_not_found(&err), "expected not-found, got {err:#}");
        Ok(())
    }

    pub async fn test_exists(&self) -> StoreResult<()> {
        let path = self.path("exists_test.bin");

        assert!(
            !self.store.exists(&path).await?,
            "file should not exist before creation"
        );

        self.store
            .put_bytes(&path, Bytes::from_static(b"test"))
            .await?;

        assert!(
            self.store.exists(&path).await?,
            "file should exist after creation"
        );

        Ok(())
    }

    pub async fn test_size(&self) -> StoreResult<()> {
        let path = self.path("size_test.bin");
        let data = Bytes::from(vec![42u8; 12345]);

        self.store.put_bytes(&path, data.clone()).await?;

        let size = self.store.size(&path).await?;
        assert_eq!(size, 12345, "size should match data length");

        Ok(())
    }

    pub async fn test_delete(&self) -> StoreResult<()> {
        let path = self.path("delete_test.bin");

        self.store
            .put_bytes(&path, Bytes::from_static(b"to be deleted"))
            .await?;
        self.store.delete(&path).await?;

        assert!(
            !self.store.exists(&path).await?,
            "file should not exist after delete"
        );

        // A second delete is a no-op.
        self.store.delete(&path).await?;

        Ok(())
    }

    pub async fn test_list(&self) -> StoreResult<()> {
        let files = ["list/a.bin", "list/b.bin", "list/subdir/c.bin"];

        for file in &files {
            self.store
                .put_bytes(&self.path(file), Bytes::from_static(b"list test"))
                .await?;
        }
        self.store
            .put_bytes(&self.path("listing/other.bin"), Bytes::from_static(b"x"))
            .await?;

        let found = self.store.list(&self.path("list")).await?;
        let expected: Vec<String> = files.iter().map(|f| self.path(f)).collect();
        assert_eq!(found, expected, "list should return sorted paths below the prefix");

        Ok(())
    }

    pub async fn test_partial_read(&self) -> StoreResult<()> {
        let path = self.path("partial_test.bin");
        let data = Bytes::from_static(b"0123456789abcdef");

        self.store.put_bytes(&path, data.clone()).await?;

        let partial = self.store.open_read_bytes(&path, 5, None).await?;
        assert_eq!(partial.as_ref(), b"56789abcdef", "offset read should work");

        let partial = self.store.open_read_bytes(&path, 0, Some(5)).await?;
        assert_eq!(partial.as_ref(), b"01234", "length-limited read should work");

        let partial = self.store.open_read_bytes(&path, 4, Some(4)).await?;
        assert_eq!(partial.as_ref(), b"4567", "offset + length read should work");

        let partial = self.store.open_read_bytes(&path, 64, None).await?;
        assert!(partial.is_empty(), "reading past the end yields nothing");

        Ok(())
    }

    pub async fn test_overwrite(&self) -> StoreResult<()> {
        let path = self.path("overwrite_test.bin");

        self.store
            .put_bytes(&path, Bytes::from_static(b"original content"))
            .await?;
        self.store
            .put_bytes(&path, Bytes::from_static(b"new content"))
            .await?;

        let retrieved = self.store.open_read_bytes(&path, 0, None).await?;
        assert_eq!(
            retrieved.as_ref(),
            b"new content",
            "overwritten content should be new"
        );

        Ok(())
    }

    /// `delete_dir` removes a subtree and leaves its siblings alone.
    pub async fn test_delete_dir(&self) -> StoreResult<()> {
        let doomed = ["shard/aa/one.bin", "shard/aa/nested/two.bin"];
        let kept = self.path("shard/ab/three.bin");

        for file in &doomed {
            self.store
                .put_bytes(&self.path(file), random_bytes(16))
                .await?;
        }
        self.store.put_bytes(&kept, random_bytes(16)).await?;

        self.store.delete_dir(&self.path("shard/aa")).await?;

        for file in &doomed {
            assert!(
                !self.store.exists(&self.path(file)).await?,
                "{file} should be gone"
            );
        }
        assert!(self.store.exists(&kept).await?, "sibling shard must survive");

        // Removing a missing directory is a no-op.
        self.store.delete_dir(&self.path("shard/aa")).await?;

        Ok(())
    }

    pub async fn cleanup(&self) -> StoreResult<()> {
        self.store.delete_dir(&self.prefix).await
    }
}

/// Generate random bytes for testing.
pub fn random_bytes(len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    rand::rng().fill(&mut data[..]);
    Bytes::from(data)
}
