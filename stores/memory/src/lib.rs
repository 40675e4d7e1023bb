use bytes::Bytes;
use dashmap::DashMap;
use feeds_core::store::{StoreError, StoreFeatures, StoreResult};

/// Store keeping every object in process memory. Not on disk.
#[derive(Debug)]
pub struct MemoryStore {
    files: DashMap<String, Bytes>,
}

impl MemoryStore {
    /// Creates a new, empty `MemoryStore`.
    pub fn new() -> Self {
        Self {
            files: DashMap::new(),
        }
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn is_below(path: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[async_trait::async_trait]
impl feeds_core::store::Store for MemoryStore {
    fn features(&self) -> StoreFeatures {
        StoreFeatures {
            case_sensitive: true,
            recommended_max_dir_size: u64::MAX,
            on_disk: false,
        }
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        Ok(self.files.contains_key(path))
    }

    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<()> {
        self.files.insert(path.to_string(), bytes);
        Ok(())
    }

    async fn open_read_bytes(
        &self,
        path: &str,
        offset: u64,
        max_len: Option<u64>,
    ) -> StoreResult<Bytes> {
        let file = self
            .files
            .get(path)
            .ok_or_else(|| StoreError::NotFound(path.to_owned()))?;
        let file_len = file.len();
        let start = usize::try_from(offset).unwrap_or(usize::MAX);

        if start >= file_len {
            return Ok(Bytes::new());
        }

        let remaining = file_len - start;
        let len = match max_len {
            Some(max) => std::cmp::min(remaining, usize::try_from(max).unwrap_or(usize::MAX)),
            None => remaining,
        };

        Ok(file.slice(start..start + len))
    }

    async fn size(&self, path: &str) -> StoreResult<u64> {
        let file = self
            .files
            .get(path)
            .ok_or_else(|| StoreError::NotFound(path.to_owned()))?;
        Ok(file.len() as u64)
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        self.files.remove(path);
        Ok(())
    }

    async fn delete_dir(&self, prefix: &str) -> StoreResult<()> {
        self.files.retain(|path, _| !is_below(path, prefix));
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .files
            .iter()
            .filter(|entry| is_below(entry.key(), prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feeds_core::Store;
    use feeds_core::testutil::StoreTests;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        StoreTests::new(&store).run_all().await.unwrap();
        assert!(store.is_empty(), "suite cleans up after itself");
    }

    #[tokio::test]
    async fn not_on_disk() {
        let store = MemoryStore::new();
        assert!(!store.features().on_disk);
        assert!(store.local_root().is_none());
    }
}
