use std::collections::BTreeMap;

use bytes::Bytes;
use feeds_core::paths::normalize;

use crate::drive::Drive;

/// Writes staged against one drive and committed as a single db block.
///
/// Reads through the batch see staged values first. Dropping a batch without
/// flushing discards it.
#[derive(Debug)]
pub struct Batch {
    drive: Drive,
    staged: BTreeMap<String, Option<Bytes>>,
}

impl Batch {
    pub(crate) fn new(drive: Drive) -> Self {
        Self {
            drive,
            staged: BTreeMap::new(),
        }
    }

    pub async fn get(&self, path: &str) -> anyhow::Result<Option<Bytes>> {
        let path = normalize(path);
        if let Some(staged) = self.staged.get(&path) {
            return Ok(staged.clone());
        }
        self.drive.get(&path).await
    }

    pub fn put(&mut self, path: &str, value: impl Into<Bytes>) {
        self.staged.insert(normalize(path), Some(value.into()));
    }

    pub fn del(&mut self, path: &str) {
        self.staged.insert(normalize(path), None);
    }

    /// Number of staged paths.
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Commits the staged writes and returns how many paths they touched. An
    /// empty batch writes nothing.
    pub async fn flush(self) -> anyhow::Result<usize> {
        let count = self.staged.len();
        if count > 0 {
            self.drive.apply(self.staged.into_iter().collect()).await?;
        }
        Ok(count)
    }
}
