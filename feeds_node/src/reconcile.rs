//! Diff-and-write of documents against a drive.
//!
//! Every write replicates to readers, so values already persisted (byte-equal
//! or structurally equal JSON) are never rewritten.

use std::collections::BTreeMap;

use bytes::Bytes;
use feeds_core::{FeedValue, paths::normalize};
use feeds_drive::Drive;

/// Outcome of one [`reconcile`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Paths that were written.
    pub written: Vec<String>,
    pub unchanged: usize,
}

impl Reconciliation {
    pub fn is_noop(&self) -> bool {
        self.written.is_empty()
    }
}

/// Brings the documents at the paths of `target` to the given values in one
/// batch. Documents not named in `target` are left alone.
pub async fn reconcile(
    drive: &Drive,
    target: &BTreeMap<String, FeedValue>,
) -> anyhow::Result<Reconciliation> {
    let mut batch = drive.batch();
    let mut outcome = Reconciliation::default();

    for (path, value) in target {
        match batch.get(path).await? {
            Some(existing) if value.matches_encoded(&existing) => outcome.unchanged += 1,
            _ => {
                batch.put(path, value.encode());
                outcome.written.push(normalize(path));
            }
        }
    }

    batch.flush().await?;
    tracing::debug!(
        drive = %drive.key().fmt_short(),
        written = outcome.written.len(),
        unchanged = outcome.unchanged,
        "reconciled documents"
    );
    Ok(outcome)
}

/// Writes `bytes` to `path` unless that exact content is already there.
/// Returns whether a write happened.
pub async fn ensure_file(drive: &Drive, path: &str, bytes: Bytes) -> anyhow::Result<bool> {
    let mut batch = drive.batch();
    if batch.get(path).await?.as_deref() == Some(bytes.as_ref()) {
        return Ok(false);
    }
    batch.put(path, bytes);
    batch.flush().await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use feeds_core::{EncryptionKey, RootSeed};
    use feeds_drive::Corestore;
    use feeds_store_memory::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    async fn drive() -> Drive {
        let corestore = Corestore::new(
            Arc::new(MemoryStore::new()),
            &RootSeed::from_bytes([3u8; 32]),
        );
        let drive = Drive::new(
            &corestore.namespace("feed"),
            EncryptionKey::from_bytes([4u8; 32]),
        )
        .unwrap();
        drive.ready().await.unwrap();
        drive
    }

    async fn db_len(drive: &Drive) -> u64 {
        drive.cores().unwrap()[0].len().await.unwrap()
    }

    #[tokio::test]
    async fn second_pass_writes_nothing() {
        let drive = drive().await;
        let target = BTreeMap::from([
            ("/slashfeed.json".to_string(), FeedValue::from(json!({"name": "a", "v": [1, 2]}))),
            ("/meta/author.json".to_string(), FeedValue::from("someone")),
        ]);

        let first = reconcile(&drive, &target).await.unwrap();
        assert_eq!(first.written.len(), 2);
        let len = db_len(&drive).await;

        let second = reconcile(&drive, &target).await.unwrap();
        assert!(second.is_noop());
        assert_eq!(second.unchanged, 2);
        assert_eq!(db_len(&drive).await, len);
    }

    #[tokio::test]
    async fn structurally_equal_json_is_unchanged() {
        let drive = drive().await;
        drive
            .put("/slashfeed.json", r#"{ "b": 1,   "a": [1,2] }"#)
            .await
            .unwrap();
        let target = BTreeMap::from([(
            "/slashfeed.json".to_string(),
            FeedValue::from(json!({"a": [1, 2], "b": 1})),
        )]);
        assert!(reconcile(&drive, &target).await.unwrap().is_noop());
    }

    #[tokio::test]
    async fn one_changed_document_one_write() {
        let drive = drive().await;
        let mut target = BTreeMap::from([
            ("/meta/a.json".to_string(), FeedValue::from(json!(1))),
            ("/meta/b.json".to_string(), FeedValue::from(json!(2))),
        ]);
        reconcile(&drive, &target).await.unwrap();

        target.insert("/meta/b.json".to_string(), FeedValue::from(json!(3)));
        let outcome = reconcile(&drive, &target).await.unwrap();
        assert_eq!(outcome.written, vec!["/meta/b.json".to_string()]);
        assert_eq!(outcome.unchanged, 1);
        assert_eq!(drive.get("/meta/b.json").await.unwrap().unwrap(), Bytes::from_static(b"3"));
    }

    #[tokio::test]
    async fn ensure_file_is_idempotent() {
        let drive = drive().await;
        let icon = Bytes::from_static(b"\x89PNG");
        assert!(ensure_file(&drive, "/icon", icon.clone()).await.unwrap());
        assert!(!ensure_file(&drive, "icon", icon).await.unwrap());
        assert!(
            ensure_file(&drive, "/icon", Bytes::from_static(b"GIF8"))
                .await
                .unwrap()
        );
    }
}
