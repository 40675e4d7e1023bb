//! One drive per feed, opened at most once.
//!
//! The registry map holds either an open drive or the in-flight open for a
//! feed. Concurrent `get_or_create` calls for a feed that is still opening
//! await the same shared future, so a namespace never gets two drives. The
//! map is only locked for bookkeeping, never across I/O.

use std::sync::{
    Arc, Weak,
    atomic::{AtomicU64, Ordering},
};

use anyhow::anyhow;
use dashmap::{DashMap, mapref::entry::Entry};
use feeds_core::{DerivedKeyMaterial, FeedsError};
use feeds_drive::{Corestore, Drive};
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};

type OpenResult = Result<Drive, Arc<anyhow::Error>>;
type OpenFuture = Shared<BoxFuture<'static, OpenResult>>;

enum Slot {
    Ready(Drive),
    Opening { id: u64, open: OpenFuture },
}

enum Lookup {
    Ready(Drive),
    Opening(OpenFuture),
}

#[derive(Clone)]
pub struct DriveRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    corestore: Corestore,
    drives: DashMap<String, Slot>,
    next_open_id: AtomicU64,
}

impl std::fmt::Debug for DriveRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveRegistry")
            .field("entries", &self.inner.drives.len())
            .finish()
    }
}

impl DriveRegistry {
    /// Drives are opened in namespaces below `corestore`'s.
    pub fn new(corestore: Corestore) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                corestore,
                drives: DashMap::new(),
                next_open_id: AtomicU64::new(1),
            }),
        }
    }

    /// Returns the ready drive of `feed_id`, opening it first if needed.
    pub async fn get_or_create(&self, feed_id: &str) -> anyhow::Result<Drive> {
        let lookup = match self.inner.drives.entry(feed_id.to_owned()) {
            Entry::Occupied(mut entry) => {
                let found = match entry.get() {
                    Slot::Ready(drive) if !drive.is_closed() => Some(Lookup::Ready(drive.clone())),
                    Slot::Opening { open, .. } => Some(Lookup::Opening(open.clone())),
                    // Closed, its removal callback has not run yet.
                    Slot::Ready(_) => None,
                };
                match found {
                    Some(found) => found,
                    None => {
                        let (slot, open) = self.start_open(feed_id);
                        entry.insert(slot);
                        Lookup::Opening(open)
                    }
                }
            }
            Entry::Vacant(entry) => {
                let (slot, open) = self.start_open(feed_id);
                entry.insert(slot);
                Lookup::Opening(open)
            }
        };

        match lookup {
            Lookup::Ready(drive) => Ok(drive),
            Lookup::Opening(open) => open.await.map_err(unshare),
        }
    }

    fn start_open(&self, feed_id: &str) -> (Slot, OpenFuture) {
        let id = self.inner.next_open_id.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::downgrade(&self.inner);
        let corestore = self.inner.corestore.clone();
        let feed_id = feed_id.to_owned();

        let open = async move {
            let result = open_drive(&corestore, &feed_id).await;
            if let Some(inner) = registry.upgrade() {
                inner.settle(&registry, &feed_id, id, &result);
            }
            result.map_err(Arc::new)
        }
        .boxed()
        .shared();

        (
            Slot::Opening {
                id,
                open: open.clone(),
            },
            open,
        )
    }

    /// The open drive of `feed_id`, if any. Never opens.
    pub fn get(&self, feed_id: &str) -> Option<Drive> {
        match self.inner.drives.get(feed_id)?.value() {
            Slot::Ready(drive) if !drive.is_closed() => Some(drive.clone()),
            _ => None,
        }
    }

    /// Open drives, in no particular order.
    pub fn drives(&self) -> Vec<(String, Drive)> {
        self.inner
            .drives
            .iter()
            .filter_map(|entry| match entry.value() {
                Slot::Ready(drive) => Some((entry.key().clone(), drive.clone())),
                Slot::Opening { .. } => None,
            })
            .collect()
    }

    /// Entries in the map, including opens still in flight.
    pub fn len(&self) -> usize {
        self.inner.drives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.drives.is_empty()
    }
}

impl RegistryInner {
    /// Replaces the in-flight marker `id` with the outcome of its open.
    fn settle(
        &self,
        registry: &Weak<RegistryInner>,
        feed_id: &str,
        id: u64,
        result: &anyhow::Result<Drive>,
    ) {
        let is_current = |slot: &Slot| matches!(slot, Slot::Opening { id: current, .. } if *current == id);

        let drive = match result {
            Ok(drive) => drive,
            Err(e) => {
                tracing::debug!(feed = feed_id, "failed to open drive: {e:#}");
                self.drives.remove_if(feed_id, |_, slot| is_current(slot));
                return;
            }
        };

        if let Some(mut slot) = self.drives.get_mut(feed_id)
            && is_current(slot.value())
        {
            *slot = Slot::Ready(drive.clone());
        }

        let registry = registry.clone();
        let feed_id = feed_id.to_owned();
        drive.on_close(move || {
            if let Some(inner) = registry.upgrade() {
                inner
                    .drives
                    .remove_if(&feed_id, |_, slot| matches!(slot, Slot::Ready(d) if d.is_closed()));
            }
        });
    }
}

/// Hands a failed open to one of its waiters. The last waiter gets the
/// original error; the others get a copy of its typed cause, so
/// `downcast_ref::<FeedsError>()` works for every caller.
fn unshare(error: Arc<anyhow::Error>) -> anyhow::Error {
    Arc::try_unwrap(error).unwrap_or_else(|shared| match shared.downcast_ref::<FeedsError>() {
        Some(cause) => {
            let typed = anyhow::Error::from(cause.clone());
            let message = shared.to_string();
            if message == cause.to_string() {
                typed
            } else {
                typed.context(message)
            }
        }
        None => anyhow!("{shared:#}"),
    })
}

async fn open_drive(corestore: &Corestore, feed_id: &str) -> anyhow::Result<Drive> {
    let keys = DerivedKeyMaterial::derive_in(corestore.namespace_seed(), feed_id);
    let drive = Drive::new(
        &corestore.with_namespace(keys.namespace),
        keys.encryption_key,
    )?;
    if let Err(e) = drive.ready().await {
        if let Err(close_err) = drive.close().await {
            tracing::debug!(
                feed = feed_id,
                "failed to close drive after failed open: {close_err:#}"
            );
        }
        return Err(e);
    }
    tracing::debug!(feed = feed_id, key = %drive.key().fmt_short(), "opened drive");
    Ok(drive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use feeds_core::{RootSeed, Store, keys::discovery_key, paths::core_dir};
    use feeds_drive::DB_CORE;
    use feeds_store_local::LocalStore;
    use feeds_store_memory::MemoryStore;

    fn registry() -> DriveRegistry {
        let corestore = Corestore::new(
            Arc::new(MemoryStore::new()),
            &RootSeed::from_bytes([1u8; 32]),
        );
        DriveRegistry::new(corestore)
    }

    #[tokio::test]
    async fn concurrent_opens_share_one_drive() {
        let registry = registry();
        let (a, b) = tokio::join!(registry.get_or_create("x"), registry.get_or_create("x"));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(a.ptr_eq(&b));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("x").unwrap().ptr_eq(&a));
    }

    #[tokio::test]
    async fn closed_drives_are_evicted() {
        let registry = registry();
        let first = registry.get_or_create("x").await.unwrap();
        registry.get_or_create("y").await.unwrap();
        assert_eq!(registry.len(), 2);

        first.close().await.unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("x").is_none());

        let second = registry.get_or_create("x").await.unwrap();
        assert!(!second.ptr_eq(&first));
        assert_eq!(second.key(), first.key());
        assert_eq!(registry.len(), 2);
    }

    /// Length file of the db core of `feed_id`, as laid out in the store.
    fn db_length_path(corestore: &Corestore, feed_id: &str) -> String {
        let keys = DerivedKeyMaterial::derive_in(corestore.namespace_seed(), feed_id);
        let db_key = corestore
            .with_namespace(keys.namespace)
            .core_keys(DB_CORE)
            .public_key;
        format!("{}/length", core_dir(&discovery_key(&db_key)))
    }

    #[tokio::test]
    async fn failed_open_reaches_every_waiter_typed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn Store> = Arc::new(LocalStore::new(temp_dir.path()));
        let corestore = Corestore::new(store.clone(), &RootSeed::from_bytes([2u8; 32]));
        let length_path = db_length_path(&corestore, "f");
        store
            .put_bytes(&length_path, Bytes::from_static(b"bad"))
            .await
            .unwrap();
        let registry = DriveRegistry::new(corestore);

        for _ in 0..8 {
            let (a, b) = tokio::join!(registry.get_or_create("f"), registry.get_or_create("f"));
            for err in [a.unwrap_err(), b.unwrap_err()] {
                assert!(
                    matches!(err.downcast_ref::<FeedsError>(), Some(FeedsError::Corrupt(_))),
                    "untyped error: {err:#}"
                );
            }
            assert!(registry.is_empty());
        }

        store.delete(&length_path).await.unwrap();
        let drive = registry.get_or_create("f").await.unwrap();
        assert!(drive.is_ready());
        assert_eq!(registry.len(), 1);
    }
}
