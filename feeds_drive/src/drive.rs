use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, OnceLock, Weak},
};

use anyhow::anyhow;
use bytes::Bytes;
use feeds_core::{DiscoveryKey, EncryptionKey, FeedsError, PublicKey, paths::normalize};
use tokio::sync::{OnceCell, RwLock, broadcast, watch};

use crate::{
    batch::Batch,
    core::Core,
    corestore::Corestore,
    db::{BlobRef, DbBlock, DbOp},
};

/// Name of the core holding a drive's path index.
pub const DB_CORE: &str = "db";
/// Name of the core holding a drive's values.
pub const BLOBS_CORE: &str = "blobs";

const UPDATE_CHANNEL_CAPACITY: usize = 64;

type CloseCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveStatus {
    Opening,
    Ready,
    Closed,
}

/// A path changed, either by a local write or by replaying remote blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveUpdate {
    pub path: String,
    pub deleted: bool,
}

#[derive(Default)]
struct Index {
    entries: BTreeMap<String, BlobRef>,
    /// Number of db blocks already applied to `entries`.
    synced: u64,
}

/// A path-keyed store of byte values on top of two cores.
///
/// The db core records path operations, the blobs core the values. The public
/// key of a drive is the key of its db core. Clones share state.
#[derive(Clone)]
pub struct Drive {
    inner: Arc<DriveInner>,
}

struct DriveInner {
    corestore: Corestore,
    encryption_key: EncryptionKey,
    db: Core,
    blobs: OnceLock<Core>,
    ready: OnceCell<()>,
    index: RwLock<Index>,
    /// Serializes writers with each other and with `close`.
    write_lock: tokio::sync::Mutex<()>,
    status: watch::Sender<DriveStatus>,
    updates: broadcast::Sender<DriveUpdate>,
    on_close: Mutex<Vec<CloseCallback>>,
}

impl std::fmt::Debug for Drive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Drive")
            .field("key", &self.key())
            .field("writable", &self.is_writable())
            .field("status", &self.status())
            .finish()
    }
}

impl Drive {
    /// Writable drive owned by `corestore`'s namespace.
    pub fn new(corestore: &Corestore, encryption_key: EncryptionKey) -> anyhow::Result<Self> {
        let db = corestore.get(DB_CORE, &encryption_key)?;
        let blobs = corestore.get(BLOBS_CORE, &encryption_key)?;
        Ok(Self::with_cores(corestore, encryption_key, db, Some(blobs)))
    }

    /// Read-only view of the drive whose db core has `key`.
    pub fn open_read_only(
        corestore: &Corestore,
        key: PublicKey,
        encryption_key: EncryptionKey,
    ) -> anyhow::Result<Self> {
        let db = corestore.get_by_key(key, &encryption_key)?;
        Ok(Self::with_cores(corestore, encryption_key, db, None))
    }

    fn with_cores(
        corestore: &Corestore,
        encryption_key: EncryptionKey,
        db: Core,
        blobs: Option<Core>,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let inner = Arc::new(DriveInner {
            corestore: corestore.clone(),
            encryption_key,
            db,
            blobs: OnceLock::new(),
            ready: OnceCell::new(),
            index: RwLock::new(Index::default()),
            write_lock: tokio::sync::Mutex::new(()),
            status: watch::Sender::new(DriveStatus::Opening),
            updates,
            on_close: Mutex::new(Vec::new()),
        });
        let drive = Self { inner };
        drive.watch_core(&drive.inner.db);
        if let Some(blobs) = blobs {
            drive.watch_core(&blobs);
            let _ = drive.inner.blobs.set(blobs);
        }
        drive
    }

    /// Closing any core of the drive closes the drive.
    fn watch_core(&self, core: &Core) {
        let weak: Weak<DriveInner> = Arc::downgrade(&self.inner);
        core.on_close(move || {
            if let Some(inner) = weak.upgrade() {
                inner.mark_closed();
            }
        });
    }

    pub fn key(&self) -> PublicKey {
        self.inner.db.key()
    }

    pub fn discovery_key(&self) -> DiscoveryKey {
        self.inner.db.discovery_key()
    }

    pub fn encryption_key(&self) -> &EncryptionKey {
        &self.inner.encryption_key
    }

    pub fn is_writable(&self) -> bool {
        self.inner.db.is_writable()
    }

    pub fn status(&self) -> DriveStatus {
        *self.inner.status.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.status() == DriveStatus::Closed
    }

    pub fn is_ready(&self) -> bool {
        self.status() == DriveStatus::Ready
    }

    /// Whether both handles refer to the same open drive.
    pub fn ptr_eq(&self, other: &Drive) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn check_open(&self) -> anyhow::Result<()> {
        if self.is_closed() {
            return Err(FeedsError::Closed("drive").into());
        }
        Ok(())
    }

    /// Loads the drive: writes the header block of a fresh writable drive,
    /// then replays the db core into the path index. Idempotent; concurrent
    /// callers share one load.
    pub async fn ready(&self) -> anyhow::Result<()> {
        self.check_open()?;
        self.inner.ready.get_or_try_init(|| self.load()).await?;
        Ok(())
    }

    async fn load(&self) -> anyhow::Result<()> {
        let db = &self.inner.db;
        let length = db.len().await?;

        if length == 0 {
            let blobs = match self.inner.blobs.get() {
                Some(blobs) if db.is_writable() => blobs,
                _ => {
                    return Err(FeedsError::NotReady(format!(
                        "drive {} has no header block yet",
                        db.key().fmt_short()
                    ))
                    .into());
                }
            };
            let header = DbBlock::header(blobs.key().into())
                .to_vec()
                .map_err(|e| anyhow!("encoding drive header: {e}"))?;
            db.append(&[Bytes::from(header)]).await?;
        } else {
            let header = decode_block(&db.get(0).await?, 0)?;
            let blobs_key = header.blobs_key.map(PublicKey::from_bytes).ok_or_else(|| {
                FeedsError::Corrupt(format!("drive {} header names no blobs core", self.key()))
            })?;
            match self.inner.blobs.get() {
                Some(blobs) if blobs.key() != blobs_key => {
                    return Err(FeedsError::Corrupt(format!(
                        "drive {} header names a foreign blobs core",
                        self.key()
                    ))
                    .into());
                }
                Some(_) => {}
                None => {
                    let blobs = self
                        .inner
                        .corestore
                        .get_by_key(blobs_key, &self.inner.encryption_key)?;
                    self.watch_core(&blobs);
                    let _ = self.inner.blobs.set(blobs);
                }
            }
        }

        self.blobs()?.ready().await?;
        {
            let mut index = self.inner.index.write().await;
            index.synced = 1;
        }
        self.replay().await?;

        // A close that raced the load wins.
        self.inner.status.send_if_modified(|status| {
            if *status == DriveStatus::Opening {
                *status = DriveStatus::Ready;
                true
            } else {
                false
            }
        });
        tracing::debug!(drive = %self.key().fmt_short(), writable = self.is_writable(), "drive ready");
        Ok(())
    }

    fn blobs(&self) -> anyhow::Result<&Core> {
        self.inner
            .blobs
            .get()
            .ok_or_else(|| FeedsError::NotReady(format!("drive {}", self.key().fmt_short())).into())
    }

    /// Applies db blocks not yet in the index.
    async fn replay(&self) -> anyhow::Result<usize> {
        let length = self.inner.db.refresh().await?;
        // Values are appended before the db block naming them.
        self.blobs()?.refresh().await?;
        let mut index = self.inner.index.write().await;
        let mut changed = Vec::new();

        while index.synced < length {
            let position = index.synced;
            let block = decode_block(&self.inner.db.get(position).await?, position)?;
            for op in block.ops {
                match op.blob {
                    Some(blob) => {
                        index.entries.insert(op.path.clone(), blob);
                    }
                    None => {
                        index.entries.remove(&op.path);
                    }
                }
                changed.push(DriveUpdate {
                    deleted: op.blob.is_none(),
                    path: op.path,
                });
            }
            index.synced = position + 1;
        }
        drop(index);

        let count = changed.len();
        for update in changed {
            let _ = self.inner.updates.send(update);
        }
        Ok(count)
    }

    /// Pulls blocks appended by another handle on the same store. Returns the
    /// number of path changes applied.
    pub async fn update(&self) -> anyhow::Result<usize> {
        self.ready().await?;
        self.replay().await
    }

    pub async fn get(&self, path: &str) -> anyhow::Result<Option<Bytes>> {
        self.ready().await?;
        let path = normalize(path);
        let blob = self.inner.index.read().await.entries.get(&path).copied();
        match blob {
            Some(blob) => Ok(Some(self.blobs()?.get(blob.index).await?)),
            None => Ok(None),
        }
    }

    pub async fn exists(&self, path: &str) -> anyhow::Result<bool> {
        self.ready().await?;
        let path = normalize(path);
        Ok(self.inner.index.read().await.entries.contains_key(&path))
    }

    pub async fn put(&self, path: &str, value: impl Into<Bytes>) -> anyhow::Result<()> {
        self.apply(vec![(normalize(path), Some(value.into()))]).await
    }

    /// Removes `path`. Returns whether it existed; nothing is written if not.
    pub async fn del(&self, path: &str) -> anyhow::Result<bool> {
        let path = normalize(path);
        if !self.exists(&path).await? {
            return Ok(false);
        }
        self.apply(vec![(path, None)]).await?;
        Ok(true)
    }

    /// Paths at or below the directory `prefix`, sorted.
    pub async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        self.ready().await?;
        let mut dir = normalize(prefix);
        if !dir.ends_with('/') {
            dir.push('/');
        }
        let index = self.inner.index.read().await;
        Ok(index
            .entries
            .range(dir.clone()..)
            .take_while(|(path, _)| path.starts_with(&dir))
            .map(|(path, _)| path.clone())
            .collect())
    }

    /// Starts a batch; staged writes land atomically on [`Batch::flush`].
    pub fn batch(&self) -> Batch {
        Batch::new(self.clone())
    }

    /// Writes `ops` as one db block. Paths must already be normalized.
    pub(crate) async fn apply(&self, ops: Vec<(String, Option<Bytes>)>) -> anyhow::Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        self.ready().await?;
        if !self.is_writable() {
            return Err(FeedsError::ReadOnly(format!("drive {}", self.key().fmt_short())).into());
        }

        let _guard = self.inner.write_lock.lock().await;
        self.check_open()?;
        let blobs = self.blobs()?;

        let values: Vec<Bytes> = ops.iter().filter_map(|(_, value)| value.clone()).collect();
        let mut next_blob = if values.is_empty() {
            0
        } else {
            blobs.append(&values).await?
        };

        let mut db_ops = Vec::with_capacity(ops.len());
        for (path, value) in ops {
            let blob = value.map(|value| {
                let blob = BlobRef {
                    index: next_blob,
                    length: value.len() as u64,
                };
                next_blob += 1;
                blob
            });
            db_ops.push(DbOp { path, blob });
        }

        let block = DbBlock::ops(db_ops.clone())
            .to_vec()
            .map_err(|e| anyhow!("encoding drive block: {e}"))?;
        let position = self.inner.db.append(&[Bytes::from(block)]).await?;

        let mut index = self.inner.index.write().await;
        for op in &db_ops {
            match op.blob {
                Some(blob) => {
                    index.entries.insert(op.path.clone(), blob);
                }
                None => {
                    index.entries.remove(&op.path);
                }
            }
        }
        index.synced = position + 1;
        drop(index);

        tracing::trace!(drive = %self.key().fmt_short(), ops = db_ops.len(), "applied batch");
        for op in db_ops {
            let _ = self.inner.updates.send(DriveUpdate {
                deleted: op.blob.is_none(),
                path: op.path,
            });
        }
        Ok(())
    }

    /// Receives every path change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DriveUpdate> {
        self.inner.updates.subscribe()
    }

    /// The drive's db and blobs cores, in that order.
    pub fn cores(&self) -> anyhow::Result<Vec<Core>> {
        if self.inner.ready.initialized()
            && let Some(blobs) = self.inner.blobs.get()
        {
            return Ok(vec![self.inner.db.clone(), blobs.clone()]);
        }
        Err(FeedsError::NotReady(format!("drive {}", self.key().fmt_short())).into())
    }

    /// Closes both cores once any in-flight write finishes. Idempotent.
    pub async fn close(&self) -> anyhow::Result<()> {
        let _guard = self.inner.write_lock.lock().await;
        self.inner.db.close().await?;
        if let Some(blobs) = self.inner.blobs.get() {
            blobs.close().await?;
        }
        self.inner.mark_closed();
        Ok(())
    }

    /// Resolves once the drive is closed.
    pub async fn closed(&self) {
        let mut status = self.inner.status.subscribe();
        let _ = status.wait_for(|status| *status == DriveStatus::Closed).await;
    }

    /// Registers `callback` to run once when the drive closes, whether through
    /// [`Drive::close`] or by one of its cores being closed. Runs it right away
    /// if the drive is already closed.
    pub fn on_close(&self, callback: impl FnOnce() + Send + 'static) {
        {
            let mut callbacks = match self.inner.on_close.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !self.is_closed() {
                callbacks.push(Box::new(callback));
                return;
            }
        }
        callback();
    }
}

impl DriveInner {
    fn mark_closed(&self) {
        let callbacks = {
            let mut callbacks = match self.on_close.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if self.status.send_replace(DriveStatus::Closed) == DriveStatus::Closed {
                return;
            }
            std::mem::take(&mut *callbacks)
        };
        tracing::debug!(drive = %self.db.key().fmt_short(), "drive closed");
        for callback in callbacks {
            callback();
        }
    }
}

fn decode_block(bytes: &[u8], position: u64) -> anyhow::Result<DbBlock> {
    DbBlock::from_bytes(bytes)
        .map_err(|e| FeedsError::Corrupt(format!("db block {position}: {e}")).into())
}
