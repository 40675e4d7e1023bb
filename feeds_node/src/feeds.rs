//! The feed lifecycle manager.

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::Bytes;
use feeds_core::{
    DiscoveryKey, EncryptionKey, FeedValue, FeedsError, JoinOptions, PublicKey, RootSeed, Store,
    Swarm,
    paths::{
        DEFAULT_ICON_PATH, field_path, icon_path, is_metadata_name, metadata_path, normalize,
    },
};
use feeds_drive::{Core, Corestore, Drive};
use futures::future::join_all;
use serde_json::Value;

use crate::{
    config::FeedsConfig,
    create_store,
    identity::load_or_create_seed,
    reader::FeedReader,
    reconcile::{Reconciliation, ensure_file, reconcile},
    registry::DriveRegistry,
    swarm::MemorySwarm,
    url::FeedUrl,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedOptions {
    /// Announce the feed on the swarm before returning.
    pub announce: bool,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self { announce: true }
    }
}

impl FeedOptions {
    /// Open without announcing.
    pub fn private() -> Self {
        Self { announce: false }
    }
}

/// Everything a reader needs to locate and decrypt a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedKeys {
    pub key: PublicKey,
    pub encryption_key: EncryptionKey,
}

impl FeedKeys {
    pub fn url(&self, path: &str) -> FeedUrl {
        FeedUrl::new(self.key, self.encryption_key, path)
    }
}

/// Outcome for one core during [`Feeds::destroy`].
#[derive(Debug)]
pub struct CoreCleanup {
    pub key: PublicKey,
    pub discovery_key: DiscoveryKey,
    /// Shard directory inside the store.
    pub dir: String,
    pub error: Option<anyhow::Error>,
}

#[derive(Debug)]
pub struct CleanupReport {
    pub feed_id: String,
    pub cores: Vec<CoreCleanup>,
}

impl CleanupReport {
    pub fn is_complete(&self) -> bool {
        self.cores.iter().all(|core| core.error.is_none())
    }

    pub fn failures(&self) -> impl Iterator<Item = &CoreCleanup> {
        self.cores.iter().filter(|core| core.error.is_some())
    }

    /// Fails with [`FeedsError::PartialCleanup`] if any core failed.
    pub fn into_result(self) -> anyhow::Result<()> {
        let failed = self.failures().count();
        if failed == 0 {
            return Ok(());
        }
        Err(FeedsError::PartialCleanup {
            feed_id: self.feed_id,
            failed,
            total: self.cores.len(),
        }
        .into())
    }
}

/// Many independent feeds, one root seed.
///
/// Every feed gets its own drive in a namespace derived from the root seed
/// and the feed id, so nothing but the seed is ever persisted.
#[derive(Debug)]
pub struct Feeds {
    store: Arc<dyn Store>,
    corestore: Corestore,
    registry: DriveRegistry,
    swarm: Arc<dyn Swarm>,
    header: Option<Value>,
    documents: BTreeMap<String, FeedValue>,
    announce: JoinOptions,
    closed: AtomicBool,
}

impl Feeds {
    /// Opens the configured store, resolves the root seed and starts an
    /// in-process swarm.
    pub async fn init(config: FeedsConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let store = create_store(&config.storage);
        let seed = load_or_create_seed(&config.identity, store.as_ref()).await?;
        Ok(Self::with_parts(
            &config,
            store,
            &seed,
            Arc::new(MemorySwarm::new()),
        ))
    }

    /// Assembles a manager from explicit parts. `config.storage` and
    /// `config.identity` are ignored.
    pub fn with_parts(
        config: &FeedsConfig,
        store: Arc<dyn Store>,
        seed: &RootSeed,
        swarm: Arc<dyn Swarm>,
    ) -> Self {
        let corestore = Corestore::new(store.clone(), seed);
        Self {
            store,
            registry: DriveRegistry::new(corestore.clone()),
            corestore,
            swarm,
            header: config.header.clone(),
            documents: config.documents(),
            announce: config.announce,
            closed: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn corestore(&self) -> &Corestore {
        &self.corestore
    }

    pub fn registry(&self) -> &DriveRegistry {
        &self.registry
    }

    pub fn swarm(&self) -> &Arc<dyn Swarm> {
        &self.swarm
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> anyhow::Result<()> {
        if self.is_closed() {
            return Err(FeedsError::Closed("feeds").into());
        }
        Ok(())
    }

    /// The ready drive of `feed_id`.
    pub async fn drive(&self, feed_id: &str) -> anyhow::Result<Drive> {
        self.check_open()?;
        if feed_id.is_empty() {
            return Err(FeedsError::Configuration("feed id must not be empty".into()).into());
        }
        self.registry.get_or_create(feed_id).await
    }

    /// Opens the feed, brings its header and metadata up to date, announces
    /// it (unless `options.announce` is off) and returns its keys.
    ///
    /// Documents are reconciled before the announce, so peers never find the
    /// feed unconfigured. Joining has no timeout of its own.
    pub async fn feed(&self, feed_id: &str, options: FeedOptions) -> anyhow::Result<FeedKeys> {
        let drive = self.drive(feed_id).await?;
        reconcile(&drive, &self.documents).await?;

        if options.announce {
            let topic = drive.discovery_key();
            self.swarm.join(topic, self.announce).await?;
            self.swarm.flush(&topic).await?;
            tracing::debug!(feed = feed_id, topic = %topic.fmt_short(), "announced feed");
        }

        Ok(FeedKeys {
            key: drive.key(),
            encryption_key: *drive.encryption_key(),
        })
    }

    /// Path of the data entry `key`, following the header's field mapping.
    fn data_path(&self, key: &str) -> String {
        field_path(self.header.as_ref(), key)
    }

    /// Writes `value` under the data entry `key`. Last writer wins.
    pub async fn update(
        &self,
        feed_id: &str,
        key: &str,
        value: impl Into<FeedValue>,
    ) -> anyhow::Result<()> {
        let drive = self.drive(feed_id).await?;
        drive.put(&self.data_path(key), value.into().encode()).await
    }

    /// Reads the data entry `key`, decoded leniently.
    pub async fn get(&self, feed_id: &str, key: &str) -> anyhow::Result<Option<FeedValue>> {
        let drive = self.drive(feed_id).await?;
        Ok(drive
            .get(&self.data_path(key))
            .await?
            .map(|bytes| FeedValue::decode(&bytes)))
    }

    /// Removes the data entry `key`. Returns whether it existed.
    pub async fn delete(&self, feed_id: &str, key: &str) -> anyhow::Result<bool> {
        let drive = self.drive(feed_id).await?;
        drive.del(&self.data_path(key)).await
    }

    /// Writes `bytes` to `path` unless already present. Returns whether a
    /// write happened.
    pub async fn ensure_file(
        &self,
        feed_id: &str,
        path: &str,
        bytes: impl Into<Bytes>,
    ) -> anyhow::Result<bool> {
        let drive = self.drive(feed_id).await?;
        ensure_file(&drive, &normalize(path), bytes.into()).await
    }

    /// Writes the icon to the first path declared in the header's `icons`,
    /// or to `/icon`.
    pub async fn ensure_icon(&self, feed_id: &str, bytes: impl Into<Bytes>) -> anyhow::Result<bool> {
        let path = icon_path(self.header.as_ref(), None)
            .unwrap_or_else(|| DEFAULT_ICON_PATH.to_owned());
        self.ensure_file(feed_id, &path, bytes).await
    }

    /// Sets one metadata document of a feed, writing only on change.
    pub async fn set_metadata(
        &self,
        feed_id: &str,
        name: &str,
        value: impl Into<FeedValue>,
    ) -> anyhow::Result<Reconciliation> {
        if !is_metadata_name(name) {
            return Err(FeedsError::Configuration(format!(
                "metadata name '{name}' must be non-empty and contain no '/'"
            ))
            .into());
        }
        let drive = self.drive(feed_id).await?;
        let target = BTreeMap::from([(metadata_path(name), value.into())]);
        reconcile(&drive, &target).await
    }

    /// Opens a read-only view of any feed in this manager's store.
    pub async fn reader(&self, url: &FeedUrl) -> anyhow::Result<FeedReader> {
        self.check_open()?;
        FeedReader::open(&self.corestore, url).await
    }

    /// Closes every core of the feed and removes their shards from disk.
    ///
    /// Cores are processed concurrently and one failure does not stop the
    /// others; inspect the report or call [`CleanupReport::into_result`].
    /// Stores that are not on disk only get their cores closed. The feed must
    /// not be in use elsewhere while it is destroyed.
    pub async fn destroy(&self, feed_id: &str) -> anyhow::Result<CleanupReport> {
        let drive = self.drive(feed_id).await?;
        let cores = drive.cores()?;
        let on_disk = self.store.features().on_disk;

        let cleanups = join_all(cores.into_iter().map(|core| self.remove_core(core, on_disk))).await;

        if let Err(e) = self.swarm.leave(&drive.discovery_key()).await {
            tracing::warn!(feed = feed_id, "failed to leave topic: {e:#}");
        }

        let report = CleanupReport {
            feed_id: feed_id.to_owned(),
            cores: cleanups,
        };
        tracing::info!(
            feed = feed_id,
            cores = report.cores.len(),
            failed = report.failures().count(),
            "destroyed feed"
        );
        Ok(report)
    }

    async fn remove_core(&self, core: Core, on_disk: bool) -> CoreCleanup {
        let result = async {
            core.close().await?;
            if on_disk {
                self.store.delete_dir(core.dir()).await?;
            }
            anyhow::Ok(())
        }
        .await;

        if let Err(e) = &result {
            tracing::warn!(core = %core.key().fmt_short(), dir = core.dir(), "cleanup failed: {e:#}");
        }
        CoreCleanup {
            key: core.key(),
            discovery_key: core.discovery_key(),
            dir: core.dir().to_owned(),
            error: result.err(),
        }
    }

    /// Closes every open feed one after another, then the cores and the
    /// swarm. Every step runs even if an earlier one failed; the first error
    /// is returned. Later calls are no-ops; do not call it concurrently.
    pub async fn close(&self) -> anyhow::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let drives = self.registry.drives();
        tracing::info!(feeds = drives.len(), "closing feeds");

        let mut first_error = None;
        for (feed_id, drive) in drives {
            if let Err(e) = drive.close().await {
                tracing::warn!(feed = %feed_id, "failed to close feed: {e:#}");
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.corestore.close().await {
            tracing::warn!("failed to close cores: {e:#}");
            first_error.get_or_insert(e);
        }
        if let Err(e) = self.swarm.close().await {
            tracing::warn!("failed to close swarm: {e:#}");
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
