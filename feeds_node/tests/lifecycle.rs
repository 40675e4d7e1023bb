//! Feed lifecycle properties, end to end.
//!
//! Covers:
//! 1.  **Determinism:** the same seed and feed id give the same keys across restarts.
//! 2.  **Distinctness:** different feed ids give different keys.
//! 3.  **Dedup:** concurrent opens of one feed share one drive, and a closed
//!     drive is replaced by a fresh one.
//! 4.  **Round trip:** values come back through the lenient decoder.
//! 5.  **Idempotent reconciliation:** re-opening a feed writes nothing.
//! 6.  **Clean destroy:** a destroyed feed's shards are gone, others stay.
//! 7.  **Announce:** `feed` is discoverable once it returns.
//! 8.  **Failures:** a failed open or announce surfaces to the caller and
//!     leaves nothing half-registered.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use feeds_core::{
    DerivedKeyMaterial, DiscoveryKey, FeedValue, FeedsError, JoinOptions, RootSeed, Store, Swarm,
    keys::discovery_key, paths::core_dir,
};
use feeds_drive::{Corestore, DB_CORE};
use feeds_node::{FeedOptions, Feeds, FeedsConfig, MemorySwarm};
use feeds_store_local::LocalStore;
use feeds_store_memory::MemoryStore;
use serde_json::json;
use tempfile::tempdir;

const SEED_HEX: &str = "0101010101010101010101010101010101010101010101010101010101010101";

fn local_config(path: &std::path::Path) -> FeedsConfig {
    FeedsConfig::local(path.to_string_lossy()).with_seed(SEED_HEX)
}

fn memory_feeds(config: &FeedsConfig) -> Feeds {
    Feeds::with_parts(
        config,
        Arc::new(MemoryStore::new()),
        &RootSeed::from_bytes([1u8; 32]),
        Arc::new(MemorySwarm::new()),
    )
}

#[tokio::test]
async fn keys_are_deterministic_across_restarts() -> Result<()> {
    let dir = tempdir()?;

    let first = {
        let feeds = Feeds::init(local_config(dir.path())).await?;
        let keys = feeds.feed("234", FeedOptions::default()).await?;
        feeds.close().await?;
        keys
    };

    let feeds = Feeds::init(local_config(dir.path())).await?;
    let second = feeds.feed("234", FeedOptions::default()).await?;
    assert_eq!(first, second);

    // A seed persisted on first run is reused without being configured.
    let other_dir = tempdir()?;
    let generated = {
        let feeds = Feeds::init(FeedsConfig::local(other_dir.path().to_string_lossy())).await?;
        let keys = feeds.feed("234", FeedOptions::private()).await?;
        feeds.close().await?;
        keys
    };
    let feeds = Feeds::init(FeedsConfig::local(other_dir.path().to_string_lossy())).await?;
    assert_eq!(feeds.feed("234", FeedOptions::private()).await?, generated);
    assert_ne!(generated, first);
    Ok(())
}

#[tokio::test]
async fn different_feeds_get_different_keys() -> Result<()> {
    let feeds = memory_feeds(&FeedsConfig::memory());
    let a = feeds.feed("alice", FeedOptions::private()).await?;
    let b = feeds.feed("bob", FeedOptions::private()).await?;
    assert_ne!(a.key, b.key);
    assert_ne!(a.encryption_key, b.encryption_key);
    Ok(())
}

#[tokio::test]
async fn concurrent_feed_calls_share_a_drive() -> Result<()> {
    let feeds = memory_feeds(&FeedsConfig::memory());
    let (a, b, c) = tokio::join!(
        feeds.drive("same"),
        feeds.drive("same"),
        feeds.update("same", "k", "v"),
    );
    let (a, b) = (a?, b?);
    c?;
    assert!(a.ptr_eq(&b));
    assert_eq!(feeds.registry().len(), 1);

    // Closing the drive evicts it; the next call builds a new one.
    let before = feeds.registry().len();
    feeds.drive("other").await?;
    assert_eq!(feeds.registry().len(), before + 1);
    a.close().await?;
    assert_eq!(feeds.registry().len(), before);

    let reopened = feeds.drive("same").await?;
    assert!(!reopened.ptr_eq(&a));
    assert_eq!(reopened.key(), a.key());
    assert_eq!(feeds.get("same", "k").await?, Some(FeedValue::from("v")));
    Ok(())
}

#[tokio::test]
async fn values_round_trip_leniently() -> Result<()> {
    let feeds = memory_feeds(&FeedsConfig::memory());
    let cases: Vec<(FeedValue, FeedValue)> = vec![
        (
            FeedValue::from(vec![0xffu8, 0x00, 0xfe]),
            FeedValue::from(vec![0xffu8, 0x00, 0xfe]),
        ),
        (FeedValue::from("hello world"), FeedValue::from("hello world")),
        // Strings that parse as JSON collapse into the parsed value.
        (FeedValue::from("42"), FeedValue::from(json!(42))),
        (FeedValue::from(json!(42)), FeedValue::from(json!(42))),
        (
            FeedValue::from(json!(["a", 1, {"x": 1}])),
            FeedValue::from(json!(["a", 1, {"x": 1}])),
        ),
        (
            FeedValue::from(json!({"a": 1, "b": [1, 2]})),
            FeedValue::from(json!({"a": 1, "b": [1, 2]})),
        ),
        (FeedValue::null(), FeedValue::null()),
    ];

    for (i, (written, expected)) in cases.into_iter().enumerate() {
        let key = format!("value-{i}");
        feeds.update("values", &key, written).await?;
        assert_eq!(feeds.get("values", &key).await?, Some(expected), "case {i}");
    }
    assert_eq!(feeds.get("values", "missing").await?, None);

    assert!(feeds.delete("values", "value-0").await?);
    assert_eq!(feeds.get("values", "value-0").await?, None);
    Ok(())
}

#[tokio::test]
async fn reopening_a_feed_rewrites_nothing() -> Result<()> {
    let config = FeedsConfig::memory()
        .with_header(json!({"name": "prices", "fields": [{"name": "btc", "main": "/feed/BTCUSD-last"}]}))
        .with_metadata("author", json!("satoshi"))
        .with_metadata("license", json!({"spdx": "MIT"}));
    let feeds = memory_feeds(&config);

    feeds.feed("prices", FeedOptions::private()).await?;
    let drive = feeds.drive("prices").await?;
    let db = drive.cores()?[0].clone();
    let len = db.len().await?;

    feeds.feed("prices", FeedOptions::private()).await?;
    assert_eq!(db.len().await?, len);

    // One changed document, one write.
    let outcome = feeds.set_metadata("prices", "author", json!("hal")).await?;
    assert_eq!(outcome.written, vec!["/meta/author.json".to_string()]);
    assert_eq!(db.len().await?, len + 1);
    assert_eq!(
        drive.get("/meta/license.json").await?,
        Some(Bytes::from_static(br#"{"spdx":"MIT"}"#))
    );

    // Field mapping routes data to the header's path.
    feeds.update("prices", "btc", json!(64000)).await?;
    assert_eq!(
        drive.get("/feed/BTCUSD-last").await?,
        Some(Bytes::from_static(b"64000"))
    );
    assert_eq!(drive.get("/feed/btc").await?, None);
    Ok(())
}

#[tokio::test]
async fn ensure_file_and_icon_write_once() -> Result<()> {
    let config = FeedsConfig::memory().with_header(json!({"icons": {"48": "/icons/48.png"}}));
    let feeds = memory_feeds(&config);

    assert!(feeds.ensure_file("f", "/defaults.json", "{}").await?);
    assert!(!feeds.ensure_file("f", "defaults.json", "{}").await?);

    assert!(feeds.ensure_icon("f", Bytes::from_static(b"png")).await?);
    assert!(!feeds.ensure_icon("f", Bytes::from_static(b"png")).await?);
    let drive = feeds.drive("f").await?;
    assert_eq!(drive.get("/icons/48.png").await?, Some(Bytes::from_static(b"png")));
    Ok(())
}

#[tokio::test]
async fn destroy_removes_only_that_feeds_shards() -> Result<()> {
    let dir = tempdir()?;
    let feeds = Feeds::init(local_config(dir.path())).await?;

    feeds.feed("doomed", FeedOptions::private()).await?;
    feeds.update("doomed", "k", "v").await?;
    feeds.feed("kept", FeedOptions::private()).await?;

    let doomed_dirs: Vec<_> = feeds
        .drive("doomed")
        .await?
        .cores()?
        .iter()
        .map(|core| dir.path().join(core.dir()))
        .collect();
    let kept_dirs: Vec<_> = feeds
        .drive("kept")
        .await?
        .cores()?
        .iter()
        .map(|core| dir.path().join(core.dir()))
        .collect();
    assert_eq!(doomed_dirs.len(), 2);
    assert!(doomed_dirs.iter().all(|path| path.exists()));

    let report = feeds.destroy("doomed").await?;
    assert!(report.is_complete());
    assert_eq!(report.cores.len(), 2);
    report.into_result()?;

    assert!(doomed_dirs.iter().all(|path| !path.exists()));
    assert!(kept_dirs.iter().all(|path| path.exists()));
    assert!(feeds.registry().get("doomed").is_none());
    assert_eq!(feeds.get("kept", "anything").await?, None);
    Ok(())
}

#[tokio::test]
async fn destroy_in_memory_only_closes() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let feeds = Feeds::with_parts(
        &FeedsConfig::memory(),
        store.clone(),
        &RootSeed::from_bytes([2u8; 32]),
        Arc::new(MemorySwarm::new()),
    );
    let drive = feeds.drive("f").await?;
    let dirs: Vec<String> = drive.cores()?.iter().map(|core| core.dir().to_owned()).collect();

    let report = feeds.destroy("f").await?;
    assert!(report.is_complete());
    assert!(drive.is_closed());
    for dir in dirs {
        assert!(!store.list(&dir).await?.is_empty());
    }
    Ok(())
}

#[tokio::test]
async fn destroy_reports_failures_per_core() -> Result<()> {
    let dir = tempdir()?;
    let store: Arc<dyn Store> = Arc::new(LocalStore::new(dir.path()));
    let feeds = Feeds::with_parts(
        &FeedsConfig::memory(),
        store,
        &RootSeed::from_bytes([3u8; 32]),
        Arc::new(MemorySwarm::new()),
    );
    let drive = feeds.drive("f").await?;
    let cores = drive.cores()?;

    // Turn one shard directory into a file so removing it fails.
    let blocked = dir.path().join(cores[1].dir());
    std::fs::remove_dir_all(&blocked)?;
    std::fs::write(&blocked, b"not a directory")?;

    let report = feeds.destroy("f").await?;
    assert!(!report.is_complete());
    assert_eq!(report.failures().count(), 1);
    assert!(!dir.path().join(cores[0].dir()).exists());

    let err = report.into_result().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<FeedsError>(),
        Some(FeedsError::PartialCleanup { failed: 1, total: 2, .. })
    ));
    Ok(())
}

#[tokio::test]
async fn feed_is_discoverable_when_it_returns() -> Result<()> {
    let swarm = MemorySwarm::new();
    let observer = MemorySwarm::with_dht(swarm.dht().clone());
    let feeds = Feeds::with_parts(
        &FeedsConfig::memory(),
        Arc::new(MemoryStore::new()),
        &RootSeed::from_bytes([4u8; 32]),
        Arc::new(swarm.clone()),
    );

    feeds.feed("private", FeedOptions::private()).await?;
    let private_topic = feeds.drive("private").await?.discovery_key();
    assert!(observer.lookup(&private_topic).is_empty());

    feeds.feed("public", FeedOptions::default()).await?;
    let topic = feeds.drive("public").await?.discovery_key();
    assert_eq!(observer.lookup(&topic), vec![swarm.peer_id()]);

    feeds.destroy("public").await?;
    assert!(observer.lookup(&topic).is_empty());
    Ok(())
}

#[tokio::test]
async fn closed_manager_rejects_operations() -> Result<()> {
    let feeds = memory_feeds(&FeedsConfig::memory());
    let drive = feeds.drive("f").await?;
    feeds.close().await?;
    feeds.close().await?;

    assert!(drive.is_closed());
    let err = feeds.get("f", "k").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<FeedsError>(),
        Some(FeedsError::Closed(_))
    ));

    let err = feeds.drive("").await;
    assert!(err.is_err());
    Ok(())
}

#[tokio::test]
async fn empty_feed_id_is_a_configuration_error() -> Result<()> {
    let feeds = memory_feeds(&FeedsConfig::memory());
    let err = feeds.feed("", FeedOptions::default()).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<FeedsError>(),
        Some(FeedsError::Configuration(_))
    ));
    assert!(feeds.registry().is_empty());
    Ok(())
}

#[tokio::test]
async fn shard_layout_is_two_level() -> Result<()> {
    let feeds = memory_feeds(&FeedsConfig::memory());
    let drive = feeds.drive("f").await?;
    let dk = drive.discovery_key();
    let hex = dk.to_hex();
    assert_eq!(
        core_dir(&dk),
        format!("cores/{}/{}/{}", &hex[..2], &hex[2..4], hex)
    );
    Ok(())
}

fn db_length_path(corestore: &Corestore, feed_id: &str) -> String {
    let keys = DerivedKeyMaterial::derive_in(corestore.namespace_seed(), feed_id);
    let db_key = corestore
        .with_namespace(keys.namespace)
        .core_keys(DB_CORE)
        .public_key;
    format!("{}/length", core_dir(&discovery_key(&db_key)))
}

#[tokio::test]
async fn failed_open_leaves_nothing_registered() -> Result<()> {
    let dir = tempdir()?;
    let store: Arc<dyn Store> = Arc::new(LocalStore::new(dir.path()));
    let feeds = Feeds::with_parts(
        &FeedsConfig::memory().with_header(json!({"name": "prices"})),
        store.clone(),
        &RootSeed::from_bytes([6u8; 32]),
        Arc::new(MemorySwarm::new()),
    );

    let length_path = db_length_path(feeds.corestore(), "prices");
    store
        .put_bytes(&length_path, Bytes::from_static(b"garbage"))
        .await?;

    let err = feeds.feed("prices", FeedOptions::default()).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<FeedsError>(),
        Some(FeedsError::Corrupt(_))
    ));
    assert!(feeds.registry().is_empty());
    assert!(feeds.corestore().is_empty());

    store.delete(&length_path).await?;
    let keys = feeds.feed("prices", FeedOptions::default()).await?;
    assert_eq!(feeds.registry().len(), 1);
    let reader = feeds.reader(&keys.url("/")).await?;
    assert_eq!(reader.config().await?, Some(json!({"name": "prices"})));
    Ok(())
}

/// Swarm whose next `failures` joins fail, and whose close fails if
/// `close_fails` is set.
#[derive(Debug)]
struct UnreachableSwarm {
    inner: MemorySwarm,
    failures: AtomicUsize,
    close_fails: bool,
}

#[async_trait]
impl Swarm for UnreachableSwarm {
    async fn join(&self, topic: DiscoveryKey, options: JoinOptions) -> Result<()> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            anyhow::bail!("no bootstrap node reachable");
        }
        self.inner.join(topic, options).await
    }

    async fn flush(&self, topic: &DiscoveryKey) -> Result<()> {
        self.inner.flush(topic).await
    }

    async fn leave(&self, topic: &DiscoveryKey) -> Result<()> {
        self.inner.leave(topic).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await?;
        if self.close_fails {
            anyhow::bail!("connection reset while leaving topics");
        }
        Ok(())
    }
}

#[tokio::test]
async fn announce_failure_reaches_the_caller() -> Result<()> {
    let swarm = MemorySwarm::new();
    let observer = MemorySwarm::with_dht(swarm.dht().clone());
    let feeds = Feeds::with_parts(
        &FeedsConfig::memory(),
        Arc::new(MemoryStore::new()),
        &RootSeed::from_bytes([7u8; 32]),
        Arc::new(UnreachableSwarm {
            inner: swarm.clone(),
            failures: AtomicUsize::new(1),
            close_fails: false,
        }),
    );

    let err = feeds.feed("prices", FeedOptions::default()).await.unwrap_err();
    assert!(err.to_string().contains("no bootstrap node reachable"));
    let topic = feeds.drive("prices").await?.discovery_key();
    assert!(observer.lookup(&topic).is_empty());

    let keys = feeds.feed("prices", FeedOptions::default()).await?;
    assert_eq!(keys.key, feeds.drive("prices").await?.key());
    assert_eq!(observer.lookup(&topic), vec![swarm.peer_id()]);
    assert_eq!(feeds.registry().len(), 1);
    Ok(())
}

#[tokio::test]
async fn close_tears_everything_down_despite_errors() -> Result<()> {
    let feeds = Feeds::with_parts(
        &FeedsConfig::memory(),
        Arc::new(MemoryStore::new()),
        &RootSeed::from_bytes([8u8; 32]),
        Arc::new(UnreachableSwarm {
            inner: MemorySwarm::new(),
            failures: AtomicUsize::new(0),
            close_fails: true,
        }),
    );
    let a = feeds.drive("a").await?;
    let b = feeds.drive("b").await?;

    let err = feeds.close().await.unwrap_err();
    assert!(err.to_string().contains("connection reset"));
    assert!(a.is_closed() && b.is_closed());
    assert!(feeds.corestore().is_empty());
    assert!(feeds.registry().is_empty());
    Ok(())
}

#[tokio::test]
async fn metadata_names_must_map_back() -> Result<()> {
    let feeds = memory_feeds(&FeedsConfig::memory());
    for name in ["", "nested/name"] {
        let err = feeds.set_metadata("f", name, json!(1)).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FeedsError>(),
            Some(FeedsError::Configuration(_))
        ));
    }
    assert!(feeds.registry().is_empty());

    let err = Feeds::init(FeedsConfig::memory().with_metadata("a/b", json!(1)))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<FeedsError>(),
        Some(FeedsError::Configuration(_))
    ));
    Ok(())
}
