use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use dashmap::DashMap;
use feeds_core::{DiscoveryKey, FeedsError, JoinOptions, Swarm};

static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

/// Announce table shared by every [`MemorySwarm`] attached to it.
pub type MemoryDht = Arc<DashMap<DiscoveryKey, BTreeSet<u64>>>;

/// In-process swarm. Announces become visible in the shared table on
/// `flush`, the way a DHT announce becomes visible once acknowledged.
#[derive(Debug, Clone)]
pub struct MemorySwarm {
    peer_id: u64,
    dht: MemoryDht,
    topics: Arc<std::sync::Mutex<HashMap<DiscoveryKey, JoinOptions>>>,
    closed: Arc<AtomicBool>,
}

impl Default for MemorySwarm {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySwarm {
    /// A swarm with a table of its own.
    pub fn new() -> Self {
        Self::with_dht(MemoryDht::default())
    }

    /// A new peer on an existing table.
    pub fn with_dht(dht: MemoryDht) -> Self {
        Self {
            peer_id: NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed),
            dht,
            topics: Default::default(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn dht(&self) -> &MemoryDht {
        &self.dht
    }

    pub fn peer_id(&self) -> u64 {
        self.peer_id
    }

    /// Peers with an acknowledged server announce for `topic`.
    pub fn lookup(&self, topic: &DiscoveryKey) -> Vec<u64> {
        self.dht
            .get(topic)
            .map(|peers| peers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Topics this peer has joined.
    pub fn topics(&self) -> Vec<DiscoveryKey> {
        self.lock_topics().keys().copied().collect()
    }

    fn lock_topics(&self) -> std::sync::MutexGuard<'_, HashMap<DiscoveryKey, JoinOptions>> {
        match self.topics.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn check_open(&self) -> anyhow::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FeedsError::Closed("swarm").into());
        }
        Ok(())
    }

    fn unannounce(&self, topic: &DiscoveryKey) {
        self.dht.remove_if_mut(topic, |_, peers| {
            peers.remove(&self.peer_id);
            peers.is_empty()
        });
    }
}

#[async_trait]
impl Swarm for MemorySwarm {
    async fn join(&self, topic: DiscoveryKey, options: JoinOptions) -> anyhow::Result<()> {
        self.check_open()?;
        self.lock_topics().insert(topic, options);
        if !options.server {
            self.unannounce(&topic);
        }
        tracing::debug!(topic = %topic.fmt_short(), ?options, "joined topic");
        Ok(())
    }

    async fn flush(&self, topic: &DiscoveryKey) -> anyhow::Result<()> {
        self.check_open()?;
        let serving = self
            .lock_topics()
            .get(topic)
            .is_some_and(|options| options.server);
        if serving {
            self.dht.entry(*topic).or_default().insert(self.peer_id);
        }
        Ok(())
    }

    async fn leave(&self, topic: &DiscoveryKey) -> anyhow::Result<()> {
        self.lock_topics().remove(topic);
        self.unannounce(topic);
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let topics: Vec<DiscoveryKey> = self.lock_topics().drain().map(|(topic, _)| topic).collect();
        for topic in &topics {
            self.unannounce(topic);
        }
        tracing::debug!(topics = topics.len(), "swarm closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(n: u8) -> DiscoveryKey {
        DiscoveryKey::from_bytes([n; 32])
    }

    #[tokio::test]
    async fn announce_is_visible_after_flush() {
        let a = MemorySwarm::new();
        let b = MemorySwarm::with_dht(a.dht().clone());

        a.join(topic(1), JoinOptions::default()).await.unwrap();
        assert!(b.lookup(&topic(1)).is_empty());
        a.flush(&topic(1)).await.unwrap();
        assert_eq!(b.lookup(&topic(1)), vec![a.peer_id()]);

        a.leave(&topic(1)).await.unwrap();
        assert!(b.lookup(&topic(1)).is_empty());
    }

    #[tokio::test]
    async fn client_only_does_not_announce() {
        let swarm = MemorySwarm::new();
        let options = JoinOptions {
            server: false,
            client: true,
        };
        swarm.join(topic(2), options).await.unwrap();
        swarm.flush(&topic(2)).await.unwrap();
        assert!(swarm.lookup(&topic(2)).is_empty());
    }

    #[tokio::test]
    async fn closed_swarm_rejects_joins() {
        let swarm = MemorySwarm::new();
        swarm.join(topic(3), JoinOptions::default()).await.unwrap();
        swarm.flush(&topic(3)).await.unwrap();
        swarm.close().await.unwrap();
        assert!(swarm.lookup(&topic(3)).is_empty());
        assert!(swarm.topics().is_empty());
        assert!(swarm.join(topic(3), JoinOptions::default()).await.is_err());
    }
}
