use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::keys::DiscoveryKey;

/// How a node takes part in a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinOptions {
    /// Announce this node as serving the topic.
    pub server: bool,
    /// Look up other peers serving the topic.
    pub client: bool,
}

impl Default for JoinOptions {
    /// Server-only: serve data, don't seek peers.
    fn default() -> Self {
        Self {
            server: true,
            client: false,
        }
    }
}

/// Peer discovery layer drives are announced on.
///
/// Implementations impose no timeout: `flush` may wait indefinitely when no
/// peers are reachable.
#[async_trait]
pub trait Swarm: std::fmt::Debug + Send + Sync + 'static {
    /// Joins `topic`. Joining a topic twice updates its options.
    async fn join(&self, topic: DiscoveryKey, options: JoinOptions) -> anyhow::Result<()>;

    /// Resolves once every pending announce for `topic` has been acknowledged.
    async fn flush(&self, topic: &DiscoveryKey) -> anyhow::Result<()>;

    async fn leave(&self, topic: &DiscoveryKey) -> anyhow::Result<()>;

    /// Leaves all topics and shuts the connection down.
    async fn close(&self) -> anyhow::Result<()>;
}
