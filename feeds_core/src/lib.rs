//! Core types and traits shared by the feeds crates.
//!
//! ## Derivation and layout (stable)
//!
//! The following modules define values that must stay bit-identical across
//! versions, because remote readers reconstruct access from them:
//!
//! - Key derivation (`keys::DerivedKeyMaterial`, `keys::discovery_key`)
//! - The per-feed path layout and on-disk core sharding (`paths`)
//! - Value encoding (`codec::FeedValue`)
//!
//! ## Abstractions
//!
//! - Storage (`Store`, `StoreFeatures`); implementations live in
//!   `feeds_store_local` and `feeds_store_memory`
//! - Network announce (`Swarm`, `JoinOptions`); an in-process
//!   implementation lives in `feeds_node`
//! - The error taxonomy shared by all crates (`FeedsError`)

pub mod codec;
pub mod error;
pub mod keys;
pub mod paths;
pub mod store;
pub mod swarm;

// Test utilities (behind feature flag)
#[cfg(feature = "testutil")]
pub mod testutil;

pub use codec::FeedValue;
pub use error::FeedsError;
pub use keys::{DerivedKeyMaterial, DiscoveryKey, EncryptionKey, NamespaceSeed, PublicKey, RootSeed};
pub use store::{Store, StoreError, StoreFeatures, StoreResult};
pub use swarm::{JoinOptions, Swarm};
