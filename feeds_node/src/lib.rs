//! # Feed directory multiplexer
//!
//! Manages many independent feeds on top of one store. Each feed id maps to
//! its own drive in a namespace derived from a single root seed, so access to
//! any feed can be regenerated from the seed alone.
//!
//! - [`Feeds`]: lifecycle manager (`feed`, `update`, `get`, `ensure_file`,
//!   `destroy`, `close`)
//! - [`DriveRegistry`]: single-flight get-or-create of drives per feed id
//! - [`reconcile`](reconcile::reconcile): diff-and-write of documents
//! - [`FeedReader`] / [`FeedUrl`]: read-only access from a shared url, with
//!   per-field subscriptions
//! - [`MemorySwarm`]: in-process announce table

use std::sync::Arc;

use feeds_core::Store;
use feeds_store_local::LocalStore;
use feeds_store_memory::MemoryStore;

use crate::config::StorageConfig;

pub mod config;
pub mod feeds;
pub mod identity;
pub mod reader;
pub mod reconcile;
pub mod registry;
pub mod swarm;
pub mod url;

pub use config::FeedsConfig;
pub use feeds::{CleanupReport, CoreCleanup, FeedKeys, FeedOptions, Feeds};
pub use reader::{FeedReader, FieldSubscription};
pub use reconcile::Reconciliation;
pub use registry::DriveRegistry;
pub use swarm::MemorySwarm;
pub use url::FeedUrl;

pub fn create_store(config: &StorageConfig) -> Arc<dyn Store> {
    match config {
        StorageConfig::Local(config) => Arc::new(LocalStore::create(config.clone())),
        StorageConfig::Memory => Arc::new(MemoryStore::new()),
    }
}
