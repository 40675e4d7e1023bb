use std::collections::BTreeMap;

use feeds_core::{
    FeedValue, FeedsError, JoinOptions,
    paths::{HEADER_PATH, is_metadata_name, metadata_path},
};
use feeds_store_local::LocalStoreConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Process-wide configuration of a [`crate::Feeds`] manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeedsConfig {
    pub storage: StorageConfig,
    pub identity: IdentityConfig,
    /// Written to `/slashfeed.json` of every feed.
    pub header: Option<Value>,
    /// Written to `/meta/<name>.json` of every feed.
    pub metadata: BTreeMap<String, Value>,
    /// How feeds are announced; server-only unless configured.
    pub announce: JoinOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum StorageConfig {
    Local(LocalStoreConfig),
    #[default]
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IdentityConfig {
    /// Root seed as hex. Loaded from or generated into the storage root when
    /// absent.
    pub seed: Option<String>,
    /// Write a generated seed to disk. Ignored for in-memory storage.
    pub persist: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            seed: None,
            persist: true,
        }
    }
}

impl FeedsConfig {
    /// Feeds stored below `base_path`.
    pub fn local(base_path: impl Into<String>) -> Self {
        Self {
            storage: StorageConfig::Local(LocalStoreConfig {
                base_path: base_path.into(),
            }),
            ..Default::default()
        }
    }

    /// Ephemeral feeds kept in memory.
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn with_seed(mut self, seed_hex: impl Into<String>) -> Self {
        self.identity.seed = Some(seed_hex.into());
        self
    }

    pub fn with_header(mut self, header: Value) -> Self {
        self.header = Some(header);
        self
    }

    pub fn with_metadata(mut self, name: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(name.into(), value);
        self
    }

    /// Rejects metadata names that cannot be stored as documents.
    pub fn validate(&self) -> Result<(), FeedsError> {
        match self.metadata.keys().find(|name| !is_metadata_name(name)) {
            Some(name) => Err(FeedsError::Configuration(format!(
                "metadata name '{name}' must be non-empty and contain no '/'"
            ))),
            None => Ok(()),
        }
    }

    /// Documents every feed is reconciled against, keyed by drive path.
    pub fn documents(&self) -> BTreeMap<String, FeedValue> {
        let mut documents: BTreeMap<String, FeedValue> = self
            .metadata
            .iter()
            .map(|(name, value)| (metadata_path(name), FeedValue::Json(value.clone())))
            .collect();
        if let Some(header) = &self.header {
            documents.insert(HEADER_PATH.to_owned(), FeedValue::Json(header.clone()));
        }
        documents
    }
}
