use bytes::Bytes;
use feeds_core::{
    FeedValue, FeedsError, PublicKey,
    paths::{DEFAULT_ICON_PATH, HEADER_PATH, field_path, icon_path, metadata_path},
};
use feeds_drive::{Corestore, Drive, DriveUpdate};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::url::FeedUrl;

/// Read-only view of someone's feed, opened from its URL.
#[derive(Debug, Clone)]
pub struct FeedReader {
    drive: Drive,
}

impl FeedReader {
    pub async fn open(corestore: &Corestore, url: &FeedUrl) -> anyhow::Result<Self> {
        let drive = Drive::open_read_only(corestore, url.key, url.encryption_key)?;
        drive.ready().await?;
        tracing::debug!(feed = %url.key.fmt_short(), "opened feed reader");
        Ok(Self { drive })
    }

    pub fn key(&self) -> PublicKey {
        self.drive.key()
    }

    /// The feed's header document, when it is JSON.
    pub async fn config(&self) -> anyhow::Result<Option<Value>> {
        Ok(self.get(HEADER_PATH).await?.and_then(|value| match value {
            FeedValue::Json(json) => Some(json),
            FeedValue::Bytes(_) => None,
        }))
    }

    pub async fn metadata(&self, name: &str) -> anyhow::Result<Option<FeedValue>> {
        self.get(&metadata_path(name)).await
    }

    /// Value at a raw drive path.
    pub async fn get(&self, path: &str) -> anyhow::Result<Option<FeedValue>> {
        Ok(self
            .drive
            .get(path)
            .await?
            .map(|bytes| FeedValue::decode(&bytes)))
    }

    /// Value of the field `name`, following the header's field mapping.
    pub async fn get_field(&self, name: &str) -> anyhow::Result<Option<FeedValue>> {
        let header = self.config().await?;
        self.get(&field_path(header.as_ref(), name)).await
    }

    /// Icon bytes for `size`, or the first declared icon.
    pub async fn icon(&self, size: Option<&str>) -> anyhow::Result<Option<Bytes>> {
        let header = self.config().await?;
        let path = icon_path(header.as_ref(), size).unwrap_or_else(|| DEFAULT_ICON_PATH.to_owned());
        self.drive.get(&path).await
    }

    /// Follows the field `name`. Changes arrive as [`FeedReader::update`]
    /// pulls them in.
    pub async fn subscribe(&self, name: &str) -> anyhow::Result<FieldSubscription> {
        let updates = self.drive.subscribe();
        let header = self.config().await?;
        Ok(FieldSubscription {
            drive: self.drive.clone(),
            path: field_path(header.as_ref(), name),
            updates,
        })
    }

    /// Picks up writes made since the last call. Returns the number of changed
    /// paths.
    pub async fn update(&self) -> anyhow::Result<usize> {
        self.drive.update().await
    }

    pub async fn close(&self) -> anyhow::Result<()> {
        self.drive.close().await
    }
}

/// Live view of one field of a feed, from [`FeedReader::subscribe`].
#[derive(Debug)]
pub struct FieldSubscription {
    drive: Drive,
    path: String,
    updates: broadcast::Receiver<DriveUpdate>,
}

impl FieldSubscription {
    /// Drive path the field maps to.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Waits for the next change of the field and returns its new value,
    /// `None` if it was deleted. After falling behind, returns the current
    /// value. Fails once the feed is closed.
    pub async fn recv(&mut self) -> anyhow::Result<Option<FeedValue>> {
        loop {
            let update = tokio::select! {
                update = self.updates.recv() => update,
                _ = self.drive.closed() => return Err(FeedsError::Closed("feed reader").into()),
            };
            match update {
                Ok(update) if update.path != self.path => continue,
                Ok(update) if update.deleted => return Ok(None),
                Ok(_) | Err(RecvError::Lagged(_)) => return self.current().await,
                Err(RecvError::Closed) => return Err(FeedsError::Closed("feed reader").into()),
            }
        }
    }

    async fn current(&self) -> anyhow::Result<Option<FeedValue>> {
        Ok(self
            .drive
            .get(&self.path)
            .await?
            .map(|bytes| FeedValue::decode(&bytes)))
    }
}
