use std::{fmt, str::FromStr};

use anyhow::{Context, bail};
use feeds_core::{EncryptionKey, PublicKey, paths::normalize};

const SCHEME: &str = "feed://";
const ENCRYPTION_KEY_PARAM: &str = "encryptionKey=";

/// Shareable address of a path in a feed:
/// `feed://<key-hex>/<path>#encryptionKey=<hex>`.
///
/// Key and encryption key are all a reader needs to open the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedUrl {
    pub key: PublicKey,
    pub encryption_key: EncryptionKey,
    /// Always starts with `/`.
    pub path: String,
}

impl FeedUrl {
    pub fn new(key: PublicKey, encryption_key: EncryptionKey, path: &str) -> Self {
        Self {
            key,
            encryption_key,
            path: normalize(path),
        }
    }

    /// Same feed, other path.
    pub fn with_path(&self, path: &str) -> Self {
        Self::new(self.key, self.encryption_key, path)
    }
}

impl fmt::Display for FeedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{SCHEME}{}{}#{ENCRYPTION_KEY_PARAM}{}",
            self.key, self.path, self.encryption_key
        )
    }
}

impl FromStr for FeedUrl {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(SCHEME)
            .with_context(|| format!("not a feed url: {s}"))?;
        let (location, fragment) = rest
            .split_once('#')
            .with_context(|| format!("feed url has no encryption key: {s}"))?;
        let (key, path) = match location.split_once('/') {
            Some((key, path)) => (key, path),
            None => (location, ""),
        };

        let Some(encryption_key) = fragment
            .split('&')
            .find_map(|param| param.strip_prefix(ENCRYPTION_KEY_PARAM))
        else {
            bail!("feed url has no encryption key: {s}");
        };

        Ok(Self::new(
            PublicKey::from_hex(key)?,
            EncryptionKey::from_hex(encryption_key)?,
            path,
        ))
    }
}
