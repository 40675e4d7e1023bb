//! Signed, encrypted append-only log.
//!
//! On-disk layout below the core's shard directory (see
//! [`feeds_core::paths::core_dir`]):
//!
//! ```text
//! key                 32 byte public key (written by the owner)
//! length              u64 big-endian block count; the commit point
//! blocks/<index>      signature (64) || nonce (24) || ciphertext
//! ```
//!
//! Blocks are written before `length`, so an append of several blocks becomes
//! visible all at once or not at all.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use anyhow::{Context, anyhow};
use bytes::Bytes;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use feeds_core::{
    DiscoveryKey, EncryptionKey, FeedsError, PublicKey, Store,
    keys::discovery_key,
    paths::core_dir,
    store::is_not_found,
};

use crate::crypto::{BlockCipher, block_key};

const SIGNATURE_LEN: usize = 64;
const LENGTH_FILE: &str = "length";
const KEY_FILE: &str = "key";

static NEXT_CORE_ID: AtomicU64 = AtomicU64::new(1);

type CloseCallback = Box<dyn FnOnce() + Send + 'static>;

/// Keypair of a core. Without the signing half the core is read-only.
#[derive(Clone)]
pub struct CoreKeys {
    pub public_key: PublicKey,
    signing_key: Option<SigningKey>,
}

impl CoreKeys {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        Self {
            public_key: PublicKey::from_bytes(signing_key.verifying_key().to_bytes()),
            signing_key: Some(signing_key),
        }
    }

    pub fn read_only(public_key: PublicKey) -> Self {
        Self {
            public_key,
            signing_key: None,
        }
    }

    pub fn is_writable(&self) -> bool {
        self.signing_key.is_some()
    }
}

impl std::fmt::Debug for CoreKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreKeys")
            .field("public_key", &self.public_key)
            .field("writable", &self.is_writable())
            .finish()
    }
}

/// Handle to one append-only log. Clones share state.
#[derive(Clone)]
pub struct Core {
    inner: Arc<CoreInner>,
}

struct CoreInner {
    id: u64,
    key: PublicKey,
    discovery_key: DiscoveryKey,
    dir: String,
    signing_key: Option<SigningKey>,
    verifying_key: VerifyingKey,
    cipher: BlockCipher,
    store: Arc<dyn Store>,
    /// `None` until loaded from the store. The lock also serializes appends.
    length: tokio::sync::Mutex<Option<u64>>,
    closed: AtomicBool,
    on_close: Mutex<Vec<CloseCallback>>,
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("key", &self.inner.key)
            .field("writable", &self.is_writable())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Core {
    pub fn new(
        store: Arc<dyn Store>,
        keys: CoreKeys,
        encryption_key: &EncryptionKey,
    ) -> anyhow::Result<Self> {
        let verifying_key = VerifyingKey::from_bytes(keys.public_key.as_bytes())
            .map_err(|e| FeedsError::InvalidKey(format!("core key: {e}")))?;
        let discovery_key = discovery_key(&keys.public_key);

        Ok(Self {
            inner: Arc::new(CoreInner {
                id: NEXT_CORE_ID.fetch_add(1, Ordering::Relaxed),
                key: keys.public_key,
                discovery_key,
                dir: core_dir(&discovery_key),
                signing_key: keys.signing_key,
                verifying_key,
                cipher: BlockCipher::new(block_key(encryption_key, &keys.public_key)),
                store,
                length: tokio::sync::Mutex::new(None),
                closed: AtomicBool::new(false),
                on_close: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Process-unique id of this handle.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn key(&self) -> PublicKey {
        self.inner.key
    }

    pub fn discovery_key(&self) -> DiscoveryKey {
        self.inner.discovery_key
    }

    /// Shard directory of this core inside its store.
    pub fn dir(&self) -> &str {
        &self.inner.dir
    }

    pub fn is_writable(&self) -> bool {
        self.inner.signing_key.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn path(&self, name: &str) -> String {
        format!("{}/{}", self.inner.dir, name)
    }

    fn block_path(&self, index: u64) -> String {
        format!("{}/blocks/{:016x}", self.inner.dir, index)
    }

    fn check_open(&self) -> anyhow::Result<()> {
        if self.is_closed() {
            return Err(FeedsError::Closed("core").into());
        }
        Ok(())
    }

    async fn read_length(&self) -> anyhow::Result<u64> {
        match self
            .inner
            .store
            .open_read_bytes(&self.path(LENGTH_FILE), 0, None)
            .await
        {
            Ok(bytes) => {
                let arr: [u8; 8] = bytes.as_ref().try_into().map_err(|_| {
                    FeedsError::Corrupt(format!("length file of core {}", self.inner.key))
                })?;
                Ok(u64::from_be_bytes(arr))
            }
            Err(e) if is_not_found(&e) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Loads the persisted length. Idempotent.
    pub async fn ready(&self) -> anyhow::Result<()> {
        self.check_open()?;
        let mut length = self.inner.length.lock().await;
        if length.is_none() {
            let loaded = self.read_length().await?;
            if self.is_writable() && loaded == 0 {
                self.inner
                    .store
                    .put_bytes(
                        &self.path(KEY_FILE),
                        Bytes::copy_from_slice(self.inner.key.as_bytes()),
                    )
                    .await?;
            }
            tracing::debug!(core = %self.inner.key.fmt_short(), length = loaded, "core ready");
            *length = Some(loaded);
        }
        Ok(())
    }

    /// Number of committed blocks.
    pub async fn len(&self) -> anyhow::Result<u64> {
        self.ready().await?;
        Ok(self.inner.length.lock().await.unwrap_or(0))
    }

    /// Re-reads the committed length written by another handle on the same
    /// store. Writable cores are authoritative and never shrink.
    pub async fn refresh(&self) -> anyhow::Result<u64> {
        self.ready().await?;
        let mut length = self.inner.length.lock().await;
        let current = length.unwrap_or(0);
        if self.is_writable() {
            return Ok(current);
        }
        let latest = self.read_length().await?.max(current);
        *length = Some(latest);
        Ok(latest)
    }

    /// Appends `blocks` atomically and returns the index of the first one.
    pub async fn append(&self, blocks: &[Bytes]) -> anyhow::Result<u64> {
        self.ready().await?;
        let signing_key = self
            .inner
            .signing_key
            .as_ref()
            .ok_or_else(|| FeedsError::ReadOnly(format!("core {}", self.inner.key)))?;

        let mut length = self.inner.length.lock().await;
        // Closing takes the same lock; re-check after acquiring it.
        self.check_open()?;
        let start = length.unwrap_or(0);

        for (offset, block) in blocks.iter().enumerate() {
            let index = start + offset as u64;
            let ciphertext = self.inner.cipher.seal(block)?;
            let signature = signing_key.sign(&signable(index, &ciphertext));

            let mut record = Vec::with_capacity(SIGNATURE_LEN + ciphertext.len());
            record.extend_from_slice(&signature.to_bytes());
            record.extend_from_slice(&ciphertext);
            self.inner
                .store
                .put_bytes(&self.block_path(index), Bytes::from(record))
                .await?;
        }

        let new_length = start + blocks.len() as u64;
        self.inner
            .store
            .put_bytes(
                &self.path(LENGTH_FILE),
                Bytes::copy_from_slice(&new_length.to_be_bytes()),
            )
            .await?;
        *length = Some(new_length);
        Ok(start)
    }

    /// Reads, verifies and decrypts the block at `index`.
    pub async fn get(&self, index: u64) -> anyhow::Result<Bytes> {
        let length = self.len().await?;
        if index >= length {
            return Err(anyhow!(
                "block {index} out of range for core {} of length {length}",
                self.inner.key.fmt_short()
            ));
        }

        let record = self
            .inner
            .store
            .open_read_bytes(&self.block_path(index), 0, None)
            .await
            .with_context(|| format!("reading block {index}"))?;
        if record.len() < SIGNATURE_LEN {
            return Err(FeedsError::Corrupt(format!("block {index} is truncated")).into());
        }
        let (signature, ciphertext) = record.split_at(SIGNATURE_LEN);
        let signature = Signature::from_slice(signature)
            .map_err(|e| FeedsError::Corrupt(format!("block {index} signature: {e}")))?;
        self.inner
            .verifying_key
            .verify(&signable(index, ciphertext), &signature)
            .map_err(|_| FeedsError::Corrupt(format!("block {index} has a bad signature")))?;

        Ok(Bytes::from(self.inner.cipher.open(ciphertext)?))
    }

    /// Registers `callback` to run once when the core closes. Runs it right
    /// away if the core is already closed.
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

    /// Closes the core after any in-flight append finishes. Idempotent.
    pub async fn close(&self) -> anyhow::Result<()> {
        let _length = self.inner.length.lock().await;
        let callbacks = {
            let mut callbacks = match self.inner.on_close.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if self.inner.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            std::mem::take(&mut *callbacks)
        };
        tracing::debug!(core = %self.inner.key.fmt_short(), "core closed");
        for callback in callbacks {
            callback();
        }
        Ok(())
    }
}

fn signable(index: u64, ciphertext: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(8 + ciphertext.len());
    message.extend_from_slice(&index.to_be_bytes());
    message.extend_from_slice(ciphertext);
    message
}
