//! Block encryption for cores (XChaCha20-Poly1305, random nonce).

use anyhow::anyhow;
use chacha20poly1305::{
    XChaCha20Poly1305,
    aead::{Aead, KeyInit},
};
use feeds_core::{EncryptionKey, FeedsError, PublicKey};
use rand::RngCore;

const BLOCK_KEY_CONTEXT: &str = "feeds/core/block";
pub(crate) const NONCE_LEN: usize = 24;

/// Per-core key, so two cores of one drive never share a key.
pub(crate) fn block_key(encryption_key: &EncryptionKey, core_key: &PublicKey) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(BLOCK_KEY_CONTEXT);
    hasher.update(encryption_key.as_bytes());
    hasher.update(core_key.as_bytes());
    *hasher.finalize().as_bytes()
}

pub(crate) struct BlockCipher {
    cipher: XChaCha20Poly1305,
}

impl BlockCipher {
    pub(crate) fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(&key.into()),
        }
    }

    /// Returns `nonce (24 bytes) || ciphertext`.
    pub(crate) fn seal(&self, plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(&nonce.into(), plaintext)
            .map_err(|_| anyhow!("block encryption failed"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub(crate) fn open(&self, data: &[u8]) -> anyhow::Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(FeedsError::Corrupt(format!(
                "block shorter than its {NONCE_LEN} byte nonce"
            ))
            .into());
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let nonce: [u8; NONCE_LEN] = nonce
            .try_into()
            .map_err(|_| FeedsError::Corrupt("bad nonce".into()))?;
        self.cipher
            .decrypt(&nonce.into(), ciphertext)
            .map_err(|_| FeedsError::Corrupt("decryption failed: wrong key or tampered block".into()).into())
    }
}
