//! Deterministic key derivation.
//!
//! Every per-feed secret is a pure function of the [`RootSeed`] and the feed
//! identifier, so nothing beyond the root seed is ever persisted:
//!
//! ```text
//! root_seed [32 bytes]
//!     |
//!     +-- blake3::derive_key("feeds/root", root_seed) -> root namespace
//!             |
//!             +-- blake3::keyed_hash(root namespace, feed_id) -> feed namespace
//!                     |
//!                     +-- blake3::derive_key("feeds/drive/xchacha20", ns) -> encryption key
//!                     +-- blake3::derive_key("feeds/core/ed25519", ns || core_name) -> core signing key
//!                                 |
//!                                 +-> public key
//!                                         |
//!                                         +-- blake3::derive_key("feeds/discovery", pk) -> discovery key
//! ```

use std::fmt;

use zeroize::Zeroize;

use crate::error::FeedsError;

const ROOT_NAMESPACE_CONTEXT: &str = "feeds/root";
const ENCRYPTION_KEY_CONTEXT: &str = "feeds/drive/xchacha20";
const CORE_SIGNING_CONTEXT: &str = "feeds/core/ed25519";
const DISCOVERY_CONTEXT: &str = "feeds/discovery";

/// Length of every key type in this module.
pub const KEY_LEN: usize = 32;

macro_rules! key_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
        pub struct $name([u8; KEY_LEN]);

        impl $name {
            pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parses a lowercase or uppercase hex string of exactly 32 bytes.
            pub fn from_hex(s: &str) -> Result<Self, FeedsError> {
                let bytes = hex::decode(s.trim())
                    .map_err(|e| FeedsError::InvalidKey(format!("{}: {e}", stringify!($name))))?;
                Self::try_from(bytes.as_slice())
            }

            /// First 5 bytes as hex, for log lines.
            pub fn fmt_short(&self) -> String {
                hex::encode(&self.0[..5])
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.to_hex()).finish()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; KEY_LEN]> for $name {
            fn from(value: [u8; KEY_LEN]) -> Self {
                Self(value)
            }
        }

        impl From<$name> for [u8; KEY_LEN] {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = FeedsError;

            fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
                let arr: [u8; KEY_LEN] = value.try_into().map_err(|_| {
                    FeedsError::InvalidKey(format!(
                        "{} must be {KEY_LEN} bytes, got {}",
                        stringify!($name),
                        value.len()
                    ))
                })?;
                Ok(Self(arr))
            }
        }
    };
}

key_type!(
    /// Ed25519 public key of a core; for a drive, the key of its db core.
    PublicKey
);
key_type!(
    /// XChaCha20-Poly1305 key shared by all cores of a drive.
    EncryptionKey
);
key_type!(
    /// Public lookup value derived from a [`PublicKey`]; safe to announce.
    DiscoveryKey
);
key_type!(
    /// Secret label scoping the cores of one namespace.
    NamespaceSeed
);

impl NamespaceSeed {
    /// The namespace every other namespace descends from.
    pub fn root(seed: &RootSeed) -> Self {
        Self(blake3::derive_key(ROOT_NAMESPACE_CONTEXT, seed.as_bytes()))
    }

    /// Child namespace for `name`. The label is used verbatim.
    pub fn child(&self, name: &[u8]) -> Self {
        Self(*blake3::keyed_hash(&self.0, name).as_bytes())
    }

    /// Seed of the Ed25519 keypair for the core called `core_name`.
    pub fn core_signing_seed(&self, core_name: &str) -> [u8; KEY_LEN] {
        let mut hasher = blake3::Hasher::new_derive_key(CORE_SIGNING_CONTEXT);
        hasher.update(&self.0);
        hasher.update(core_name.as_bytes());
        *hasher.finalize().as_bytes()
    }
}

impl EncryptionKey {
    /// One-way hash of the namespace bytes.
    pub fn derive(namespace: &NamespaceSeed) -> Self {
        Self(blake3::derive_key(ENCRYPTION_KEY_CONTEXT, namespace.as_bytes()))
    }
}

/// Derives the discovery key announced for a core.
pub fn discovery_key(public_key: &PublicKey) -> DiscoveryKey {
    DiscoveryKey(blake3::derive_key(DISCOVERY_CONTEXT, public_key.as_bytes()))
}

/// Process-wide root secret. Scrubbed on drop.
#[derive(Clone)]
pub struct RootSeed([u8; KEY_LEN]);

impl RootSeed {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Accepts either 32 raw bytes or their hex encoding.
    pub fn parse(bytes: &[u8]) -> Result<Self, FeedsError> {
        if let Ok(arr) = <[u8; KEY_LEN]>::try_from(bytes) {
            return Ok(Self(arr));
        }
        let text = std::str::from_utf8(bytes)
            .map_err(|_| FeedsError::InvalidKey("root seed is neither 32 bytes nor hex".into()))?;
        let decoded = hex::decode(text.trim())
            .map_err(|e| FeedsError::InvalidKey(format!("root seed: {e}")))?;
        let arr = <[u8; KEY_LEN]>::try_from(decoded.as_slice()).map_err(|_| {
            FeedsError::InvalidKey(format!("root seed must be {KEY_LEN} bytes"))
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for RootSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RootSeed(..)")
    }
}

impl Drop for RootSeed {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Namespace and encryption key of one feed.
///
/// Never persisted: re-derive it from the root seed whenever needed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DerivedKeyMaterial {
    pub namespace: NamespaceSeed,
    pub encryption_key: EncryptionKey,
}

impl DerivedKeyMaterial {
    pub fn derive(seed: &RootSeed, feed_id: &str) -> Self {
        Self::derive_in(&NamespaceSeed::root(seed), feed_id)
    }

    /// Same as [`DerivedKeyMaterial::derive`] for an already-derived parent.
    pub fn derive_in(parent: &NamespaceSeed, feed_id: &str) -> Self {
        let namespace = parent.child(feed_id.as_bytes());
        Self {
            namespace,
            encryption_key: EncryptionKey::derive(&namespace),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed() -> RootSeed {
        RootSeed::from_bytes([0xff; 32])
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = DerivedKeyMaterial::derive(&seed(), "234");
        let b = DerivedKeyMaterial::derive(&RootSeed::from_bytes([0xff; 32]), "234");
        assert_eq!(a, b);
        assert_eq!(
            a.namespace.core_signing_seed("db"),
            b.namespace.core_signing_seed("db")
        );
    }

    #[test]
    fn feed_ids_get_distinct_namespaces() {
        let a = DerivedKeyMaterial::derive(&seed(), "alice");
        let b = DerivedKeyMaterial::derive(&seed(), "bob");
        assert_ne!(a.namespace, b.namespace);
        assert_ne!(a.encryption_key, b.encryption_key);
    }

    #[test]
    fn root_seed_scopes_everything() {
        let a = DerivedKeyMaterial::derive(&seed(), "alice");
        let b = DerivedKeyMaterial::derive(&RootSeed::from_bytes([0x01; 32]), "alice");
        assert_ne!(a.namespace, b.namespace);
    }

    #[test]
    fn encryption_key_is_hash_of_namespace() {
        let material = DerivedKeyMaterial::derive(&seed(), "alice");
        let expected = blake3::derive_key(ENCRYPTION_KEY_CONTEXT, material.namespace.as_bytes());
        assert_eq!(material.encryption_key.as_bytes(), &expected);
    }

    #[test]
    fn core_names_are_separated() {
        let ns = DerivedKeyMaterial::derive(&seed(), "alice").namespace;
        assert_ne!(ns.core_signing_seed("db"), ns.core_signing_seed("blobs"));
    }

    #[test]
    fn hex_roundtrip_and_length_check() {
        let key = PublicKey::from_bytes([7u8; 32]);
        assert_eq!(PublicKey::from_hex(&key.to_hex()).unwrap(), key);
        assert!(matches!(
            PublicKey::from_hex("abcd"),
            Err(FeedsError::InvalidKey(_))
        ));
        assert_eq!(key.fmt_short().len(), 10);
    }

    #[test]
    fn root_seed_parses_raw_and_hex() {
        let raw = RootSeed::parse(&[0xffu8; 32]).unwrap();
        let hexed = RootSeed::parse("ff".repeat(32).as_bytes()).unwrap();
        assert_eq!(raw.as_bytes(), hexed.as_bytes());
        assert!(RootSeed::parse(b"not a seed").is_err());
    }

    #[test]
    fn discovery_key_differs_from_public_key() {
        let pk = PublicKey::from_bytes([9u8; 32]);
        assert_ne!(discovery_key(&pk).as_bytes(), pk.as_bytes());
        assert_eq!(discovery_key(&pk), discovery_key(&pk));
    }
}
