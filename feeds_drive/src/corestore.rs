use std::sync::{Arc, Weak};

use dashmap::DashMap;
use feeds_core::{EncryptionKey, NamespaceSeed, PublicKey, RootSeed, Store};

use crate::core::{Core, CoreKeys};

/// Factory for cores backed by one store.
///
/// Core keypairs are derived from the corestore's namespace and a core name,
/// so the same namespace and name always produce the same core. Namespaced
/// views share the store and the set of open cores with their parent.
#[derive(Clone)]
pub struct Corestore {
    store: Arc<dyn Store>,
    namespace: NamespaceSeed,
    cores: Arc<DashMap<u64, Core>>,
}

impl std::fmt::Debug for Corestore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Corestore")
            .field("store", &self.store)
            .field("open_cores", &self.cores.len())
            .finish()
    }
}

impl Corestore {
    pub fn new(store: Arc<dyn Store>, seed: &RootSeed) -> Self {
        Self {
            store,
            namespace: NamespaceSeed::root(seed),
            cores: Arc::new(DashMap::new()),
        }
    }

    /// View scoped to the child namespace `name`.
    pub fn namespace(&self, name: &str) -> Self {
        self.with_namespace(self.namespace.child(name.as_bytes()))
    }

    /// View scoped to an already derived namespace.
    pub fn with_namespace(&self, namespace: NamespaceSeed) -> Self {
        Self {
            store: self.store.clone(),
            namespace,
            cores: self.cores.clone(),
        }
    }

    pub fn namespace_seed(&self) -> &NamespaceSeed {
        &self.namespace
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Keypair of the writable core `name` in this namespace.
    pub fn core_keys(&self, name: &str) -> CoreKeys {
        CoreKeys::from_seed(self.namespace.core_signing_seed(name))
    }

    /// Opens the writable core `name` in this namespace.
    pub fn get(&self, name: &str, encryption_key: &EncryptionKey) -> anyhow::Result<Core> {
        self.open(self.core_keys(name), encryption_key)
    }

    /// Opens a read-only core by public key.
    pub fn get_by_key(
        &self,
        public_key: PublicKey,
        encryption_key: &EncryptionKey,
    ) -> anyhow::Result<Core> {
        self.open(CoreKeys::read_only(public_key), encryption_key)
    }

    fn open(&self, keys: CoreKeys, encryption_key: &EncryptionKey) -> anyhow::Result<Core> {
        let core = Core::new(self.store.clone(), keys, encryption_key)?;
        let id = core.id();
        self.cores.insert(id, core.clone());

        let cores: Weak<DashMap<u64, Core>> = Arc::downgrade(&self.cores);
        core.on_close(move || {
            if let Some(cores) = cores.upgrade() {
                cores.remove(&id);
            }
        });
        Ok(core)
    }

    /// Number of open cores across all views of this corestore.
    pub fn len(&self) -> usize {
        self.cores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cores.is_empty()
    }

    /// Closes every open core.
    pub async fn close(&self) -> anyhow::Result<()> {
        let open: Vec<Core> = self.cores.iter().map(|entry| entry.value().clone()).collect();
        tracing::debug!(cores = open.len(), "closing corestore");
        for core in open {
            core.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feeds_store_memory::MemoryStore;

    fn corestore() -> Corestore {
        Corestore::new(Arc::new(MemoryStore::new()), &RootSeed::from_bytes([9u8; 32]))
    }

    #[test]
    fn same_namespace_same_keys() {
        let a = corestore().namespace("feed").core_keys("db");
        let b = corestore().namespace("feed").core_keys("db");
        assert_eq!(a.public_key, b.public_key);

        let other = corestore().namespace("other").core_keys("db");
        assert_ne!(a.public_key, other.public_key);
    }

    #[tokio::test]
    async fn closed_cores_are_forgotten() {
        let store = corestore();
        let enc = EncryptionKey::from_bytes([1u8; 32]);
        let db = store.namespace("feed").get("db", &enc).unwrap();
        let _blobs = store.namespace("feed").get("blobs", &enc).unwrap();
        assert_eq!(store.len(), 2);

        db.close().await.unwrap();
        assert_eq!(store.len(), 1);

        store.close().await.unwrap();
        assert!(store.is_empty());
    }
}
