use bytes::Bytes;
use feeds_core::{RootSeed, Store, keys::KEY_LEN, paths::SEED_FILE, store::is_not_found};
use rand::RngCore;

use crate::config::IdentityConfig;

/// Resolves the root seed: the configured one, else the one persisted in
/// `store`, else a freshly generated one.
///
/// A generated seed is written to [`SEED_FILE`] only when `persist` is set and
/// the store is on disk; an existing file is never overwritten.
pub async fn load_or_create_seed(
    identity: &IdentityConfig,
    store: &dyn Store,
) -> anyhow::Result<RootSeed> {
    if let Some(seed) = &identity.seed {
        return Ok(RootSeed::parse(seed.as_bytes())?);
    }

    match store.open_read_bytes(SEED_FILE, 0, None).await {
        Ok(bytes) => {
            tracing::debug!("loaded root seed from {SEED_FILE}");
            return Ok(RootSeed::parse(&bytes)?);
        }
        Err(e) if is_not_found(&e) => {}
        Err(e) => return Err(e),
    }

    let seed = generate_seed();
    if identity.persist && store.features().on_disk {
        store
            .put_bytes(SEED_FILE, Bytes::from(hex::encode(seed.as_bytes())))
            .await?;
        tracing::info!("generated new root seed in {SEED_FILE}");
    } else {
        tracing::debug!("generated ephemeral root seed");
    }
    Ok(seed)
}

pub fn generate_seed() -> RootSeed {
    let mut bytes = [0u8; KEY_LEN];
    rand::rng().fill_bytes(&mut bytes);
    RootSeed::from_bytes(bytes)
}
