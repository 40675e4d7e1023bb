//! # Feed drives
//!
//! Storage substrate for feeds: a [`Drive`] maps paths to byte values and is
//! built from two signed, encrypted, append-only [`Core`]s.
//!
//! ## Layers
//! 1. `crypto`    – per-core block keys and XChaCha20-Poly1305 sealing.
//! 2. `core`      – one append-only log, persisted in a [`feeds_core::Store`].
//! 3. `corestore` – derives core keypairs from a namespace and tracks open cores.
//! 4. `db`        – CBOR records of the db core.
//! 5. `drive`     – path index over the db core, values in the blobs core.

mod batch;
pub mod core;
pub mod corestore;
mod crypto;
pub mod db;
pub mod drive;

pub use batch::Batch;
pub use crate::core::{Core, CoreKeys};
pub use corestore::Corestore;
pub use drive::{BLOBS_CORE, DB_CORE, Drive, DriveStatus, DriveUpdate};
