//! Path layout inside a feed's drive and of cores on disk.
//!
//! Inside a drive:
//!
//! ```text
//! /slashfeed.json        header document
//! /meta/<name>.json      one document per metadata key
//! /feed/<key>            caller data (unless the header maps the field elsewhere)
//! ```
//!
//! In a store, each core owns the shard directory
//! `cores/<hex[0..2]>/<hex[2..4]>/<hex>` of its discovery key.

use serde_json::Value;

use crate::keys::DiscoveryKey;

pub const HEADER_PATH: &str = "/slashfeed.json";
pub const METADATA_DIR: &str = "/meta/";
pub const METADATA_SUFFIX: &str = ".json";
pub const DATA_PREFIX: &str = "/feed/";
pub const DEFAULT_ICON_PATH: &str = "/icon";

/// Top-level directory holding all core shards in a store.
pub const CORES_DIR: &str = "cores";

/// File (relative to the storage root) the root seed is persisted to.
pub const SEED_FILE: &str = "primary-key";

/// Prefixes `path` with `/` unless it already has one.
pub fn normalize(path: &str) -> String {
    if path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/{path}")
    }
}

/// Whether `name` can be stored as a metadata document and mapped back by
/// [`metadata_name`].
pub fn is_metadata_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/')
}

/// Path of the metadata document `name`. Only names accepted by
/// [`is_metadata_name`] round-trip through [`metadata_name`].
pub fn metadata_path(name: &str) -> String {
    format!("{METADATA_DIR}{name}{METADATA_SUFFIX}")
}

/// Metadata name for a path under [`METADATA_DIR`], if it is one.
pub fn metadata_name(path: &str) -> Option<&str> {
    path.strip_prefix(METADATA_DIR)?
        .strip_suffix(METADATA_SUFFIX)
        .filter(|name| is_metadata_name(name))
}

pub fn data_path(key: &str) -> String {
    format!("{DATA_PREFIX}{}", key.trim_start_matches('/'))
}

/// Path for the field `name`.
///
/// A header of the form `{"fields": [{"name": .., "main": ..}]}` may route a
/// field to a custom path; everything else lands under [`DATA_PREFIX`].
pub fn field_path(header: Option<&Value>, name: &str) -> String {
    let name = name.trim_start_matches('/');
    let main = header
        .and_then(|h| h.get("fields"))
        .and_then(Value::as_array)
        .and_then(|fields| {
            fields
                .iter()
                .find(|field| field.get("name").and_then(Value::as_str) == Some(name))
        })
        .and_then(|field| field.get("main"))
        .and_then(Value::as_str);

    match main {
        Some(main) => normalize(main),
        None => data_path(name),
    }
}

/// Icon path for `size`, or for the first declared size when `size` is `None`.
pub fn icon_path(header: Option<&Value>, size: Option<&str>) -> Option<String> {
    let icons = header.and_then(|h| h.get("icons")).and_then(Value::as_object)?;
    let path = match size {
        Some(size) => icons.get(size),
        None => icons.values().next(),
    }?;
    path.as_str().map(normalize)
}

/// Shard directory of a core, bounded in fan-out by two hex prefixes.
pub fn core_dir(discovery_key: &DiscoveryKey) -> String {
    let hex = discovery_key.to_hex();
    format!("{CORES_DIR}/{}/{}/{}", &hex[0..2], &hex[2..4], hex)
}
