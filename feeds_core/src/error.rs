use thiserror::Error;

/// Errors surfaced by the feeds crates that callers may want to match on.
///
/// Operations return `anyhow::Result`; use `err.downcast_ref::<FeedsError>()`
/// to recover these.
#[derive(Debug, Clone, Error)]
pub enum FeedsError {
    /// A required construction field is missing or malformed.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// The manager, drive or core has been closed.
    #[error("{0} is closed")]
    Closed(&'static str),
    /// The handle is still opening.
    #[error("{0} is not ready")]
    NotReady(String),
    /// A write was attempted without the signing key.
    #[error("{0} is not writable")]
    ReadOnly(String),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// Persisted bytes failed verification or decoding.
    #[error("corrupt data: {0}")]
    Corrupt(String),
    /// One or more cores could not be removed during `destroy`.
    #[error("failed to clean up {failed} of {total} cores for feed {feed_id}")]
    PartialCleanup {
        feed_id: String,
        failed: usize,
        total: usize,
    },
}
