//! Records appended to a drive's db core.
//!
//! Block 0 of every db core names the drive's blobs core. Every later block
//! is one atomic batch of path operations; replaying them in order rebuilds
//! the path index.

use std::convert::Infallible;

use minicbor::{CborLen, Decode, Encode};

/// Location of a value in the blobs core.
#[derive(Encode, Decode, CborLen, Clone, Copy, Debug, PartialEq, Eq)]
#[cbor(map)]
pub struct BlobRef {
    #[n(0)]
    pub index: u64,
    #[n(1)]
    pub length: u64,
}

#[derive(Encode, Decode, CborLen, Clone, Debug, PartialEq, Eq)]
#[cbor(map)]
pub struct DbOp {
    #[n(0)]
    pub path: String,
    /// `None` deletes the path.
    #[n(1)]
    pub blob: Option<BlobRef>,
}

#[derive(Encode, Decode, CborLen, Clone, Debug, Default, PartialEq, Eq)]
#[cbor(map)]
pub struct DbBlock {
    /// Set on the header block only.
    #[n(0)]
    #[cbor(with = "minicbor::bytes")]
    pub blobs_key: Option<[u8; 32]>,
    #[n(1)]
    pub ops: Vec<DbOp>,
}

impl DbBlock {
    pub fn header(blobs_key: [u8; 32]) -> Self {
        Self {
            blobs_key: Some(blobs_key),
            ops: Vec::new(),
        }
    }

    pub fn ops(ops: Vec<DbOp>) -> Self {
        Self {
            blobs_key: None,
            ops,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, minicbor::decode::Error> {
        minicbor::decode(bytes)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, minicbor::encode::Error<Infallible>> {
        minicbor::to_vec(self)
    }
}
