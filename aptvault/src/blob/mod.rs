//! Content-addressed blob storage.
//!
//! ## Layout
//!
//! Every blob is named by the hex encoding of the SHA-256 digest of its
//! content. Blobs are sharded into nested directories, one directory level
//! per hex character of a fixed-length prefix of the ID. With a prefix
//! depth of 3, the blob `e3b0c442...` is stored at:
//!
//! ```text
//! {base}/e/3/b/e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855
//! ```
//!
//! Named references live under `{base}/refs/` with a `.ref` suffix, and
//! every reference change is appended to `{base}/reflog` first.

mod refs;
mod store;
mod writer;


use std::fmt;
use std::str::FromStr;

use serde::{de, ser, Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{VaultError, VaultResult};

pub use refs::RefChange;
pub use store::{BlobStore, BlobStoreConfig, DEFAULT_PREFIX_DEPTH};
pub use writer::BlobWriter;

/// Length of a blob ID in bytes.
pub const BLOB_ID_LEN: usize = 32;

/// The identity of a blob.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobId([u8; BLOB_ID_LEN]);

impl BlobId {
    /// Returns the reserved ID of the zero-length blob.
    pub fn empty() -> Self {
        Self(Sha256::new().finalize().into())
    }

    /// Convenience function to compute the ID of a slice.
    pub fn from_content(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    pub(crate) fn from_digest(digest: Sha256) -> Self {
        Self(digest.finalize().into())
    }

    /// Parses a hexadecimal blob ID.
    pub fn from_hex(s: &str) -> VaultResult<Self> {
        if s.len() != BLOB_ID_LEN * 2 {
            return Err(VaultError::InvalidBlobId {
                id: s.to_owned(),
                reason: "Wrong length",
            });
        }

        let mut data = [0u8; BLOB_ID_LEN];
        hex::decode_to_slice(s, &mut data).map_err(|_| VaultError::InvalidBlobId {
            id: s.to_owned(),
            reason: "Not hexadecimal",
        })?;

        Ok(Self(data))
    }

    /// Returns whether this is the ID of the zero-length blob.
    ///
    /// The empty ID also terminates every release history.
    pub fn is_empty(&self) -> bool {
        *self == Self::empty()
    }

    /// Returns the ID in hexadecimal format.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({})", self.to_hex())
    }
}

impl FromStr for BlobId {
    type Err = VaultError;

    fn from_str(s: &str) -> VaultResult<Self> {
        Self::from_hex(s)
    }
}

impl<'de> Deserialize<'de> for BlobId {
    /// Deserializes a hexadecimal blob ID.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        use de::Error;

        String::deserialize(deserializer)
            .and_then(|s| Self::from_hex(&s).map_err(|e| Error::custom(e.to_string())))
    }
}

impl Serialize for BlobId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: ser::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}
