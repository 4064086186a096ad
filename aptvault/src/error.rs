//! Error handling.

use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;

use displaydoc::Display;

use crate::blob::BlobId;

pub type VaultResult<T> = Result<T, VaultError>;

/// An error.
#[derive(Debug, Display)]
pub enum VaultError {
    /// Blob {id} does not exist in the store.
    NoSuchBlob { id: BlobId },

    /// Reference "{name}" does not exist.
    NoSuchRef { name: String },

    /// Distribution "{name}" does not exist.
    NoSuchDist { name: String },

    /// The index {index} of release {release} is no longer available, its history has been trimmed.
    IndexUnavailable { release: BlobId, index: BlobId },

    /// Invalid blob ID "{id}": {reason}
    InvalidBlobId { id: String, reason: &'static str },

    /// Invalid reference name "{name}": {reason}
    InvalidRefName { name: String, reason: &'static str },

    /// Invalid distribution name "{name}"
    InvalidDistName { name: String },

    /// Invalid version "{version}": {reason}
    InvalidVersion {
        version: String,
        reason: &'static str,
    },

    /// Invalid prune rule "{rule}": {reason}
    InvalidPruneRule { rule: String, reason: String },

    /// Invalid pool pattern "{pattern}": {error}
    InvalidPoolPattern {
        pattern: String,
        error: regex::Error,
    },

    /// Release {id} is corrupt: {reason}
    CorruptRelease { id: BlobId, reason: String },

    /// Release index {id} is corrupt: {reason}
    CorruptIndex { id: BlobId, reason: String },

    /// Blob written to {path:?} conflicts with existing content.
    LinkConflict { path: PathBuf },

    /// Attempted to write to a blob writer that has already been closed.
    WriteAfterClose,

    /// Attempted to query the identity of a blob before it was closed.
    IdentityBeforeClose,

    /// The garbage collector lock count went negative.
    GcLockUnderflow,

    /// The garbage collector is not running.
    GcUnavailable,

    /// Signing failed: {error}
    SigningError {
        error: Box<dyn StdError + Send + Sync>,
    },

    /// Serialization error: {error}
    SerializationError { error: serde_json::Error },

    /// I/O error: {error}.
    IoError { error: io::Error },
}

impl VaultError {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NoSuchBlob { .. } => "NoSuchBlob",
            Self::NoSuchRef { .. } => "NoSuchRef",
            Self::NoSuchDist { .. } => "NoSuchDist",
            Self::IndexUnavailable { .. } => "IndexUnavailable",
            Self::InvalidBlobId { .. } => "InvalidBlobId",
            Self::InvalidRefName { .. } => "InvalidRefName",
            Self::InvalidDistName { .. } => "InvalidDistName",
            Self::InvalidVersion { .. } => "InvalidVersion",
            Self::InvalidPruneRule { .. } => "InvalidPruneRule",
            Self::InvalidPoolPattern { .. } => "InvalidPoolPattern",
            Self::CorruptRelease { .. } => "CorruptRelease",
            Self::CorruptIndex { .. } => "CorruptIndex",
            Self::LinkConflict { .. } => "LinkConflict",
            Self::WriteAfterClose => "WriteAfterClose",
            Self::IdentityBeforeClose => "IdentityBeforeClose",
            Self::GcLockUnderflow => "GcLockUnderflow",
            Self::GcUnavailable => "GcUnavailable",
            Self::SigningError { .. } => "SigningError",
            Self::SerializationError { .. } => "SerializationError",
            Self::IoError { .. } => "IoError",
        }
    }

    /// Returns whether the error means that something does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NoSuchBlob { .. } | Self::NoSuchRef { .. } | Self::NoSuchDist { .. }
        )
    }
}

impl StdError for VaultError {}

impl From<io::Error> for VaultError {
    fn from(error: io::Error) -> Self {
        Self::IoError { error }
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(error: serde_json::Error) -> Self {
        Self::SerializationError { error }
    }
}
