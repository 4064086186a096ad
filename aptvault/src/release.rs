//! Releases.
//!
//! A release is one published state of a distribution. Releases are
//! stored as blobs and link to their predecessor through `parent_id`,
//! forming a history that ends at the empty blob ID.

use std::fmt;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::blob::BlobId;
use crate::error::{VaultError, VaultResult};
use crate::version::DebianVersion;

/// The kind of a change recorded in a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    /// An entry was added.
    Add,

    /// An entry was explicitly deleted.
    Delete,

    /// An existing entry was removed by a prune rule.
    Prune,

    /// A new entry was skipped because it was already present.
    SkipPresent,

    /// A new entry was skipped because a prune rule rejected it.
    SkipPrune,

    /// The preserved history was shortened.
    Trim,
}

/// A change recorded in a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    pub description: String,
}

/// Package lists of one architecture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchitectureFiles {
    pub name: String,
    pub packages: BlobId,
    pub packages_gz: BlobId,
}

/// Package lists of one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub architectures: Vec<ArchitectureFiles>,
}

/// A release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    /// The previous release, or the empty ID for a root.
    pub parent_id: BlobId,

    /// The package index.
    pub index_id: BlobId,

    pub code_name: String,
    pub suite: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub version: String,

    pub date: DateTime<Utc>,

    /// Generated package lists.
    #[serde(default)]
    pub components: Vec<Component>,

    /// The unsigned `Release` file.
    #[serde(default)]
    pub release_file: Option<BlobId>,

    /// The clear-signed `InRelease` file.
    #[serde(default)]
    pub in_release: Option<BlobId>,

    /// The detached `Release.gpg` signature.
    #[serde(default)]
    pub release_gpg: Option<BlobId>,

    /// Number of ancestors whose content is preserved.
    ///
    /// Ancestors further back keep their release record but their index
    /// and artifacts may be garbage collected.
    #[serde(default)]
    pub trim_after: Option<u32>,

    /// Changes relative to the parent.
    #[serde(default)]
    pub actions: Vec<Action>,

    /// Regex selecting the pool subdirectory from a package name.
    #[serde(default)]
    pub pool_pattern: String,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Delete => "DELETE",
            Self::Prune => "PRUNE",
            Self::SkipPresent => "SKIP_PRESENT",
            Self::SkipPrune => "SKIP_PRUNE",
            Self::Trim => "TRIM",
        }
    }

    /// Returns whether the action changes the index.
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Add | Self::Delete | Self::Prune)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Action {
    pub fn new(kind: ActionKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.description)
    }
}

impl Release {
    /// Creates the seed of a new distribution.
    ///
    /// The seed has no parent and an empty index.
    pub fn seed(code_name: &str, suite: &str, pool_pattern: &str) -> Self {
        Self {
            parent_id: BlobId::empty(),
            index_id: BlobId::empty(),
            code_name: code_name.to_owned(),
            suite: suite.to_owned(),
            description: String::new(),
            version: String::new(),
            date: Utc::now(),
            components: Vec::new(),
            release_file: None,
            in_release: None,
            release_gpg: None,
            trim_after: None,
            actions: Vec::new(),
            pool_pattern: pool_pattern.to_owned(),
        }
    }

    /// Creates a successor of this release.
    ///
    /// Identity fields are inherited. Generated artifacts are not, they
    /// must be regenerated for the new index.
    pub fn child(&self, self_id: BlobId, index_id: BlobId, actions: Vec<Action>) -> Self {
        Self {
            parent_id: self_id,
            index_id,
            code_name: self.code_name.clone(),
            suite: self.suite.clone(),
            description: self.description.clone(),
            version: self.version.clone(),
            date: Utc::now(),
            components: Vec::new(),
            release_file: None,
            in_release: None,
            release_gpg: None,
            trim_after: None,
            actions,
            pool_pattern: self.pool_pattern.clone(),
        }
    }

    /// Returns whether this release has no parent.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_empty()
    }

    /// Returns whether this release only records a history trim.
    pub fn is_trim_record(&self) -> bool {
        !self.actions.is_empty() && self.actions.iter().all(|a| a.kind == ActionKind::Trim)
    }

    /// Returns the IDs of all generated artifacts.
    pub fn artifact_ids(&self) -> Vec<BlobId> {
        let mut ids: Vec<BlobId> = [self.release_file, self.in_release, self.release_gpg]
            .into_iter()
            .flatten()
            .collect();

        for component in &self.components {
            for arch in &component.architectures {
                ids.push(arch.packages);
                ids.push(arch.packages_gz);
            }
        }

        ids
    }

    /// Returns the pool layout of this release.
    pub fn pool_layout(&self) -> VaultResult<PoolLayout> {
        let pattern = if self.pool_pattern.is_empty() {
            None
        } else {
            Some(compile_pool_pattern(&self.pool_pattern)?)
        };

        Ok(PoolLayout {
            code_name: self.code_name.clone(),
            pattern,
        })
    }

    pub(crate) fn to_bytes(&self) -> VaultResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub(crate) fn from_bytes(id: &BlobId, bytes: &[u8]) -> VaultResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| VaultError::CorruptRelease {
            id: *id,
            reason: e.to_string(),
        })
    }
}

/// Places packages in the pool of a release.
#[derive(Debug, Clone)]
pub struct PoolLayout {
    code_name: String,
    pattern: Option<Regex>,
}

impl PoolLayout {
    /// Returns the pool directory of a package, relative to the public
    /// root and ending in a slash.
    ///
    /// For example, with the pool pattern `lib[a-z]|[a-z]` the package
    /// `libfoo` version `1.0-1` in `stable` is placed under
    /// `pool/stable/libf/libfoo/1.0-1/`.
    pub fn dir(&self, name: &str, version: &DebianVersion) -> String {
        let mut path = format!("pool/{}/", self.code_name);

        if let Some(prefix) = self.pattern.as_ref().and_then(|p| p.find(name)) {
            if !prefix.as_str().is_empty() {
                path.push_str(prefix.as_str());
                path.push('/');
            }
        }

        path.push_str(&format!("{}/{}/", name, version));
        path
    }
}

/// Compiles a pool pattern, anchored to the start of package names.
pub fn compile_pool_pattern(pattern: &str) -> VaultResult<Regex> {
    Regex::new(&format!("^({})", pattern)).map_err(|error| VaultError::InvalidPoolPattern {
        pattern: pattern.to_owned(),
        error,
    })
}
