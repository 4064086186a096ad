//! Release indices.
//!
//! An index is the sorted list of packages in one release. Each
//! [`IndexEntry`] is one upload: a source item plus the binary items built
//! from it. Entries are ordered by source name, then by version with the
//! newest first, so that retention rules can be evaluated with a single
//! pass.
//!
//! On disk an index is a blob containing a sequence of length-prefixed
//! records. See [`IndexWriter`] and [`IndexReader`].

mod codec;

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::blob::BlobId;
use crate::version::DebianVersion;

pub use codec::{IndexReader, IndexWriter};

/// The architecture name used by source items.
pub const SOURCE_ARCHITECTURE: &str = "source";

/// The architecture name of architecture-independent binaries.
pub const ALL_ARCHITECTURE: &str = "all";

/// The kind of an index item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// A source package (a `.dsc` and the files it lists).
    Source,

    /// A binary package (a `.deb`).
    Binary,
}

/// A file that is part of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFile {
    /// File name as it appears in the pool.
    pub name: String,

    /// The blob holding the file.
    pub id: BlobId,

    /// Size in bytes.
    pub size: u64,

    /// Additional digests keyed by algorithm, as listed in the upload.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hashes: BTreeMap<String, String>,
}

/// A source or binary package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexItem {
    pub kind: ItemKind,
    pub name: String,
    pub version: DebianVersion,
    pub component: String,
    pub architecture: String,

    /// The blob holding the package's control paragraph.
    #[serde(default)]
    pub control_id: Option<BlobId>,

    pub files: Vec<IndexFile>,
}

/// One logical package unit in a release index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// The source package name.
    pub name: String,

    /// The source package version.
    pub version: DebianVersion,

    pub source: IndexItem,

    /// Binary items, in item order.
    #[serde(default)]
    pub binaries: Vec<IndexItem>,

    /// The blob holding the `.changes` file of the upload.
    #[serde(default)]
    pub changes_id: Option<BlobId>,
}

/// An item handed over by the upload layer, tagged with its source.
#[derive(Debug, Clone)]
pub struct UploadedItem {
    /// Name of the source package the item was built from.
    pub source: String,

    pub item: IndexItem,
}

impl IndexItem {
    /// Compares two items in index order.
    ///
    /// Items are sorted by name and architecture, then by version with
    /// the newest first.
    pub fn order(&self, other: &Self) -> Ordering {
        self.name
            .as_bytes()
            .cmp(other.name.as_bytes())
            .then_with(|| {
                self.architecture
                    .as_bytes()
                    .cmp(other.architecture.as_bytes())
            })
            .then_with(|| other.version.compare(&self.version))
    }

    /// Returns the IDs of all blobs this item refers to.
    pub fn blob_ids(&self) -> impl Iterator<Item = BlobId> + '_ {
        self.control_id
            .iter()
            .copied()
            .chain(self.files.iter().map(|f| f.id))
    }
}

impl IndexEntry {
    /// Creates an entry from a source item and its binaries.
    pub fn new(source: IndexItem, mut binaries: Vec<IndexItem>) -> Self {
        binaries.sort_by(IndexItem::order);

        Self {
            name: source.name.clone(),
            version: source.version.clone(),
            source,
            binaries,
            changes_id: None,
        }
    }

    /// Compares two entries in index order.
    ///
    /// Entries are sorted by name, then by version with the newest first.
    pub fn order(&self, other: &Self) -> Ordering {
        self.name
            .as_bytes()
            .cmp(other.name.as_bytes())
            .then_with(|| other.version.compare(&self.version))
    }

    /// Returns the source and binary items.
    pub fn items(&self) -> impl Iterator<Item = &IndexItem> {
        std::iter::once(&self.source).chain(self.binaries.iter())
    }

    /// Returns the IDs of all blobs this entry refers to.
    pub fn blob_ids(&self) -> impl Iterator<Item = BlobId> + '_ {
        self.changes_id
            .iter()
            .copied()
            .chain(self.items().flat_map(|item| item.blob_ids()))
    }

    /// Returns a short human-readable description like `hello 2.10-1`.
    pub fn describe(&self) -> String {
        format!("{} {}", self.name, self.version)
    }
}

/// Groups uploaded items into index entries.
///
/// Items are grouped by source name and version. The item with the
/// `source` architecture becomes the source item of the entry. If an
/// upload is binary-only, a source item without files is synthesized so
/// that every entry has one. The result is in index order.
pub fn entries_from_items<I>(items: I, changes_id: Option<BlobId>) -> Vec<IndexEntry>
where
    I: IntoIterator<Item = UploadedItem>,
{
    let mut groups: BTreeMap<(String, DebianVersion), (Option<IndexItem>, Vec<IndexItem>)> =
        BTreeMap::new();

    for UploadedItem { source, item } in items {
        let group = groups
            .entry((source, item.version.clone()))
            .or_insert_with(|| (None, Vec::new()));

        if item.kind == ItemKind::Source {
            group.0 = Some(item);
        } else {
            group.1.push(item);
        }
    }

    let mut entries: Vec<IndexEntry> = groups
        .into_iter()
        .map(|((name, version), (source, binaries))| {
            let source = source.unwrap_or_else(|| {
                let component = binaries
                    .first()
                    .map(|b| b.component.clone())
                    .unwrap_or_else(|| "main".to_string());

                IndexItem {
                    kind: ItemKind::Source,
                    name,
                    version,
                    component,
                    architecture: SOURCE_ARCHITECTURE.to_string(),
                    control_id: None,
                    files: Vec::new(),
                }
            });

            let mut entry = IndexEntry::new(source, binaries);
            entry.changes_id = changes_id;
            entry
        })
        .collect();

    entries.sort_by(IndexEntry::order);
    entries
}
