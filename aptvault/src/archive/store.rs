//! Typed access to releases and indices in a blob store.

use std::collections::BTreeMap;

use crate::blob::{BlobId, BlobStore};
use crate::error::{VaultError, VaultResult};
use crate::index::{IndexReader, IndexWriter};
use crate::release::Release;

/// Namespace of distribution heads.
const HEADS: &str = "heads/";

/// Releases, indices and distribution heads on top of a blob store.
#[derive(Debug)]
pub struct ArchiveStore {
    blobs: BlobStore,
}

impl ArchiveStore {
    pub fn new(blobs: BlobStore) -> Self {
        Self { blobs }
    }

    /// Returns the underlying blob store.
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Loads a release.
    pub async fn get_release(&self, id: &BlobId) -> VaultResult<Release> {
        let bytes = self.blobs.read(id).await?;
        Release::from_bytes(id, &bytes)
    }

    /// Stores a release and returns its ID.
    pub async fn add_release(&self, release: &Release) -> VaultResult<BlobId> {
        self.blobs.store_bytes(&release.to_bytes()?).await
    }

    /// Returns the ID of the index with no entries.
    pub fn empty_index(&self) -> BlobId {
        self.blobs.empty_id()
    }

    /// Starts writing a new index.
    pub async fn add_index(&self) -> VaultResult<IndexWriter> {
        Ok(IndexWriter::new(self.blobs.store().await?))
    }

    /// Opens an index for reading.
    pub async fn open_index(&self, id: &BlobId) -> VaultResult<IndexReader> {
        let file = self.blobs.open(id).await?;
        Ok(IndexReader::new(*id, file))
    }

    /// Opens the index of a release.
    ///
    /// If the release is still present but its index was collected after
    /// its history was trimmed, this returns
    /// [`VaultError::IndexUnavailable`].
    pub async fn open_release_index(
        &self,
        release_id: &BlobId,
        release: &Release,
    ) -> VaultResult<IndexReader> {
        match self.open_index(&release.index_id).await {
            Err(VaultError::NoSuchBlob { id }) if id == release.index_id => {
                Err(VaultError::IndexUnavailable {
                    release: *release_id,
                    index: id,
                })
            }
            r => r,
        }
    }

    /// Stores a new root release and points its distribution head at it.
    ///
    /// The seed's parent, index and actions are reset.
    pub async fn release_root(&self, mut seed: Release) -> VaultResult<BlobId> {
        seed.parent_id = self.blobs.empty_id();
        seed.index_id = self.empty_index();
        seed.actions = Vec::new();

        let id = self.add_release(&seed).await?;
        self.set_release_tag(&seed.code_name, &id).await?;

        tracing::info!("Initialized distribution {} at {}", seed.code_name, id);

        Ok(id)
    }

    /// Returns the head of a distribution.
    pub async fn get_release_tag(&self, name: &str) -> VaultResult<BlobId> {
        self.blobs.get_ref(&head_ref(name)).await
    }

    /// Points the head of a distribution at a release.
    pub async fn set_release_tag(&self, name: &str, id: &BlobId) -> VaultResult<()> {
        self.blobs.set_ref(&head_ref(name), id).await
    }

    /// Removes the head of a distribution.
    pub async fn delete_release_tag(&self, name: &str) -> VaultResult<()> {
        self.blobs.delete_ref(&head_ref(name)).await
    }

    /// Returns the heads of all distributions.
    ///
    /// Only direct children of the `heads/` namespace are distributions.
    pub async fn release_tags(&self) -> VaultResult<BTreeMap<String, BlobId>> {
        let refs = self.blobs.list_refs().await?;

        Ok(refs
            .into_iter()
            .filter_map(|(name, id)| {
                let name = name.strip_prefix(HEADS)?;
                if name.contains('/') {
                    None
                } else {
                    Some((name.to_owned(), id))
                }
            })
            .collect())
    }
}

fn head_ref(name: &str) -> String {
    format!("{}{}", HEADS, name)
}

/// Returns whether a reference names a distribution head.
pub(crate) fn is_head_ref(name: &str) -> bool {
    matches!(name.strip_prefix(HEADS), Some(rest) if !rest.contains('/'))
}
