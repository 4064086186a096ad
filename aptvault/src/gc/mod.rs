//! Garbage collection.
//!
//! A collection pass marks every blob reachable from the current
//! references, then deletes everything else. Distribution heads are
//! walked as release histories. Any other reference only retains the blob
//! it points to.
//!
//! Collection must never run while a writer has blobs that are not yet
//! referenced. The [`GarbageCollector`] serializes passes against writers.

mod actor;

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::instrument;

use crate::archive::{is_head_ref, ArchiveStore};
use crate::blob::BlobId;
use crate::error::{VaultError, VaultResult};
use crate::trim::Depth;

pub use actor::{GarbageCollector, GcResponse};

/// Statistics of a collection pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GcReport {
    /// Number of blobs retained.
    pub retained: usize,

    /// Number of blobs deleted.
    pub files: usize,

    /// Total size of deleted blobs.
    pub bytes: u64,

    pub duration: Duration,
}

#[derive(Default)]
struct Marker {
    used: HashSet<BlobId>,

    /// Best depth each release has been walked with.
    walked: HashMap<BlobId, Depth>,

    /// Indices whose entries have been marked.
    indices: HashSet<BlobId>,
}

impl Marker {
    fn mark(&mut self, id: BlobId) {
        self.used.insert(id);
    }

    async fn walk_release(&mut self, store: &ArchiveStore, head: BlobId) -> VaultResult<()> {
        let mut current = head;
        let mut depth = Depth::Unlimited;

        while !current.is_empty() {
            if matches!(self.walked.get(&current), Some(walked) if *walked >= depth) {
                // Already walked at least as deep
                break;
            }
            self.walked.insert(current, depth);
            self.mark(current);

            let release = store.get_release(&current).await?;

            if depth.preserves() {
                for id in release.artifact_ids() {
                    self.mark(id);
                }

                self.walk_index(store, &current, &release.index_id).await?;
            }

            depth = depth.parent(&release);
            current = release.parent_id;
        }

        Ok(())
    }

    async fn walk_index(
        &mut self,
        store: &ArchiveStore,
        release: &BlobId,
        index: &BlobId,
    ) -> VaultResult<()> {
        self.mark(*index);

        if !self.indices.insert(*index) {
            return Ok(());
        }

        let mut reader = match store.open_index(index).await {
            Ok(reader) => reader,
            Err(VaultError::NoSuchBlob { .. }) => {
                tracing::warn!(
                    "Index {} of release {} is missing, its content cannot be retained",
                    index,
                    release
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        while let Some(entry) = reader.next_entry().await? {
            for id in entry.blob_ids() {
                self.used.insert(id);
            }
        }

        Ok(())
    }
}

/// Returns the set of blobs reachable from the current references.
#[instrument(skip_all)]
pub async fn mark(store: &ArchiveStore) -> VaultResult<HashSet<BlobId>> {
    let mut marker = Marker::default();
    marker.mark(store.blobs().empty_id());

    for (name, id) in store.blobs().list_refs().await? {
        if is_head_ref(&name) {
            tracing::debug!("Walking history of {}", name);
            marker.walk_release(store, id).await?;
        } else {
            marker.mark(id);
        }
    }

    Ok(marker.used)
}

/// Runs one collection pass.
///
/// If marking fails, for example because a release is corrupt, nothing
/// is deleted.
#[instrument(skip_all)]
pub async fn collect(store: &ArchiveStore) -> VaultResult<GcReport> {
    let start = Instant::now();
    tracing::info!("Beginning garbage collection");

    let used = mark(store).await?;

    let mut unused = Vec::new();
    store.blobs().for_each(|id| {
        if !used.contains(&id) {
            unused.push(id);
        }
    })
    .await?;

    let mut files = 0;
    let mut bytes = 0;

    for id in unused {
        let size = match store.blobs().size(&id).await {
            Ok(size) => size,
            Err(VaultError::NoSuchBlob { .. }) => continue,
            Err(e) => return Err(e),
        };

        tracing::debug!("Removing unused blob {}", id);

        match store.blobs().unlink(&id).await {
            Ok(()) => {}
            Err(VaultError::NoSuchBlob { .. }) => continue,
            Err(e) => return Err(e),
        }

        files += 1;
        bytes += size;
    }

    let report = GcReport {
        retained: used.len(),
        files,
        bytes,
        duration: start.elapsed(),
    };

    tracing::info!(
        "Garbage collected {} files ({} bytes) in {:?}",
        report.files,
        report.bytes,
        report.duration
    );

    Ok(report)
}
