//! Streaming index merge.
//!
//! A merge reads the parent index and a sorted batch of new entries side
//! by side and writes the combined index in one pass:
//!
//! - A parent entry sorting first is kept unless pruned (`PRUNE`).
//! - A new entry equal to a parent entry is skipped in favor of the
//!   existing one (`SKIP_PRESENT`), or dropped entirely if the existing
//!   one is pruned (`SKIP_PRUNE`).
//! - A new entry sorting first is added unless pruned (`ADD` or `PRUNE`).
//! - Repeats of a new entry within the batch are skipped (`SKIP_PRESENT`).
//!
//! Every emitted entry passes through the [`Pruner`] in output order.

use std::cmp::Ordering;
use std::iter::Peekable;

use tracing::instrument;

use crate::archive::ArchiveStore;
use crate::blob::BlobId;
use crate::error::VaultResult;
use crate::index::{IndexEntry, IndexReader, IndexWriter};
use crate::prune::Pruner;
use crate::release::{Action, ActionKind};
use crate::version::DebianVersion;

/// The result of writing a new index.
#[derive(Debug)]
pub struct IndexUpdate {
    pub index_id: BlobId,
    pub actions: Vec<Action>,
}

struct MergeOutput<'a, 'p> {
    writer: IndexWriter,
    pruner: &'a mut Pruner<'p>,
    actions: Vec<Action>,
}

impl<'a, 'p> MergeOutput<'a, 'p> {
    async fn keep(&mut self, entry: IndexEntry) -> VaultResult<()> {
        if self.pruner.should_prune(&entry) {
            self.record(ActionKind::Prune, &entry);
            Ok(())
        } else {
            self.writer.add_entry(&entry).await
        }
    }

    async fn present(&mut self, entry: IndexEntry) -> VaultResult<()> {
        if self.pruner.should_prune(&entry) {
            self.record(ActionKind::SkipPrune, &entry);
            Ok(())
        } else {
            self.record(ActionKind::SkipPresent, &entry);
            self.writer.add_entry(&entry).await
        }
    }

    async fn add(&mut self, entry: IndexEntry) -> VaultResult<()> {
        if self.pruner.should_prune(&entry) {
            self.record(ActionKind::Prune, &entry);
            Ok(())
        } else {
            self.record(ActionKind::Add, &entry);
            self.writer.add_entry(&entry).await
        }
    }

    fn record(&mut self, kind: ActionKind, entry: &IndexEntry) {
        self.actions.push(Action::new(kind, entry.describe()));
    }

    async fn finish(self) -> VaultResult<IndexUpdate> {
        Ok(IndexUpdate {
            index_id: self.writer.close().await?,
            actions: self.actions,
        })
    }
}

/// Merges a batch of entries into an index.
///
/// The batch does not need to be sorted. The parent index must be in
/// index order, which every index written by this crate is.
#[instrument(skip_all)]
pub async fn merge_entries(
    store: &ArchiveStore,
    parent: &mut IndexReader,
    mut entries: Vec<IndexEntry>,
    pruner: &mut Pruner<'_>,
) -> VaultResult<IndexUpdate> {
    entries.sort_by(IndexEntry::order);

    let mut output = MergeOutput {
        writer: store.add_index().await?,
        pruner,
        actions: Vec::new(),
    };

    let mut left = parent.next_entry().await?;
    let mut right = entries.into_iter().peekable();

    loop {
        let ordering = match (&left, right.peek()) {
            (None, None) => break,
            (Some(l), Some(r)) => l.order(r),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
        };

        match ordering {
            Ordering::Less => {
                if let Some(entry) = left.take() {
                    output.keep(entry).await?;
                }
                left = parent.next_entry().await?;
            }
            Ordering::Equal => {
                let repeats = match right.next() {
                    Some(entry) => take_repeats(&mut right, &entry),
                    None => Vec::new(),
                };
                if let Some(entry) = left.take() {
                    output.present(entry).await?;
                }
                for entry in repeats {
                    output.record(ActionKind::SkipPresent, &entry);
                }
                left = parent.next_entry().await?;
            }
            Ordering::Greater => {
                if let Some(entry) = right.next() {
                    let repeats = take_repeats(&mut right, &entry);
                    output.add(entry).await?;
                    for entry in repeats {
                        output.record(ActionKind::SkipPresent, &entry);
                    }
                }
            }
        }
    }

    output.finish().await
}

/// Takes the entries of a sorted batch that repeat `entry`.
fn take_repeats<I>(batch: &mut Peekable<I>, entry: &IndexEntry) -> Vec<IndexEntry>
where
    I: Iterator<Item = IndexEntry>,
{
    let mut repeats = Vec::new();
    while let Some(next) = batch.next_if(|next| next.order(entry) == Ordering::Equal) {
        repeats.push(next);
    }
    repeats
}

/// Removes entries of a package from an index.
///
/// If `version` is given, only that version is removed.
#[instrument(skip_all)]
pub async fn delete_entries(
    store: &ArchiveStore,
    parent: &mut IndexReader,
    name: &str,
    version: Option<&DebianVersion>,
) -> VaultResult<IndexUpdate> {
    let mut writer = store.add_index().await?;
    let mut actions = Vec::new();

    while let Some(entry) = parent.next_entry().await? {
        let matches = entry.name == name && version.map_or(true, |v| *v == entry.version);

        if matches {
            actions.push(Action::new(ActionKind::Delete, entry.describe()));
        } else {
            writer.add_entry(&entry).await?;
        }
    }

    Ok(IndexUpdate {
        index_id: writer.close().await?,
        actions,
    })
}
