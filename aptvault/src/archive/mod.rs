//! The archive.
//!
//! [`Archive`] is the context object every operation goes through. It
//! owns the store, the garbage collector task and the read/write gate,
//! and is meant to be created once at startup and shared.
//!
//! ## Concurrency
//!
//! Operations that change a distribution take the write side of the gate
//! and run one at a time. Lookups take the read side. The gate is fair,
//! so a waiting writer holds off new readers.
//!
//! Garbage collection is coordinated separately. Every write disables it
//! before storing new blobs and enables it again only after the
//! distribution head has been updated.

mod store;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::instrument;

use crate::artifacts::{generate_artifacts, ReleaseSigner};
use crate::blob::{BlobId, BlobStore};
use crate::dist::DistName;
use crate::error::{VaultError, VaultResult};
use crate::gc::{GarbageCollector, GcResponse};
use crate::index::IndexEntry;
use crate::merge::{delete_entries, merge_entries, IndexUpdate};
use crate::prune::PruneRuleSet;
use crate::publish::{publish_release, PublishReport};
use crate::release::{compile_pool_pattern, Action, ActionKind, Release};
use crate::trim::{self, apply_trim, trim_depth, LengthTrimmer, TrimPolicy};
use crate::util::Finally;
use crate::version::DebianVersion;

pub use store::ArchiveStore;
pub(crate) use store::is_head_ref;

/// Archive configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveConfig {
    /// Retention rules applied on every merge.
    ///
    /// Empty by default, which never prunes.
    #[serde(rename = "prune-rules")]
    #[serde(default)]
    pub prune_rules: PruneRuleSet,

    /// Number of releases before the head whose content is kept.
    ///
    /// If non-zero, every merge trims the history to this length.
    #[serde(rename = "auto-trim-length")]
    #[serde(default)]
    pub auto_trim_length: u32,

    /// Pool pattern of new distributions.
    #[serde(rename = "pool-pattern")]
    #[serde(default = "default_pool_pattern")]
    pub pool_pattern: String,

    /// Suite of new distributions.
    #[serde(default = "default_suite")]
    pub suite: String,
}

/// The result of a merge or deletion.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// The new head of the distribution.
    pub release_id: BlobId,

    /// Everything that happened, in index order.
    pub actions: Vec<Action>,

    /// Whether the index changed.
    pub changed: bool,
}

/// An archive of distributions.
pub struct Archive {
    store: Arc<ArchiveStore>,
    gc: GarbageCollector,
    gate: RwLock<()>,
    config: ArchiveConfig,
    signer: Option<Arc<dyn ReleaseSigner>>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            prune_rules: PruneRuleSet::default(),
            auto_trim_length: 0,
            pool_pattern: default_pool_pattern(),
            suite: default_suite(),
        }
    }
}

impl Archive {
    /// Opens an archive on a blob store.
    ///
    /// This spawns the garbage collector task, so it must be called
    /// within a Tokio runtime.
    pub fn open(blobs: BlobStore, config: ArchiveConfig) -> VaultResult<Self> {
        if !config.pool_pattern.is_empty() {
            compile_pool_pattern(&config.pool_pattern)?;
        }

        let store = Arc::new(ArchiveStore::new(blobs));
        let gc = GarbageCollector::spawn(store.clone());

        Ok(Self {
            store,
            gc,
            gate: RwLock::new(()),
            config,
            signer: None,
        })
    }

    /// Signs release metadata with a signer.
    pub fn with_signer(mut self, signer: Arc<dyn ReleaseSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn store(&self) -> &ArchiveStore {
        &self.store
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Excludes writers while the guard is held.
    ///
    /// Archive methods take the gate themselves and must not be called
    /// while holding a guard.
    pub async fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().await
    }

    /// Excludes readers and other writers while the guard is held.
    ///
    /// Archive methods take the gate themselves and must not be called
    /// while holding a guard.
    pub async fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().await
    }

    /// Returns the heads of all distributions.
    pub async fn list_dists(&self) -> VaultResult<BTreeMap<String, BlobId>> {
        let _guard = self.gate.read().await;
        self.store.release_tags().await
    }

    /// Returns the head of a distribution.
    pub async fn get_dist(&self, name: &str) -> VaultResult<(BlobId, Release)> {
        let name = DistName::new(name.to_owned())?;
        let _guard = self.gate.read().await;

        let id = self.head(&name).await?;
        let release = self.store.get_release(&id).await?;
        Ok((id, release))
    }

    /// Points a distribution at an existing release.
    pub async fn set_dist(&self, name: &str, id: &BlobId) -> VaultResult<()> {
        let name = DistName::new(name.to_owned())?;
        let _guard = self.gate.write().await;

        // The release may be unreachable until the tag is written
        self.with_gc_disabled(async {
            // Only well-formed releases can become heads
            self.store.get_release(id).await?;
            self.store.set_release_tag(name.as_str(), id).await?;

            tracing::info!("Distribution {} set to {}", name, id);
            Ok(())
        })
        .await
    }

    /// Creates a distribution with an empty root release.
    ///
    /// If the distribution already exists, its head is returned.
    #[instrument(skip(self))]
    pub async fn create_dist(&self, name: &str) -> VaultResult<BlobId> {
        let name = DistName::new(name.to_owned())?;
        let _guard = self.gate.write().await;

        match self.head(&name).await {
            Ok(id) => {
                tracing::info!("Distribution {} already exists", name);
                return Ok(id);
            }
            Err(VaultError::NoSuchDist { .. }) => {}
            Err(e) => return Err(e),
        }

        self.with_gc_disabled(self.create_root(&name)).await
    }

    /// Deletes a distribution.
    ///
    /// Its releases become unreachable and are removed by the next
    /// garbage collection.
    #[instrument(skip(self))]
    pub async fn delete_dist(&self, name: &str) -> VaultResult<()> {
        let name = DistName::new(name.to_owned())?;
        let _guard = self.gate.write().await;

        self.head(&name).await?;
        self.store.delete_release_tag(name.as_str()).await?;

        tracing::info!("Deleted distribution {}", name);
        Ok(())
    }

    /// Merges a batch of entries into a distribution.
    ///
    /// The distribution is created if it does not exist. A new release is
    /// recorded even if nothing changed.
    #[instrument(skip(self, entries), fields(entries = entries.len()))]
    pub async fn merge_batch(
        &self,
        name: &str,
        entries: Vec<IndexEntry>,
    ) -> VaultResult<MergeOutcome> {
        let name = DistName::new(name.to_owned())?;
        let _guard = self.gate.write().await;

        self.with_gc_disabled(async {
            let head_id = match self.head(&name).await {
                Ok(id) => id,
                Err(VaultError::NoSuchDist { .. }) => self.create_root(&name).await?,
                Err(e) => return Err(e),
            };

            let head = self.store.get_release(&head_id).await?;
            let mut parent = self.store.open_release_index(&head_id, &head).await?;
            let mut pruner = self.config.prune_rules.pruner();

            let update = merge_entries(&self.store, &mut parent, entries, &mut pruner).await?;
            self.commit(&name, head_id, &head, update).await
        })
        .await
    }

    /// Deletes a package from a distribution.
    ///
    /// If `version` is given only that version is deleted, otherwise all
    /// versions are.
    #[instrument(skip(self))]
    pub async fn delete_packages(
        &self,
        name: &str,
        package: &str,
        version: Option<&DebianVersion>,
    ) -> VaultResult<MergeOutcome> {
        let name = DistName::new(name.to_owned())?;
        let _guard = self.gate.write().await;

        self.with_gc_disabled(async {
            let head_id = self.head(&name).await?;
            let head = self.store.get_release(&head_id).await?;
            let mut parent = self.store.open_release_index(&head_id, &head).await?;

            let update = delete_entries(&self.store, &mut parent, package, version).await?;
            self.commit(&name, head_id, &head, update).await
        })
        .await
    }

    /// Trims the history of a distribution.
    ///
    /// Returns the new head, which is the old head if trimming had no
    /// effect.
    #[instrument(skip(self))]
    pub async fn trim_history(&self, name: &str, policy: TrimPolicy) -> VaultResult<BlobId> {
        let name = DistName::new(name.to_owned())?;
        let _guard = self.gate.write().await;

        self.with_gc_disabled(async {
            let head_id = self.head(&name).await?;
            let mut trimmer = policy.trimmer();

            let new_head = trim::trim_history(&self.store, head_id, trimmer.as_mut()).await?;
            if new_head != head_id {
                self.store.set_release_tag(name.as_str(), &new_head).await?;
                tracing::info!("Distribution {} set to {}", name, new_head);
            }

            Ok(new_head)
        })
        .await
    }

    /// Requests a garbage collection.
    ///
    /// If a write is in progress, collection is deferred until it
    /// finishes.
    pub async fn garbage_collect(&self) -> VaultResult<GcResponse> {
        self.gc.run().await
    }

    /// Prevents garbage collection until [`Archive::enable_gc`] is called.
    pub async fn disable_gc(&self) -> VaultResult<GcResponse> {
        self.gc.disable().await
    }

    /// Undoes one [`Archive::disable_gc`].
    pub async fn enable_gc(&self) -> VaultResult<GcResponse> {
        self.gc.enable().await
    }

    /// Publishes the head of a distribution into a public directory.
    #[instrument(skip(self))]
    pub async fn publish(&self, name: &str, public_dir: &Path) -> VaultResult<PublishReport> {
        let name = DistName::new(name.to_owned())?;

        // Publishing replaces files in place, so publishers are serialized
        let _guard = self.gate.write().await;

        let head_id = self.head(&name).await?;
        let release = self.store.get_release(&head_id).await?;
        publish_release(&self.store, &release, public_dir).await
    }

    async fn head(&self, name: &DistName) -> VaultResult<BlobId> {
        match self.store.get_release_tag(name.as_str()).await {
            Err(VaultError::NoSuchRef { .. }) => Err(VaultError::NoSuchDist {
                name: name.to_string(),
            }),
            r => r,
        }
    }

    async fn create_root(&self, name: &DistName) -> VaultResult<BlobId> {
        let mut seed = Release::seed(name.as_str(), &self.config.suite, &self.config.pool_pattern);
        seed.index_id = self.store.empty_index();
        generate_artifacts(&self.store, &mut seed, self.signer.as_deref()).await?;

        self.store.release_root(seed).await
    }

    /// Records a new index as the head of a distribution.
    async fn commit(
        &self,
        name: &DistName,
        head_id: BlobId,
        head: &Release,
        update: IndexUpdate,
    ) -> VaultResult<MergeOutcome> {
        for action in &update.actions {
            log_action(name, action);
        }

        let changed = update.actions.iter().any(|a| a.kind.is_change());
        let mut release = head.child(head_id, update.index_id, update.actions);

        if self.config.auto_trim_length > 0 {
            let mut trimmer = LengthTrimmer::new(self.config.auto_trim_length);
            if let Some(depth) = trim_depth(&self.store, &release, &mut trimmer).await? {
                apply_trim(&mut release, depth);
            }
        }

        generate_artifacts(&self.store, &mut release, self.signer.as_deref()).await?;

        let release_id = self.store.add_release(&release).await?;
        self.store.set_release_tag(name.as_str(), &release_id).await?;
        tracing::info!("Distribution {} set to {}", name, release_id);

        Ok(MergeOutcome {
            release_id,
            actions: release.actions,
            changed,
        })
    }

    /// Runs a write with garbage collection disabled.
    ///
    /// Collection is enabled again even if the write is cancelled.
    async fn with_gc_disabled<T, F>(&self, f: F) -> VaultResult<T>
    where
        F: Future<Output = VaultResult<T>>,
    {
        self.gc.disable().await?;

        let gc = self.gc.clone();
        let guard = Finally::new(async move {
            if let Err(e) = gc.enable().await {
                tracing::warn!("Could not enable garbage collection: {}", e);
            }
        });

        let result = f.await;

        guard.cancel();
        self.gc.enable().await?;

        result
    }
}

fn log_action(name: &DistName, action: &Action) {
    match action.kind {
        ActionKind::Add | ActionKind::Delete | ActionKind::Prune | ActionKind::Trim => {
            tracing::info!("{}: {}", name, action);
        }
        ActionKind::SkipPresent | ActionKind::SkipPrune => {
            tracing::debug!("{}: {}", name, action);
        }
    }
}

fn default_pool_pattern() -> String {
    "lib[a-z]|[a-z]".to_string()
}

fn default_suite() -> String {
    "stable".to_string()
}
