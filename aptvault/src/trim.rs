//! History trimming.
//!
//! Trimming does not rewrite history. It records on a release how many
//! of its ancestors keep their content, and the garbage collector stops
//! retaining indices and artifacts beyond that depth. The release records
//! themselves are always retained so the chain stays walkable.

use std::time::Duration;

use tracing::instrument;

use crate::archive::ArchiveStore;
use crate::blob::BlobId;
use crate::error::VaultResult;
use crate::release::{Action, ActionKind, Release};

/// Decides where the preserved history of a distribution ends.
pub trait Trimmer {
    /// Called for each release from the head backwards. Returns `true`
    /// once the release should no longer be preserved.
    fn trim(&mut self, release: &Release) -> bool;
}

/// Keeps a fixed number of releases.
///
/// A length of `n` preserves the head and `n` releases before it.
#[derive(Debug, Clone)]
pub struct LengthTrimmer {
    remaining: i64,
}

/// Keeps releases newer than a given age.
///
/// Not implemented yet: it never trims.
#[derive(Debug, Clone)]
pub struct TimeTrimmer {
    window: Duration,
}

/// How a distribution's history should be trimmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimPolicy {
    /// Preserve the head and this many releases before it.
    Length(u32),

    /// Preserve releases within this window.
    Time(Duration),
}

impl LengthTrimmer {
    pub fn new(length: u32) -> Self {
        Self {
            remaining: i64::from(length),
        }
    }
}

impl Trimmer for LengthTrimmer {
    fn trim(&mut self, _release: &Release) -> bool {
        if self.remaining >= 0 {
            self.remaining -= 1;
            false
        } else {
            true
        }
    }
}

impl TimeTrimmer {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Trimmer for TimeTrimmer {
    fn trim(&mut self, _release: &Release) -> bool {
        false
    }
}

impl TrimPolicy {
    pub fn trimmer(&self) -> Box<dyn Trimmer + Send> {
        match self {
            Self::Length(length) => Box::new(LengthTrimmer::new(*length)),
            Self::Time(window) => Box::new(TimeTrimmer::new(*window)),
        }
    }
}

/// Preservation depth while walking a history.
///
/// `Unlimited` until a release with `trim_after` is seen, then the number
/// of releases, including the current one, whose content is preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Depth {
    Limited(u32),
    Unlimited,
}

impl Depth {
    /// Returns whether the content of the current release is preserved.
    pub(crate) fn preserves(&self) -> bool {
        *self != Self::Limited(0)
    }

    /// Returns the depth at the parent of a release.
    pub(crate) fn parent(self, release: &Release) -> Self {
        let here = match release.trim_after {
            Some(after) => self.min(Self::Limited(after.saturating_add(1))),
            None => self,
        };

        match here {
            Self::Limited(n) => Self::Limited(n.saturating_sub(1)),
            Self::Unlimited => Self::Unlimited,
        }
    }
}

/// Computes how many ancestors of `head` should keep their content.
///
/// The walk starts at `head` itself, which does not need to be stored
/// yet. Returns `None` if the history ends, or is already trimmed to the
/// same depth or shorter, before the trimmer stops.
pub async fn trim_depth(
    store: &ArchiveStore,
    head: &Release,
    trimmer: &mut (dyn Trimmer + Send),
) -> VaultResult<Option<u32>> {
    walk_depth(store, head, true, trimmer).await
}

/// Walks the history from `head` until the trimmer stops.
///
/// Trim records repeat the release before them and are not presented to
/// the trimmer, nor is `head` unless `judge_head` is set.
async fn walk_depth(
    store: &ArchiveStore,
    head: &Release,
    judge_head: bool,
    trimmer: &mut (dyn Trimmer + Send),
) -> VaultResult<Option<u32>> {
    let mut kept: u32 = 0;
    let mut depth = Depth::Unlimited;
    let mut current: Option<Release> = None;

    loop {
        let release = current.as_ref().unwrap_or(head);

        if !depth.preserves() {
            return Ok(None);
        }

        let judged = match &current {
            None => judge_head,
            Some(release) => !release.is_trim_record(),
        };

        if judged && trimmer.trim(release) {
            break;
        }

        kept += 1;
        depth = depth.parent(release);

        if release.parent_id.is_empty() {
            return Ok(None);
        }

        let parent_id = release.parent_id;
        current = Some(store.get_release(&parent_id).await?);
    }

    // The head itself is one of the kept releases
    Ok(Some(kept.saturating_sub(1)))
}

/// Trims the history of a release.
///
/// If trimming has an effect, a new release is stored that copies `head`,
/// has `head` as its parent, and records the preserved depth with a
/// `TRIM` action. The copy does not count towards the trimmer's length.
/// Otherwise `head_id` is returned unchanged.
#[instrument(skip(store, trimmer))]
pub async fn trim_history(
    store: &ArchiveStore,
    head_id: BlobId,
    trimmer: &mut (dyn Trimmer + Send),
) -> VaultResult<BlobId> {
    let head = store.get_release(&head_id).await?;

    let mut trimmed = head.clone();
    trimmed.parent_id = head_id;
    trimmed.date = chrono::Utc::now();
    trimmed.actions = Vec::new();
    trimmed.trim_after = None;

    let depth = match walk_depth(store, &trimmed, false, trimmer).await? {
        Some(depth) => depth,
        None => {
            tracing::debug!("History of {} is already short enough", head_id);
            return Ok(head_id);
        }
    };

    apply_trim(&mut trimmed, depth);

    let id = store.add_release(&trimmed).await?;
    tracing::info!("Trimmed history of {} to {} releases as {}", head_id, depth + 1, id);

    Ok(id)
}

/// Records a trim depth on a release.
pub(crate) fn apply_trim(release: &mut Release, depth: u32) {
    release.trim_after = Some(depth);
    release.actions.push(Action::new(
        ActionKind::Trim,
        format!("Release history trimmed to {} revisions", depth + 1),
    ));
}
