//! Garbage collection.

use std::time::Duration;

use anyhow::Result;
use tokio::time;
use tracing::instrument;

use aptvault::gc::GcResponse;

use super::State;

/// Runs garbage collection periodically.
pub async fn run_garbage_collection(state: State) {
    let interval = state.config().garbage_collection.interval;

    if interval == Duration::ZERO {
        // disabled
        return;
    }

    loop {
        // We don't stop even if it errors
        if let Err(e) = run_garbage_collection_once(state.clone()).await {
            tracing::warn!("Garbage collection failed: {}", e);
        }

        time::sleep(interval).await;
    }
}

/// Runs garbage collection once.
#[instrument(skip_all)]
pub async fn run_garbage_collection_once(state: State) -> Result<()> {
    tracing::info!("Running garbage collection...");

    let archive = state.archive().await?;

    match archive.garbage_collect().await? {
        GcResponse::Collected(report) => {
            tracing::info!(
                "Removed {} unused blobs ({} bytes), {} retained",
                report.files,
                report.bytes,
                report.retained
            );
        }
        GcResponse::Deferred => {
            tracing::info!("Garbage collection deferred until pending writes finish");
        }
        GcResponse::Done => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use aptvault::archive::ArchiveConfig;

    use crate::config::{Config, GarbageCollectionConfig};
    use crate::StateInner;

    #[tokio::test]
    async fn test_gc_once() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateInner::new(Config {
            store_path: dir.path().join("store"),
            temp_path: None,
            public_path: None,
            prefix_depth: 3,
            archive: ArchiveConfig::default(),
            garbage_collection: GarbageCollectionConfig {
                interval: Duration::ZERO,
            },
        })
        .await;

        let archive = state.archive().await.unwrap();
        let orphan = archive.store().blobs().store_bytes(b"orphan").await.unwrap();

        run_garbage_collection_once(state.clone()).await.unwrap();
        assert!(!archive.store().blobs().exists(&orphan).await.unwrap());

        // Returns immediately when disabled
        run_garbage_collection(state).await;
    }
}
