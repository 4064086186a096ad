#![deny(
    asm_sub_register,
    deprecated,
    missing_abi,
    unsafe_code,
    unused_macros,
    unused_must_use,
    unused_unsafe
)]
#![deny(clippy::from_over_into, clippy::needless_question_mark)]
#![cfg_attr(
    not(debug_assertions),
    deny(unused_imports, unused_mut, unused_variables,)
)]

pub mod config;
pub mod gc;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::OnceCell;

use aptvault::archive::Archive;
use aptvault::blob::BlobStore;
use config::Config;

pub type State = Arc<StateInner>;

/// Global daemon state.
pub struct StateInner {
    /// The daemon configuration.
    config: Config,

    /// The archive.
    archive: OnceCell<Archive>,
}

impl StateInner {
    pub async fn new(config: Config) -> State {
        Arc::new(Self {
            config,
            archive: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the archive, opening it on first use.
    pub async fn archive(&self) -> Result<&Archive> {
        self.archive
            .get_or_try_init(|| async {
                let blobs = BlobStore::new(self.config.blob_store()).await?;
                let archive = Archive::open(blobs, self.config.archive.clone())?;
                Ok::<_, anyhow::Error>(archive)
            })
            .await
    }
}

/// Prints the heads of all distributions.
pub async fn list_dists(state: &State) -> Result<()> {
    let archive = state.archive().await?;

    for (name, id) in archive.list_dists().await? {
        let (_, release) = archive.get_dist(&name).await?;
        println!(
            "{}\t{}\t{}\t{}",
            name,
            id,
            release.suite,
            release.date.to_rfc3339()
        );
    }

    Ok(())
}

/// Publishes every distribution to the public directory.
pub async fn publish_all(state: &State) -> Result<()> {
    let public_path = state
        .config
        .public_path
        .as_deref()
        .ok_or_else(|| anyhow!("public-path is not configured"))?;

    let archive = state.archive().await?;

    for name in archive.list_dists().await?.into_keys() {
        let report = archive.publish(&name, public_path).await?;
        tracing::info!("Published {} ({} files)", name, report.files);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Path;

    use aptvault::archive::ArchiveConfig;
    use aptvault::testing::{package_entry, upload};

    use crate::config::GarbageCollectionConfig;

    fn test_config(dir: &Path) -> Config {
        Config {
            store_path: dir.join("store"),
            temp_path: None,
            public_path: Some(dir.join("public")),
            prefix_depth: 2,
            archive: ArchiveConfig::default(),
            garbage_collection: GarbageCollectionConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_publish_all() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateInner::new(test_config(dir.path())).await;

        let archive = state.archive().await.unwrap();
        upload(
            archive,
            "stable",
            vec![package_entry("hello", "1.0-1", &["amd64"])],
        )
        .await;
        archive.create_dist("testing").await.unwrap();

        publish_all(&state).await.unwrap();

        let public = dir.path().join("public");
        assert!(public.join("dists/stable/Release").is_file());
        assert!(public.join("dists/testing/Release").is_file());
        assert!(public
            .join("pool/stable/h/hello/1.0-1/hello_1.0-1_amd64.deb")
            .is_file());

        list_dists(&state).await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_without_public_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.public_path = None;

        let state = StateInner::new(config).await;
        assert!(publish_all(&state).await.is_err());
    }
}
