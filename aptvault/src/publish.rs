//! Publishing releases into a public directory tree.
//!
//! A published distribution looks like a regular APT repository:
//!
//! ```text
//! dists/<code name>/Release
//! dists/<code name>/InRelease
//! dists/<code name>/Release.gpg
//! dists/<code name>/<component>/binary-<arch>/Packages
//! dists/<code name>/<component>/binary-<arch>/Packages.gz
//! pool/<code name>/<prefix>/<package>/<version>/<files>
//! ```
//!
//! Every file is a hard link to a blob, so the public directory must be
//! on the same filesystem as the blob store. Publishing replaces the
//! distribution's subtrees entirely.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::fs;
use tracing::instrument;

use crate::archive::ArchiveStore;
use crate::blob::BlobId;
use crate::error::VaultResult;
use crate::release::Release;

/// Statistics of a publish run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    /// Number of files linked.
    pub files: usize,

    pub duration: Duration,
}

struct Linker<'a> {
    store: &'a ArchiveStore,
    files: usize,
}

impl<'a> Linker<'a> {
    async fn link(&mut self, id: &BlobId, path: PathBuf) -> VaultResult<()> {
        self.store.blobs().link(id, &[path]).await?;
        self.files += 1;
        Ok(())
    }
}

/// Publishes a release.
///
/// If publishing fails, the distribution's metadata directory is
/// removed so that clients never see metadata without its packages.
#[instrument(skip_all, fields(code_name = %release.code_name))]
pub async fn publish_release(
    store: &ArchiveStore,
    release: &Release,
    public_dir: &Path,
) -> VaultResult<PublishReport> {
    let start = Instant::now();
    let dist_dir = public_dir.join("dists").join(&release.code_name);

    clear_dir(&dist_dir).await?;

    let mut linker = Linker { store, files: 0 };

    let result = link_release(&mut linker, release, &dist_dir, public_dir).await;

    if let Err(e) = result {
        tracing::warn!("Publishing {} failed: {}", release.code_name, e);
        clear_dir(&dist_dir).await?;
        return Err(e);
    }

    let report = PublishReport {
        files: linker.files,
        duration: start.elapsed(),
    };

    tracing::info!(
        "Published {} files of {} in {:?}",
        report.files,
        release.code_name,
        report.duration
    );

    Ok(report)
}

async fn link_release(
    linker: &mut Linker<'_>,
    release: &Release,
    dist_dir: &Path,
    public_dir: &Path,
) -> VaultResult<()> {
    link_dist(linker, release, dist_dir).await?;
    link_pool(linker, release, public_dir).await
}

async fn link_dist(linker: &mut Linker<'_>, release: &Release, dist_dir: &Path) -> VaultResult<()> {
    for component in &release.components {
        for arch in &component.architectures {
            let arch_dir = dist_dir
                .join(&component.name)
                .join(format!("binary-{}", arch.name));

            linker.link(&arch.packages, arch_dir.join("Packages")).await?;
            linker
                .link(&arch.packages_gz, arch_dir.join("Packages.gz"))
                .await?;
        }
    }

    let metadata = [
        (release.release_file, "Release"),
        (release.in_release, "InRelease"),
        (release.release_gpg, "Release.gpg"),
    ];

    for (id, name) in metadata {
        if let Some(id) = id {
            linker.link(&id, dist_dir.join(name)).await?;
        }
    }

    Ok(())
}

async fn link_pool(linker: &mut Linker<'_>, release: &Release, public_dir: &Path) -> VaultResult<()> {
    let pool_root = public_dir.join("pool").join(&release.code_name);
    tracing::debug!("Clearing pool {:?}", pool_root);
    clear_dir(&pool_root).await?;

    let pool = release.pool_layout()?;
    let mut index = linker.store.open_index(&release.index_id).await?;

    while let Some(entry) = index.next_entry().await? {
        let dir = public_dir.join(pool.dir(&entry.name, &entry.version));

        if let Some(changes) = entry.changes_id {
            linker
                .link(
                    &changes,
                    dir.join(format!("{}_{}.changes", entry.name, entry.version)),
                )
                .await?;
        }

        for item in entry.items() {
            for file in &item.files {
                linker.link(&file.id, dir.join(&file.name)).await?;
            }
        }
    }

    Ok(())
}

async fn clear_dir(path: &Path) -> VaultResult<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testing::{file_content, package_entry, temp_archive, upload};

    #[tokio::test]
    async fn test_publish() {
        let (dir, archive) = temp_archive(Default::default()).await;
        let public = dir.path().join("public");

        upload(
            &archive,
            "stable",
            vec![
                package_entry("hello", "1.0-1", &["amd64"]),
                package_entry("libfoo", "2.0", &["amd64", "all"]),
            ],
        )
        .await;

        archive.publish("stable", &public).await.unwrap();

        let dist = public.join("dists/stable");
        for file in [
            "Release",
            "main/binary-amd64/Packages",
            "main/binary-amd64/Packages.gz",
            "main/binary-all/Packages",
        ] {
            assert!(dist.join(file).is_file(), "{} is missing", file);
        }
        assert!(!dist.join("InRelease").exists());

        let deb = public.join("pool/stable/h/hello/1.0-1/hello_1.0-1_amd64.deb");
        assert_eq!(
            file_content("hello_1.0-1_amd64.deb"),
            std::fs::read(&deb).unwrap()
        );
        assert!(public
            .join("pool/stable/libf/libfoo/2.0/libfoo_2.0_all.deb")
            .is_file());

        let packages = std::fs::read_to_string(dist.join("main/binary-amd64/Packages")).unwrap();
        assert!(packages.contains("Filename: pool/stable/h/hello/1.0-1/hello_1.0-1_amd64.deb\n"));

        // Republishing replaces the previous tree
        archive.delete_packages("stable", "hello", None).await.unwrap();
        archive.publish("stable", &public).await.unwrap();

        assert!(!deb.exists());
        assert!(!public.join("pool/stable/h").exists());
        let packages = std::fs::read_to_string(dist.join("main/binary-amd64/Packages")).unwrap();
        assert!(!packages.contains("hello"));
    }

    #[tokio::test]
    async fn test_publish_missing_dist() {
        let (dir, archive) = temp_archive(Default::default()).await;

        let result = archive.publish("unstable", &dir.path().join("public")).await;
        assert!(matches!(
            result,
            Err(crate::error::VaultError::NoSuchDist { .. })
        ));
    }
}
