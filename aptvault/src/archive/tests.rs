use super::*;

use std::time::Duration;

use crate::error::VaultResult;
use crate::index::IndexReader;
use crate::testing::{package_entry, temp_archive, upload};

fn config(rules: &str) -> ArchiveConfig {
    ArchiveConfig {
        prune_rules: PruneRuleSet::parse(rules).unwrap(),
        ..Default::default()
    }
}

fn descriptions(actions: &[Action]) -> Vec<String> {
    actions.iter().map(ToString::to_string).collect()
}

async fn read_index(mut reader: IndexReader) -> Vec<String> {
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await.unwrap() {
        entries.push(entry.describe());
    }
    entries
}

async fn head_index(archive: &Archive, name: &str) -> Vec<String> {
    let (id, release) = archive.get_dist(name).await.unwrap();
    let reader = archive
        .store()
        .open_release_index(&id, &release)
        .await
        .unwrap();
    read_index(reader).await
}

#[tokio::test]
async fn test_upload_scenario() {
    let (_dir, archive) = temp_archive(config("pkga_1-1")).await;

    let root = archive.create_dist("stable").await.unwrap();
    let root_release = archive.store().get_release(&root).await.unwrap();
    assert!(root_release.is_root());
    assert_eq!(archive.store().empty_index(), root_release.index_id);

    let first = upload(
        &archive,
        "stable",
        vec![package_entry("pkga", "1.0-1", &["amd64"])],
    )
    .await;
    let release = archive.store().get_release(&first.release_id).await.unwrap();
    assert_eq!(root, release.parent_id);
    assert_eq!(vec!["ADD pkga 1.0-1"], descriptions(&first.actions));
    assert_eq!(vec!["pkga 1.0-1"], head_index(&archive, "stable").await);
    assert!(first.changed);

    let second = upload(
        &archive,
        "stable",
        vec![package_entry("pkga", "1.0-2", &["amd64"])],
    )
    .await;
    assert_eq!(vec!["ADD pkga 1.0-2"], descriptions(&second.actions));
    assert_eq!(
        vec!["pkga 1.0-2", "pkga 1.0-1"],
        head_index(&archive, "stable").await
    );

    let third = upload(
        &archive,
        "stable",
        vec![package_entry("pkga", "1.0-3", &["amd64"])],
    )
    .await;
    assert_eq!(
        vec!["ADD pkga 1.0-3", "PRUNE pkga 1.0-1"],
        descriptions(&third.actions)
    );
    assert_eq!(
        vec!["pkga 1.0-3", "pkga 1.0-2"],
        head_index(&archive, "stable").await
    );

    let release = archive.store().get_release(&third.release_id).await.unwrap();
    assert_eq!(second.release_id, release.parent_id);
}

#[tokio::test]
async fn test_no_extra_revisions() {
    let (_dir, archive) = temp_archive(config("pkga_1-0")).await;

    upload(
        &archive,
        "stable",
        vec![package_entry("pkga", "1.0-1", &["amd64"])],
    )
    .await;
    let second = upload(
        &archive,
        "stable",
        vec![package_entry("pkga", "1.0-2", &["amd64"])],
    )
    .await;

    assert_eq!(
        vec!["ADD pkga 1.0-2", "PRUNE pkga 1.0-1"],
        descriptions(&second.actions)
    );
    assert_eq!(vec!["pkga 1.0-2"], head_index(&archive, "stable").await);
}

#[tokio::test]
async fn test_empty_merge() {
    let (_dir, archive) = temp_archive(Default::default()).await;

    let first = upload(
        &archive,
        "stable",
        vec![
            package_entry("a", "1.0", &["amd64"]),
            package_entry("b", "1.0", &["amd64"]),
        ],
    )
    .await;

    let second = archive.merge_batch("stable", vec![]).await.unwrap();
    assert_ne!(first.release_id, second.release_id);
    assert!(!second.changed);
    assert!(second.actions.is_empty());

    let parent = archive.store().get_release(&first.release_id).await.unwrap();
    let child = archive.store().get_release(&second.release_id).await.unwrap();
    assert_eq!(first.release_id, child.parent_id);
    assert_eq!(parent.index_id, child.index_id);

    // Re-uploading the same package is skipped
    let third = upload(
        &archive,
        "stable",
        vec![package_entry("a", "1.0", &["amd64"])],
    )
    .await;
    assert!(!third.changed);
    assert_eq!(vec!["SKIP_PRESENT a 1.0"], descriptions(&third.actions));
}

#[tokio::test]
async fn test_prune_counter() {
    let (_dir, archive) = temp_archive(config("pkg_2-0")).await;

    for version in ["1.0", "2.0", "3.0", "4.0", "5.0"] {
        upload(
            &archive,
            "stable",
            vec![package_entry("pkg", version, &["amd64"])],
        )
        .await;
    }

    assert_eq!(
        vec!["pkg 5.0", "pkg 4.0", "pkg 3.0"],
        head_index(&archive, "stable").await
    );

    // The same holds for a single batch
    let entries = ["1.0", "3.0", "5.0", "2.0", "4.0"]
        .iter()
        .map(|version| package_entry("pkg", version, &["amd64"]))
        .collect();
    let outcome = archive.merge_batch("testing", entries).await.unwrap();
    assert_eq!(
        vec!["pkg 5.0", "pkg 4.0", "pkg 3.0"],
        head_index(&archive, "testing").await
    );
    assert_eq!(
        vec![
            "ADD pkg 5.0",
            "ADD pkg 4.0",
            "ADD pkg 3.0",
            "PRUNE pkg 2.0",
            "PRUNE pkg 1.0"
        ],
        descriptions(&outcome.actions)
    );
}

#[tokio::test]
async fn test_delete_packages() {
    let (_dir, archive) = temp_archive(Default::default()).await;

    upload(
        &archive,
        "stable",
        vec![
            package_entry("a", "2.0", &["amd64"]),
            package_entry("a", "1.0", &["amd64"]),
            package_entry("b", "1.0", &["amd64"]),
        ],
    )
    .await;

    let version = DebianVersion::parse("1.0").unwrap();
    let outcome = archive
        .delete_packages("stable", "a", Some(&version))
        .await
        .unwrap();
    assert!(outcome.changed);
    assert_eq!(vec!["DELETE a 1.0"], descriptions(&outcome.actions));
    assert_eq!(vec!["a 2.0", "b 1.0"], head_index(&archive, "stable").await);

    let outcome = archive.delete_packages("stable", "c", None).await.unwrap();
    assert!(!outcome.changed);

    assert!(matches!(
        archive.delete_packages("unstable", "a", None).await,
        Err(VaultError::NoSuchDist { .. })
    ));
}

#[tokio::test]
async fn test_dist_management() {
    let (_dir, archive) = temp_archive(Default::default()).await;

    assert!(archive.list_dists().await.unwrap().is_empty());

    let stable = archive.create_dist("stable").await.unwrap();
    assert_eq!(stable, archive.create_dist("stable").await.unwrap());
    let testing = archive.create_dist("testing").await.unwrap();
    assert_ne!(stable, testing);

    let dists = archive.list_dists().await.unwrap();
    assert_eq!(
        vec!["stable", "testing"],
        dists.keys().map(String::as_str).collect::<Vec<_>>()
    );

    let (id, release) = archive.get_dist("testing").await.unwrap();
    assert_eq!(testing, id);
    assert_eq!("testing", release.code_name);
    assert_eq!("stable", release.suite);
    assert!(release.release_file.is_some());

    archive.set_dist("testing", &stable).await.unwrap();
    assert_eq!(stable, archive.get_dist("testing").await.unwrap().0);

    archive.delete_dist("testing").await.unwrap();
    assert!(matches!(
        archive.get_dist("testing").await,
        Err(VaultError::NoSuchDist { .. })
    ));
    assert!(matches!(
        archive.delete_dist("testing").await,
        Err(VaultError::NoSuchDist { .. })
    ));

    for name in ["stable/updates", "", "../x"] {
        assert!(matches!(
            archive.create_dist(name).await,
            Err(VaultError::InvalidDistName { .. })
        ));
    }

    // Only valid releases can become heads
    let bogus = archive.store().blobs().store_bytes(b"bogus").await.unwrap();
    assert!(matches!(
        archive.set_dist("stable", &bogus).await,
        Err(VaultError::CorruptRelease { .. })
    ));
}

#[tokio::test]
async fn test_trimmed_index_unavailable() {
    let (_dir, archive) = temp_archive(Default::default()).await;

    let mut ids = Vec::new();
    for version in ["1.0", "2.0", "3.0", "4.0", "5.0"] {
        let outcome = upload(
            &archive,
            "stable",
            vec![package_entry("pkg", version, &["amd64"])],
        )
        .await;
        ids.push(outcome.release_id);
    }

    let head = *ids.last().unwrap();
    let trimmed = archive
        .trim_history("stable", TrimPolicy::Length(1))
        .await
        .unwrap();
    assert_ne!(head, trimmed);
    assert_eq!(trimmed, archive.get_dist("stable").await.unwrap().0);

    // Trimming again to the same length does nothing
    assert_eq!(
        trimmed,
        archive
            .trim_history("stable", TrimPolicy::Length(1))
            .await
            .unwrap()
    );

    assert!(matches!(
        archive.garbage_collect().await.unwrap(),
        GcResponse::Collected(_)
    ));

    // The head and the release before it are fully readable
    for (id, count) in [(trimmed, 5), (head, 5), (ids[3], 4)] {
        let release = archive.store().get_release(&id).await.unwrap();
        let entries = read_index(
            archive
                .store()
                .open_release_index(&id, &release)
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(count, entries.len());
    }

    // Older releases remain but their indices are gone
    let old = ids[2];
    let release = archive.store().get_release(&old).await.unwrap();
    assert!(matches!(
        archive.store().open_release_index(&old, &release).await,
        Err(VaultError::IndexUnavailable { .. })
    ));
}

#[tokio::test]
async fn test_auto_trim() {
    let config = ArchiveConfig {
        auto_trim_length: 2,
        ..Default::default()
    };
    let (_dir, archive) = temp_archive(config).await;

    let mut outcomes = Vec::new();
    for version in ["1.0", "2.0", "3.0", "4.0", "5.0"] {
        outcomes.push(
            upload(
                &archive,
                "stable",
                vec![package_entry("pkg", version, &["amd64"])],
            )
            .await,
        );
    }

    // root, 1.0 and 2.0 fit into the preserved history
    for outcome in &outcomes[..2] {
        assert!(!outcome
            .actions
            .iter()
            .any(|a| a.kind == ActionKind::Trim));
    }

    let last = outcomes.last().unwrap();
    assert_eq!(ActionKind::Add, last.actions[0].kind);
    assert_eq!(ActionKind::Trim, last.actions[1].kind);

    let release = archive.store().get_release(&last.release_id).await.unwrap();
    assert_eq!(Some(2), release.trim_after);
}

#[tokio::test]
async fn test_write_waits_for_readers() {
    let (_dir, archive) = temp_archive(Default::default()).await;
    let archive = Arc::new(archive);

    let guard = archive.read().await;

    let writer = tokio::spawn({
        let archive = archive.clone();
        async move { archive.create_dist("stable").await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!writer.is_finished());

    drop(guard);
    writer.await.unwrap().unwrap();

    assert_eq!(1, archive.list_dists().await.unwrap().len());
}

#[tokio::test]
async fn test_invalid_pool_pattern() {
    let dir = tempfile::tempdir().unwrap();
    let blobs = BlobStore::new(crate::blob::BlobStoreConfig::new(dir.path().to_owned()))
        .await
        .unwrap();

    let config = ArchiveConfig {
        pool_pattern: "lib[".to_string(),
        ..Default::default()
    };
    assert!(matches!(
        Archive::open(blobs, config),
        Err(VaultError::InvalidPoolPattern { .. })
    ));
}

#[test]
fn test_config() {
    let config: ArchiveConfig = serde_json::from_str(
        r#"{ "prune-rules": "linux-.*_1-0", "auto-trim-length": 10, "suite": "unstable" }"#,
    )
    .unwrap();

    assert!(!config.prune_rules.is_empty());
    assert_eq!(10, config.auto_trim_length);
    assert_eq!("lib[a-z]|[a-z]", config.pool_pattern);
    assert_eq!("unstable", config.suite);

    assert!(serde_json::from_str::<ArchiveConfig>(r#"{ "prune-rules": "nope" }"#).is_err());
    assert!(serde_json::from_str::<ArchiveConfig>(r#"{ "unknown": 1 }"#).is_err());
}

struct PrefixSigner;

impl ReleaseSigner for PrefixSigner {
    fn clearsign(&self, release: &[u8]) -> VaultResult<Vec<u8>> {
        let mut signed = b"signed\n".to_vec();
        signed.extend_from_slice(release);
        Ok(signed)
    }

    fn detach_sign(&self, _release: &[u8]) -> VaultResult<Vec<u8>> {
        Ok(b"signature".to_vec())
    }
}

#[tokio::test]
async fn test_signed_dist() {
    let (_dir, archive) = temp_archive(Default::default()).await;
    let archive = archive.with_signer(Arc::new(PrefixSigner));

    let outcome = upload(
        &archive,
        "stable",
        vec![package_entry("pkga", "1.0-1", &["amd64"])],
    )
    .await;

    let release = archive.store().get_release(&outcome.release_id).await.unwrap();
    let blobs = archive.store().blobs();

    let unsigned = blobs.read(&release.release_file.unwrap()).await.unwrap();
    let in_release = blobs.read(&release.in_release.unwrap()).await.unwrap();
    assert!(in_release.starts_with(b"signed\n"));
    assert!(in_release.ends_with(&unsigned));

    assert_eq!(
        b"signature".to_vec(),
        blobs.read(&release.release_gpg.unwrap()).await.unwrap()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_set_dist_races_gc() {
    let (_dir, archive) = temp_archive(Default::default()).await;
    upload(&archive, "stable", vec![package_entry("a", "1.0", &["amd64"])]).await;

    for i in 0..8 {
        let version = format!("2.{}", i);
        let detached = upload(
            &archive,
            "scratch",
            vec![package_entry("b", &version, &["amd64"])],
        )
        .await
        .release_id;
        archive.delete_dist("scratch").await.unwrap();

        let (set, gc) = tokio::join!(
            archive.set_dist("stable", &detached),
            archive.garbage_collect()
        );
        gc.unwrap();

        // Either the release was collected first, or it is intact
        match set {
            Ok(()) => {
                let (id, release) = archive.get_dist("stable").await.unwrap();
                assert_eq!(detached, id);
                let entries = read_index(
                    archive
                        .store()
                        .open_release_index(&id, &release)
                        .await
                        .unwrap(),
                )
                .await;
                assert!(entries.contains(&format!("b {}", version)));
            }
            Err(e) => assert!(e.is_not_found(), "{}", e),
        }
    }
}
