//! Utilities for testing.
//!
//! Fixture content is derived from names only, so that the blobs of a
//! fixture entry can be stored at any time with [`store_entry`].

use tempfile::TempDir;

use crate::archive::{Archive, ArchiveConfig, ArchiveStore, MergeOutcome};
use crate::blob::{BlobId, BlobStore, BlobStoreConfig};
use crate::index::{
    entries_from_items, IndexEntry, IndexFile, IndexItem, ItemKind, UploadedItem,
    SOURCE_ARCHITECTURE,
};
use crate::version::DebianVersion;

/// Returns some fake data.
pub fn get_fake_data(len: usize) -> Vec<u8> {
    let mut state = 42u32;
    let mut data = vec![0u8; len];

    for (i, byte) in data.iter_mut().enumerate() {
        (state, _) = state.overflowing_mul(1664525u32);
        (state, _) = state.overflowing_add(1013904223u32);
        *byte = ((state >> (i % 24)) & 0xff) as u8;
    }

    data
}

/// Returns the content of a fixture file.
pub fn file_content(name: &str) -> Vec<u8> {
    format!("Contents of {}\n", name).into_bytes()
}

/// Returns the control paragraph of a fixture binary.
pub fn control_content(name: &str, version: &str, arch: &str) -> Vec<u8> {
    format!(
        "Package: {}\nVersion: {}\nArchitecture: {}\nMaintainer: Test <test@example.com>\nDescription: Test package {}\n",
        name, version, arch, name
    )
    .into_bytes()
}

fn fixture_file(name: String) -> IndexFile {
    let content = file_content(&name);

    IndexFile {
        id: BlobId::from_content(&content),
        size: content.len() as u64,
        name,
        hashes: Default::default(),
    }
}

fn parse_version(version: &str) -> DebianVersion {
    DebianVersion::parse(version).expect("Invalid fixture version")
}

/// Returns a source item with a `.dsc` file.
pub fn source_item(name: &str, version: &str) -> IndexItem {
    IndexItem {
        kind: ItemKind::Source,
        name: name.to_owned(),
        version: parse_version(version),
        component: "main".to_owned(),
        architecture: SOURCE_ARCHITECTURE.to_owned(),
        control_id: None,
        files: vec![fixture_file(format!("{}_{}.dsc", name, version))],
    }
}

/// Returns a binary item with a control paragraph and a `.deb` file.
pub fn binary_item(name: &str, version: &str, arch: &str) -> IndexItem {
    IndexItem {
        kind: ItemKind::Binary,
        name: name.to_owned(),
        version: parse_version(version),
        component: "main".to_owned(),
        architecture: arch.to_owned(),
        control_id: Some(BlobId::from_content(&control_content(name, version, arch))),
        files: vec![fixture_file(format!("{}_{}_{}.deb", name, version, arch))],
    }
}

/// Returns an entry with only a source item.
pub fn source_entry(name: &str, version: &str) -> IndexEntry {
    IndexEntry::new(source_item(name, version), vec![])
}

/// Returns the entry of a binary-only upload of a package built for
/// some architectures.
pub fn package_entry(name: &str, version: &str, archs: &[&str]) -> IndexEntry {
    let items = archs.iter().map(|arch| UploadedItem {
        source: name.to_owned(),
        item: binary_item(name, version, arch),
    });

    entries_from_items(items, None)
        .pop()
        .expect("No entry was produced")
}

/// Stores the blobs a fixture entry refers to.
pub async fn store_entry(store: &ArchiveStore, entry: &IndexEntry) {
    for item in entry.items() {
        if item.control_id.is_some() {
            let control = control_content(
                &item.name,
                &item.version.to_string(),
                &item.architecture,
            );
            store.blobs().store_bytes(&control).await.unwrap();
        }

        for file in &item.files {
            let id = store
                .blobs()
                .store_bytes(&file_content(&file.name))
                .await
                .unwrap();
            assert_eq!(file.id, id);
        }
    }
}

async fn temp_blob_store(dir: &TempDir) -> BlobStore {
    BlobStore::new(BlobStoreConfig::new(dir.path().join("store")))
        .await
        .expect("Could not create store")
}

/// Returns an archive store in a temporary directory.
pub async fn temp_archive_store() -> (TempDir, ArchiveStore) {
    let dir = tempfile::tempdir().expect("Could not create temporary directory");
    let store = ArchiveStore::new(temp_blob_store(&dir).await);
    (dir, store)
}

/// Returns an archive in a temporary directory.
///
/// The blob store lives under `store/`, leaving the rest of the
/// directory free for publishing.
pub async fn temp_archive(config: ArchiveConfig) -> (TempDir, Archive) {
    let dir = tempfile::tempdir().expect("Could not create temporary directory");
    let archive = Archive::open(temp_blob_store(&dir).await, config).expect("Could not open archive");
    (dir, archive)
}

/// Stores fixture entries and merges them into a distribution.
pub async fn upload(archive: &Archive, dist: &str, entries: Vec<IndexEntry>) -> MergeOutcome {
    for entry in &entries {
        store_entry(archive.store(), entry).await;
    }

    archive.merge_batch(dist, entries).await.unwrap()
}
