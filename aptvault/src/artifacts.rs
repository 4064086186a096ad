//! Package lists and release metadata.
//!
//! For every component and architecture of a release, a `Packages` list
//! and its gzip-compressed form are generated from the control paragraphs
//! of the binary items in the index. Architecture `all` packages get a
//! list of their own and are also folded into every other architecture of
//! their component.
//!
//! The lists are summarized in an unsigned `Release` file. If a
//! [`ReleaseSigner`] is available, the signed `InRelease` and
//! `Release.gpg` forms are generated as well.

use std::collections::{BTreeMap, BTreeSet};

use async_compression::tokio::write::GzipEncoder;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

use crate::archive::ArchiveStore;
use crate::blob::{BlobId, BlobStore, BlobWriter};
use crate::error::VaultResult;
use crate::index::{IndexEntry, IndexItem, ALL_ARCHITECTURE};
use crate::release::{ArchitectureFiles, Component, PoolLayout, Release};

/// Value of the `Origin` and `Label` fields.
const ORIGIN: &str = "aptvault";

/// Signs release metadata.
///
/// Implementations typically wrap an OpenPGP key.
pub trait ReleaseSigner: Send + Sync {
    /// Returns the clear-signed `InRelease` form of a `Release` file.
    fn clearsign(&self, release: &[u8]) -> VaultResult<Vec<u8>>;

    /// Returns the detached `Release.gpg` signature of a `Release` file.
    fn detach_sign(&self, release: &[u8]) -> VaultResult<Vec<u8>>;
}

/// A `Packages` list being written in both forms.
struct PackageList {
    plain: BlobWriter,
    gzip: GzipEncoder<BlobWriter>,
}

/// A finished `Packages` list.
struct ListDigest {
    packages: BlobId,
    packages_size: u64,
    packages_gz: BlobId,
    packages_gz_size: u64,
}

impl PackageList {
    async fn new(store: &BlobStore) -> VaultResult<Self> {
        Ok(Self {
            plain: store.store().await?,
            gzip: GzipEncoder::new(store.store().await?),
        })
    }

    async fn write(&mut self, stanza: &[u8]) -> VaultResult<()> {
        self.plain.write(stanza).await?;
        self.gzip.write_all(stanza).await?;
        Ok(())
    }

    async fn finish(mut self) -> VaultResult<ListDigest> {
        let packages = self.plain.close().await?;

        self.gzip.shutdown().await?;
        let mut gzip = self.gzip.into_inner();
        let packages_gz = gzip.close().await?;

        Ok(ListDigest {
            packages,
            packages_size: self.plain.bytes_written(),
            packages_gz,
            packages_gz_size: gzip.bytes_written(),
        })
    }
}

/// Generates the package lists and release metadata of a release.
///
/// The release's `index_id` must be set. Its `components`,
/// `release_file`, `in_release` and `release_gpg` are replaced.
#[instrument(skip_all, fields(code_name = %release.code_name))]
pub async fn generate_artifacts(
    store: &ArchiveStore,
    release: &mut Release,
    signer: Option<&dyn ReleaseSigner>,
) -> VaultResult<()> {
    // First pass: find the architectures of each component
    let mut layout: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut index = store.open_index(&release.index_id).await?;
    while let Some(entry) = index.next_entry().await? {
        for item in &entry.binaries {
            layout
                .entry(item.component.clone())
                .or_default()
                .insert(item.architecture.clone());
        }
    }

    let mut lists: BTreeMap<(String, String), PackageList> = BTreeMap::new();
    for (component, architectures) in &layout {
        for arch in architectures {
            lists.insert(
                (component.clone(), arch.clone()),
                PackageList::new(store.blobs()).await?,
            );
        }
    }

    // Second pass: write the lists
    let pool = release.pool_layout()?;
    let mut index = store.open_index(&release.index_id).await?;
    while let Some(entry) = index.next_entry().await? {
        for item in &entry.binaries {
            let stanza = match package_stanza(store, &pool, &entry, item).await? {
                Some(stanza) => stanza,
                None => continue,
            };

            let mut targets = vec![item.architecture.as_str()];
            if item.architecture == ALL_ARCHITECTURE {
                if let Some(architectures) = layout.get(&item.component) {
                    targets.extend(
                        architectures
                            .iter()
                            .map(String::as_str)
                            .filter(|arch| *arch != ALL_ARCHITECTURE),
                    );
                }
            }

            for arch in targets {
                if let Some(list) = lists.get_mut(&(item.component.clone(), arch.to_owned())) {
                    list.write(stanza.as_bytes()).await?;
                }
            }
        }
    }

    let mut components: Vec<Component> = Vec::new();
    let mut checksums = Vec::new();

    for ((component, arch), list) in lists {
        let digest = list.finish().await?;

        checksums.push(format!(
            " {} {} {}/binary-{}/Packages",
            digest.packages, digest.packages_size, component, arch
        ));
        checksums.push(format!(
            " {} {} {}/binary-{}/Packages.gz",
            digest.packages_gz, digest.packages_gz_size, component, arch
        ));

        let files = ArchitectureFiles {
            name: arch,
            packages: digest.packages,
            packages_gz: digest.packages_gz,
        };

        match components.last_mut() {
            Some(last) if last.name == component => last.architectures.push(files),
            _ => components.push(Component {
                name: component,
                architectures: vec![files],
            }),
        }
    }

    let mut architectures: BTreeSet<&str> = layout
        .values()
        .flat_map(|archs| archs.iter().map(String::as_str))
        .collect();
    architectures.insert(ALL_ARCHITECTURE);

    let component_names: Vec<&str> = layout.keys().map(String::as_str).collect();

    let mut text = String::new();
    push_field(&mut text, "Origin", ORIGIN);
    push_field(&mut text, "Label", ORIGIN);
    push_field(&mut text, "Suite", &release.suite);
    push_field(&mut text, "Codename", &release.code_name);
    if !release.version.is_empty() {
        push_field(&mut text, "Version", &release.version);
    }
    push_field(
        &mut text,
        "Date",
        &release.date.format("%a, %d %b %Y %H:%M:%S UTC").to_string(),
    );
    push_field(
        &mut text,
        "Architectures",
        &architectures.into_iter().collect::<Vec<_>>().join(" "),
    );
    push_field(&mut text, "Components", &component_names.join(" "));
    if !release.description.is_empty() {
        push_field(&mut text, "Description", &release.description);
    }
    text.push_str("SHA256:\n");
    for line in checksums {
        text.push_str(&line);
        text.push('\n');
    }

    let release_file = store.blobs().store_bytes(text.as_bytes()).await?;

    let (in_release, release_gpg) = match signer {
        Some(signer) => {
            let in_release = store
                .blobs()
                .store_bytes(&signer.clearsign(text.as_bytes())?)
                .await?;
            let release_gpg = store
                .blobs()
                .store_bytes(&signer.detach_sign(text.as_bytes())?)
                .await?;
            (Some(in_release), Some(release_gpg))
        }
        None => (None, None),
    };

    tracing::debug!(
        "Generated {} package lists, Release file {}",
        components.iter().map(|c| c.architectures.len()).sum::<usize>(),
        release_file
    );

    release.components = components;
    release.release_file = Some(release_file);
    release.in_release = in_release;
    release.release_gpg = release_gpg;

    Ok(())
}

/// Returns the `Packages` stanza of a binary item.
async fn package_stanza(
    store: &ArchiveStore,
    pool: &PoolLayout,
    entry: &IndexEntry,
    item: &IndexItem,
) -> VaultResult<Option<String>> {
    let file = match item.files.first() {
        Some(file) => file,
        None => {
            tracing::warn!(
                "Binary {} {} of {} has no files, skipping",
                item.name,
                item.version,
                entry.describe()
            );
            return Ok(None);
        }
    };

    let mut stanza = match item.control_id {
        Some(id) => {
            let control = store.blobs().read(&id).await?;
            String::from_utf8_lossy(&control).trim_end().to_owned()
        }
        None => format!(
            "Package: {}\nVersion: {}\nArchitecture: {}",
            item.name, item.version, item.architecture
        ),
    };

    stanza.push_str(&format!(
        "\nFilename: {}{}\nSize: {}\nSHA256: {}\n\n",
        pool.dir(&entry.name, &entry.version),
        file.name,
        file.size,
        file.id
    ));

    Ok(Some(stanza))
}

fn push_field(text: &mut String, name: &str, value: &str) {
    text.push_str(name);
    text.push(':');
    if !value.is_empty() {
        text.push(' ');
        text.push_str(value);
    }
    text.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_compression::tokio::bufread::GzipDecoder;
    use tokio::io::{AsyncReadExt, BufReader};

    use crate::error::VaultError;
    use crate::testing::{package_entry, store_entry, temp_archive_store};

    struct FakeSigner;

    impl ReleaseSigner for FakeSigner {
        fn clearsign(&self, release: &[u8]) -> VaultResult<Vec<u8>> {
            let mut signed = b"-----BEGIN PGP SIGNED MESSAGE-----\n\n".to_vec();
            signed.extend_from_slice(release);
            Ok(signed)
        }

        fn detach_sign(&self, _release: &[u8]) -> VaultResult<Vec<u8>> {
            Ok(b"signature".to_vec())
        }
    }

    struct BrokenSigner;

    impl ReleaseSigner for BrokenSigner {
        fn clearsign(&self, _release: &[u8]) -> VaultResult<Vec<u8>> {
            Err(VaultError::SigningError {
                error: "no secret key".into(),
            })
        }

        fn detach_sign(&self, _release: &[u8]) -> VaultResult<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    async fn release_with(store: &ArchiveStore, entries: &[IndexEntry]) -> Release {
        let mut writer = store.add_index().await.unwrap();
        for entry in entries {
            store_entry(store, entry).await;
            writer.add_entry(entry).await.unwrap();
        }
        let index_id = writer.close().await.unwrap();

        let mut release = Release::seed("stable", "stable", "lib[a-z]|[a-z]");
        release.index_id = index_id;
        release
    }

    async fn read_string(store: &ArchiveStore, id: &BlobId) -> String {
        String::from_utf8(store.blobs().read(id).await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_package_lists() {
        let (_dir, store) = temp_archive_store().await;
        let mut release = release_with(
            &store,
            &[
                package_entry("hello", "1.0-1", &["amd64", "all"]),
                package_entry("libworld", "2.0", &["arm64"]),
            ],
        )
        .await;

        generate_artifacts(&store, &mut release, None).await.unwrap();

        assert_eq!(1, release.components.len());
        let main = &release.components[0];
        assert_eq!("main", main.name);

        let archs: Vec<&str> = main.architectures.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(vec!["all", "amd64", "arm64"], archs);

        let amd64 = read_string(&store, &main.architectures[1].packages).await;
        assert!(amd64.contains("Package: hello\nVersion: 1.0-1\nArchitecture: amd64\n"));
        assert!(amd64.contains("Architecture: all\n"));
        assert!(amd64.contains("Filename: pool/stable/h/hello/1.0-1/hello_1.0-1_amd64.deb\n"));
        assert!(!amd64.contains("libworld"));

        let arm64 = read_string(&store, &main.architectures[2].packages).await;
        assert!(arm64.contains("Filename: pool/stable/libw/libworld/2.0/libworld_2.0_arm64.deb\n"));
        assert!(arm64.contains("Architecture: all\n"));

        let all = read_string(&store, &main.architectures[0].packages).await;
        assert!(!all.contains("Architecture: amd64"));

        // The compressed list has the same content
        let gz = store
            .blobs()
            .read(&main.architectures[1].packages_gz)
            .await
            .unwrap();
        let mut decoder = GzipDecoder::new(BufReader::new(gz.as_slice()));
        let mut decompressed = String::new();
        decoder.read_to_string(&mut decompressed).await.unwrap();
        assert_eq!(amd64, decompressed);

        let release_file = read_string(&store, &release.release_file.unwrap()).await;
        assert!(release_file.contains("Codename: stable\n"));
        assert!(release_file.contains("Architectures: all amd64 arm64\n"));
        assert!(release_file.contains("Components: main\n"));
        assert!(release_file.contains(&format!(
            " {} {} main/binary-amd64/Packages\n",
            main.architectures[1].packages,
            amd64.len()
        )));
        assert!(release.in_release.is_none());
        assert!(release.release_gpg.is_none());
    }

    #[tokio::test]
    async fn test_empty_index() {
        let (_dir, store) = temp_archive_store().await;
        let mut release = release_with(&store, &[]).await;

        generate_artifacts(&store, &mut release, None).await.unwrap();

        assert!(release.components.is_empty());
        let release_file = read_string(&store, &release.release_file.unwrap()).await;
        assert!(release_file.contains("Architectures: all\n"));
        assert!(release_file.contains("Components:\n"));
    }

    #[tokio::test]
    async fn test_signed_release() {
        let (_dir, store) = temp_archive_store().await;
        let mut release =
            release_with(&store, &[package_entry("hello", "1.0-1", &["amd64"])]).await;

        generate_artifacts(&store, &mut release, Some(&FakeSigner))
            .await
            .unwrap();

        let release_file = read_string(&store, &release.release_file.unwrap()).await;
        let in_release = read_string(&store, &release.in_release.unwrap()).await;
        assert!(in_release.starts_with("-----BEGIN PGP SIGNED MESSAGE-----"));
        assert!(in_release.ends_with(&release_file));
        assert_eq!(
            "signature",
            read_string(&store, &release.release_gpg.unwrap()).await
        );

        let mut release =
            release_with(&store, &[package_entry("hello", "1.0-1", &["amd64"])]).await;
        let result = generate_artifacts(&store, &mut release, Some(&BrokenSigner)).await;
        assert!(matches!(result, Err(VaultError::SigningError { .. })));
    }
}
