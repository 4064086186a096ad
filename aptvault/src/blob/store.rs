//! Local blob store.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::{self, AsyncRead, AsyncReadExt};

use super::{BlobId, BlobWriter, BLOB_ID_LEN};
use crate::error::{VaultError, VaultResult};

/// The default number of directory levels blobs are sharded into.
pub const DEFAULT_PREFIX_DEPTH: usize = 3;

/// Blob store configuration.
#[derive(Debug, Clone)]
pub struct BlobStoreConfig {
    /// The directory to store all blobs and references under.
    pub path: PathBuf,

    /// The directory to stage incoming blobs in.
    ///
    /// It must live on the same filesystem as `path` so that finished
    /// blobs can be hard-linked into place. Defaults to `{path}/tmp`.
    pub temp_path: Option<PathBuf>,

    /// Number of hex characters of the ID used for directory sharding.
    pub prefix_depth: usize,
}

/// Mapping from blob IDs to paths.
#[derive(Debug, Clone)]
pub(super) struct Layout {
    base: PathBuf,
    prefix_depth: usize,
}

/// A content-addressed blob store on the local filesystem.
#[derive(Debug)]
pub struct BlobStore {
    layout: Layout,
    temp_path: PathBuf,
}

impl BlobStoreConfig {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            temp_path: None,
            prefix_depth: DEFAULT_PREFIX_DEPTH,
        }
    }
}

impl Layout {
    /// Returns the shard directory and the full path of a blob.
    pub(super) fn blob_path(&self, id: &BlobId) -> (PathBuf, PathBuf) {
        let hex = id.to_hex();
        let mut dir = self.base.clone();
        for c in hex[..self.prefix_depth].chars() {
            dir.push(c.to_string());
        }

        let file = dir.join(&hex);
        (dir, file)
    }

    pub(super) fn base(&self) -> &Path {
        &self.base
    }
}

impl BlobStore {
    pub async fn new(config: BlobStoreConfig) -> VaultResult<Self> {
        let prefix_depth = config.prefix_depth.min(BLOB_ID_LEN * 2);
        let temp_path = config
            .temp_path
            .clone()
            .unwrap_or_else(|| config.path.join("tmp"));

        fs::create_dir_all(&config.path).await?;
        fs::create_dir_all(&temp_path).await?;

        // Make sure the canonical empty blob always exists
        let store = Self {
            layout: Layout {
                base: config.path,
                prefix_depth,
            },
            temp_path,
        };
        store.store_bytes(&[]).await?;

        Ok(store)
    }

    /// Returns the base directory of the store.
    pub fn path(&self) -> &Path {
        self.layout.base()
    }

    /// Returns the ID of the zero-length blob.
    pub fn empty_id(&self) -> BlobId {
        BlobId::empty()
    }

    /// Opens a writer for a new blob.
    pub async fn store(&self) -> VaultResult<BlobWriter> {
        let temp = tempfile::Builder::new()
            .prefix("blob")
            .tempfile_in(&self.temp_path)?;
        let (file, temp_path) = temp.into_parts();

        Ok(BlobWriter::new(
            File::from_std(file),
            temp_path,
            self.layout.clone(),
        ))
    }

    /// Stores a slice as a blob.
    pub async fn store_bytes(&self, data: &[u8]) -> VaultResult<BlobId> {
        let mut writer = self.store().await?;
        writer.write(data).await?;
        writer.close().await
    }

    /// Copies everything from a reader into a new blob.
    pub async fn copy_to_store<R>(&self, reader: &mut R) -> VaultResult<BlobId>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut writer = self.store().await?;
        io::copy(reader, &mut writer).await?;
        writer.close().await
    }

    /// Opens a blob for reading.
    pub async fn open(&self, id: &BlobId) -> VaultResult<File> {
        let (_, path) = self.layout.blob_path(id);
        File::open(&path).await.map_err(|e| not_found(e, id))
    }

    /// Reads a whole blob into memory.
    pub async fn read(&self, id: &BlobId) -> VaultResult<Vec<u8>> {
        let mut file = self.open(id).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    /// Returns the size of a blob in bytes.
    pub async fn size(&self, id: &BlobId) -> VaultResult<u64> {
        let (_, path) = self.layout.blob_path(id);
        let metadata = fs::metadata(&path).await.map_err(|e| not_found(e, id))?;
        Ok(metadata.len())
    }

    /// Returns whether a blob exists.
    pub async fn exists(&self, id: &BlobId) -> VaultResult<bool> {
        match self.size(id).await {
            Ok(_) => Ok(true),
            Err(VaultError::NoSuchBlob { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Hard-links a blob to additional locations outside the store.
    ///
    /// Parent directories are created as needed. A target that already
    /// is the same file is left alone, any other existing file is a
    /// conflict.
    pub async fn link<P: AsRef<Path>>(&self, id: &BlobId, targets: &[P]) -> VaultResult<()> {
        let (_, source) = self.layout.blob_path(id);

        for target in targets {
            let target = target.as_ref();
            if target.file_name().is_none() {
                return Err(VaultError::LinkConflict {
                    path: target.to_owned(),
                });
            }

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).await?;
            }

            match fs::hard_link(&source, target).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !same_file(&source, target).await? {
                        return Err(VaultError::LinkConflict {
                            path: target.to_owned(),
                        });
                    }
                }
                Err(e) => return Err(not_found(e, id)),
            }
        }

        Ok(())
    }

    /// Deletes a blob.
    ///
    /// Only the garbage collector should ever call this.
    pub async fn unlink(&self, id: &BlobId) -> VaultResult<()> {
        let (_, path) = self.layout.blob_path(id);
        fs::remove_file(&path).await.map_err(|e| not_found(e, id))
    }

    /// Calls a function for every blob in the store.
    ///
    /// Only the shard directories are visited, so references, the reflog
    /// and staged temporary files are never reported.
    pub async fn for_each<F>(&self, mut f: F) -> VaultResult<()>
    where
        F: FnMut(BlobId),
    {
        let mut pending = vec![(self.layout.base.clone(), 0usize)];

        while let Some((dir, depth)) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;

            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                let name = match name.to_str() {
                    Some(name) => name,
                    None => continue,
                };
                let file_type = entry.file_type().await?;

                if depth < self.layout.prefix_depth {
                    if file_type.is_dir() && is_shard_name(name) {
                        pending.push((entry.path(), depth + 1));
                    }
                } else if file_type.is_file() {
                    if let Ok(id) = BlobId::from_hex(name) {
                        f(id);
                    }
                }
            }
        }

        Ok(())
    }

    /// Returns the IDs of all blobs in the store.
    pub async fn list(&self) -> VaultResult<Vec<BlobId>> {
        let mut ids = Vec::new();
        self.for_each(|id| ids.push(id)).await?;
        Ok(ids)
    }
}

fn is_shard_name(name: &str) -> bool {
    name.len() == 1 && name.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

fn not_found(error: io::Error, id: &BlobId) -> VaultError {
    if error.kind() == ErrorKind::NotFound {
        VaultError::NoSuchBlob { id: *id }
    } else {
        error.into()
    }
}

#[cfg(unix)]
async fn same_file(a: &Path, b: &Path) -> VaultResult<bool> {
    use std::os::unix::fs::MetadataExt;

    let a = fs::metadata(a).await?;
    let b = fs::metadata(b).await?;
    Ok(a.dev() == b.dev() && a.ino() == b.ino())
}

#[cfg(not(unix))]
async fn same_file(a: &Path, b: &Path) -> VaultResult<bool> {
    Ok(fs::read(a).await? == fs::read(b).await?)
}
