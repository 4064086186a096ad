//! Named references.
//!
//! A reference maps a hierarchical name like `heads/stable` to a blob ID.
//! It is stored as `{base}/refs/heads/stable.ref` containing the hex ID.
//! Every change is first appended to `{base}/reflog` and synced:
//!
//! ```text
//! Create:{ref path}:{new id}
//! Update:{ref path}:{new id}({old id})
//! Delete:{ref path}:({old id})
//! ```

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::{BlobId, BlobStore};
use crate::error::{VaultError, VaultResult};

const REF_SUFFIX: &str = ".ref";

/// A reference change recorded in the reflog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefChange {
    /// A new reference was created.
    Create { path: String, new: BlobId },

    /// An existing reference was repointed.
    Update {
        path: String,
        new: BlobId,
        old: String,
    },

    /// A reference was deleted.
    Delete { path: String, old: String },
}

impl RefChange {
    fn to_line(&self) -> String {
        match self {
            Self::Create { path, new } => format!("Create:{}:{}\n", path, new),
            Self::Update { path, new, old } => format!("Update:{}:{}({})\n", path, new, old),
            Self::Delete { path, old } => format!("Delete:{}:({})\n", path, old),
        }
    }

    fn from_line(line: &str) -> Option<Self> {
        let (kind, rest) = line.split_once(':')?;
        let (path, rest) = rest.rsplit_once(':')?;
        let path = path.to_owned();

        match kind {
            "Create" => Some(Self::Create {
                path,
                new: BlobId::from_hex(rest).ok()?,
            }),
            "Update" => {
                let (new, old) = rest.split_once('(')?;
                Some(Self::Update {
                    path,
                    new: BlobId::from_hex(new).ok()?,
                    old: old.strip_suffix(')')?.to_owned(),
                })
            }
            "Delete" => Some(Self::Delete {
                path,
                old: rest.strip_prefix('(')?.strip_suffix(')')?.to_owned(),
            }),
            _ => None,
        }
    }
}

impl BlobStore {
    fn refs_path(&self) -> PathBuf {
        self.path().join("refs")
    }

    fn reflog_path(&self) -> PathBuf {
        self.path().join("reflog")
    }

    fn ref_path(&self, name: &str) -> VaultResult<PathBuf> {
        validate_ref_name(name)?;
        Ok(self.refs_path().join(format!("{}{}", name, REF_SUFFIX)))
    }

    /// Points a reference at a blob.
    ///
    /// The change is logged and synced before the reference file is
    /// replaced.
    pub async fn set_ref(&self, name: &str, id: &BlobId) -> VaultResult<()> {
        let path = self.ref_path(name)?;
        let path_str = path.to_string_lossy().into_owned();

        let change = match fs::read_to_string(&path).await {
            Ok(old) => RefChange::Update {
                path: path_str,
                new: *id,
                old: old.trim().to_owned(),
            },
            Err(e) if e.kind() == ErrorKind::NotFound => RefChange::Create {
                path: path_str,
                new: *id,
            },
            Err(e) => return Err(e.into()),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        self.append_reflog(&change).await?;

        let staging = path.with_extension("ref.new");
        fs::write(&staging, id.to_hex()).await?;
        fs::rename(&staging, &path).await?;

        Ok(())
    }

    /// Returns the blob a reference points at.
    pub async fn get_ref(&self, name: &str) -> VaultResult<BlobId> {
        let path = self.ref_path(name)?;

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(VaultError::NoSuchRef {
                    name: name.to_owned(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        BlobId::from_hex(content.trim())
    }

    /// Deletes a reference.
    pub async fn delete_ref(&self, name: &str) -> VaultResult<()> {
        let path = self.ref_path(name)?;

        let old = match fs::read_to_string(&path).await {
            Ok(old) => old,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(VaultError::NoSuchRef {
                    name: name.to_owned(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        self.append_reflog(&RefChange::Delete {
            path: path.to_string_lossy().into_owned(),
            old: old.trim().to_owned(),
        })
        .await?;

        fs::remove_file(&path).await?;
        Ok(())
    }

    /// Returns all references by name.
    pub async fn list_refs(&self) -> VaultResult<BTreeMap<String, BlobId>> {
        let mut refs = BTreeMap::new();
        let refs_path = self.refs_path();
        let mut pending = vec![(refs_path, String::new())];

        while let Some((dir, prefix)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let file_name = entry.file_name();
                let file_name = match file_name.to_str() {
                    Some(name) => name.to_owned(),
                    None => continue,
                };

                if entry.file_type().await?.is_dir() {
                    pending.push((entry.path(), format!("{}{}/", prefix, file_name)));
                    continue;
                }

                let name = match file_name.strip_suffix(REF_SUFFIX) {
                    Some(name) => format!("{}{}", prefix, name),
                    None => continue,
                };

                match self.get_ref(&name).await {
                    Ok(id) => {
                        refs.insert(name, id);
                    }
                    Err(e) => {
                        tracing::warn!("Skipping unreadable reference {}: {}", name, e);
                    }
                }
            }
        }

        Ok(refs)
    }

    /// Reads back the reference change log.
    pub async fn read_reflog(&self) -> VaultResult<Vec<RefChange>> {
        let content = match fs::read_to_string(self.reflog_path()).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(content.lines().filter_map(RefChange::from_line).collect())
    }

    async fn append_reflog(&self, change: &RefChange) -> VaultResult<()> {
        let mut reflog = OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.reflog_path())
            .await?;

        reflog.write_all(change.to_line().as_bytes()).await?;
        reflog.sync_all().await?;

        Ok(())
    }
}

fn validate_ref_name(name: &str) -> VaultResult<()> {
    let reason = if name.is_empty() {
        Some("Reference name is empty")
    } else if name.starts_with('/') || name.ends_with('/') {
        Some("Reference name cannot start or end with /")
    } else if name
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        Some("Reference name contains an invalid path segment")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(VaultError::InvalidRefName {
            name: name.to_owned(),
            reason,
        }),
        None => Ok(()),
    }
}
