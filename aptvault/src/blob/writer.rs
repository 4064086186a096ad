use std::io::ErrorKind;
use std::pin::Pin;
use std::task::{Context, Poll};

use sha2::{Digest, Sha256};
use tempfile::TempPath;
use tokio::fs::{self, File};
use tokio::io::{self, AsyncWrite, AsyncWriteExt};

use super::store::Layout;
use super::BlobId;
use crate::error::{VaultError, VaultResult};

/// Writer for a new blob that hashes the bytes as they are written.
///
/// Data is staged in a temporary file. The blob only becomes visible in
/// the store once [`BlobWriter::close`] has synced the file and linked it
/// to its content-derived path. A writer dropped before closing leaves
/// nothing behind.
pub struct BlobWriter {
    file: Option<File>,
    temp_path: Option<TempPath>,
    digest: Option<Sha256>,
    bytes_written: u64,
    layout: Layout,
    identity: Option<BlobId>,
}

impl BlobWriter {
    pub(super) fn new(file: File, temp_path: TempPath, layout: Layout) -> Self {
        Self {
            file: Some(file),
            temp_path: Some(temp_path),
            digest: Some(Sha256::new()),
            bytes_written: 0,
            layout,
            identity: None,
        }
    }

    /// Writes a slice into the blob.
    pub async fn write(&mut self, buf: &[u8]) -> VaultResult<()> {
        if self.file.is_none() {
            return Err(VaultError::WriteAfterClose);
        }

        AsyncWriteExt::write_all(self, buf).await?;
        Ok(())
    }

    /// Finalizes the blob and returns its ID.
    ///
    /// If a blob with the same content already exists, the staged copy is
    /// discarded.
    pub async fn close(&mut self) -> VaultResult<BlobId> {
        let mut file = self.file.take().ok_or(VaultError::WriteAfterClose)?;
        let digest = self.digest.take().ok_or(VaultError::WriteAfterClose)?;
        let temp_path = self.temp_path.take().ok_or(VaultError::WriteAfterClose)?;

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let id = BlobId::from_digest(digest);
        let (dir, path) = self.layout.blob_path(&id);

        fs::create_dir_all(&dir).await?;

        match fs::hard_link(&temp_path, &path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tracing::trace!("Blob {} already exists", id);
            }
            Err(e) => return Err(e.into()),
        }

        // Removes the staged file
        drop(temp_path);

        self.identity = Some(id);
        Ok(id)
    }

    /// Returns the ID of the blob.
    ///
    /// Only valid once the writer has been closed.
    pub fn identity(&self) -> VaultResult<BlobId> {
        self.identity.ok_or(VaultError::IdentityBeforeClose)
    }

    /// Returns the number of bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl AsyncWrite for BlobWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;

        let file = match this.file.as_mut() {
            Some(file) => file,
            None => {
                return Poll::Ready(Err(io::Error::new(
                    ErrorKind::Other,
                    VaultError::WriteAfterClose,
                )))
            }
        };

        let r = Pin::new(file).poll_write(cx, buf);

        if let Poll::Ready(Ok(written)) = r {
            if let Some(digest) = this.digest.as_mut() {
                digest.update(&buf[..written]);
            }
            this.bytes_written += written as u64;
        }

        r
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.file.as_mut() {
            Some(file) => Pin::new(file).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.file.as_mut() {
            Some(file) => Pin::new(file).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}
