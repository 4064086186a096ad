//! Index stream encoding.
//!
//! Each record is a big-endian `u32` length followed by that many bytes of
//! JSON. An index with no entries is the empty blob.

use std::io::ErrorKind;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};

use super::IndexEntry;
use crate::blob::{BlobId, BlobWriter};
use crate::error::{VaultError, VaultResult};

/// Records larger than this are assumed to be corrupt.
const MAX_RECORD_LEN: u32 = 64 * 1024 * 1024;

/// Writes an index one entry at a time.
pub struct IndexWriter {
    writer: BlobWriter,
    entries: usize,
}

/// Reads an index one entry at a time.
///
/// The reader is forward-only. Reopen the index to start over.
pub struct IndexReader {
    id: BlobId,
    reader: BufReader<File>,
    entries: usize,
}

impl IndexWriter {
    pub(crate) fn new(writer: BlobWriter) -> Self {
        Self { writer, entries: 0 }
    }

    /// Appends an entry.
    ///
    /// Entries must be added in index order.
    pub async fn add_entry(&mut self, entry: &IndexEntry) -> VaultResult<()> {
        let record = serde_json::to_vec(entry)?;
        let len = u32::try_from(record.len())
            .ok()
            .filter(|len| *len <= MAX_RECORD_LEN)
            .ok_or_else(|| {
                VaultError::IoError {
                    error: std::io::Error::new(
                        ErrorKind::InvalidData,
                        format!("Index entry for {} is too large", entry.describe()),
                    ),
                }
            })?;

        self.writer.write(&len.to_be_bytes()).await?;
        self.writer.write(&record).await?;
        self.entries += 1;

        Ok(())
    }

    /// Returns the number of entries written so far.
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Finalizes the index and returns its ID.
    pub async fn close(mut self) -> VaultResult<BlobId> {
        self.writer.close().await
    }
}

impl IndexReader {
    pub(crate) fn new(id: BlobId, file: File) -> Self {
        Self {
            id,
            reader: BufReader::new(file),
            entries: 0,
        }
    }

    /// Returns the ID of the index being read.
    pub fn id(&self) -> BlobId {
        self.id
    }

    /// Returns the next entry, or `None` at the end of the index.
    pub async fn next_entry(&mut self) -> VaultResult<Option<IndexEntry>> {
        let mut len_buf = [0u8; 4];
        let mut filled = 0;

        while filled < len_buf.len() {
            let read = self.reader.read(&mut len_buf[filled..]).await?;
            if read == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(self.corrupt("Truncated record length"));
            }
            filled += read;
        }

        let len = u32::from_be_bytes(len_buf);
        if len > MAX_RECORD_LEN {
            return Err(self.corrupt(format!("Record of {} bytes is too large", len)));
        }

        let mut record = vec![0u8; len as usize];
        match self.reader.read_exact(&mut record).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(self.corrupt("Truncated record"));
            }
            Err(e) => return Err(e.into()),
        }

        let entry = serde_json::from_slice(&record)
            .map_err(|e| self.corrupt(format!("Entry {}: {}", self.entries, e)))?;
        self.entries += 1;

        Ok(Some(entry))
    }

    /// Reads all remaining entries into memory.
    pub async fn read_all(mut self) -> VaultResult<Vec<IndexEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next_entry().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    fn corrupt(&self, reason: impl Into<String>) -> VaultError {
        VaultError::CorruptIndex {
            id: self.id,
            reason: reason.into(),
        }
    }
}
