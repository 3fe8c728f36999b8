use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::fs::{self as async_fs, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{TransferError, TransferResult};
use crate::protocol::{find_separator, TransferMetadata};

/// Describe a file for the metadata frame. The basename must not contain
/// `separator`, or the receiver would split the frame in the wrong place.
pub async fn get_file_metadata(path: &Path, separator: &[u8]) -> TransferResult<TransferMetadata> {
    let metadata = async_fs::metadata(path).await?;
    if !metadata.is_file() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} is not a regular file", path.display()),
        )
        .into());
    }

    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} has no UTF-8 file name", path.display()),
            )
        })?;

    if find_separator(name.as_bytes(), separator).is_some() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("file name {:?} contains the metadata separator", name),
        )
        .into());
    }

    TransferMetadata::new(name, metadata.len()).map_err(|e| {
        TransferError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))
    })
}

/// Create the receive directory if it is missing
pub async fn ensure_directory(path: &Path) -> TransferResult<()> {
    async_fs::create_dir_all(path).await?;
    Ok(())
}

/// Reads a file in fixed-size chunks, never past the size declared up front
pub struct FileChunker {
    file: File,
    buffer: Vec<u8>,
    total_size: u64,
    bytes_read: u64,
    hasher: Sha256,
}

impl FileChunker {
    /// Open `path` for streaming exactly `total_size` bytes
    pub async fn open(path: &Path, total_size: u64, chunk_size: usize) -> TransferResult<Self> {
        let file = File::open(path).await?;

        Ok(Self {
            file,
            buffer: vec![0u8; chunk_size],
            total_size,
            bytes_read: 0,
            hasher: Sha256::new(),
        })
    }

    /// Read the next chunk, `None` once `total_size` bytes were produced
    pub async fn next_chunk(&mut self) -> TransferResult<Option<&[u8]>> {
        let remaining = self.total_size - self.bytes_read;
        if remaining == 0 {
            return Ok(None);
        }

        let want = self.buffer
            .len()
            .min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = self.file.read(&mut self.buffer[..want]).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "file ended after {} of {} declared bytes",
                    self.bytes_read, self.total_size
                ),
            )
            .into());
        }

        self.bytes_read += n as u64;
        self.hasher.update(&self.buffer[..n]);
        Ok(Some(&self.buffer[..n]))
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Hex SHA-256 of everything read so far
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

const STAGING_PREFIX: &str = ".sepcast-";

/// Writes incoming chunks to a staging file next to the destination.
///
/// The staging file is renamed over the destination only by
/// [`finalize`](Self::finalize); dropping the writer deletes it.
pub struct FileWriter {
    staging: NamedTempFile,
    file: File,
    destination: PathBuf,
    bytes_written: u64,
    expected_size: u64,
    hasher: Sha256,
}

impl FileWriter {
    /// Create an exclusive staging file for `destination`
    pub fn create(destination: &Path, expected_size: u64) -> TransferResult<Self> {
        let dir = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        // Fixed prefix: a name-derived one overflows NAME_MAX for long basenames
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(".part")
            .tempfile_in(dir)?;
        let file = File::from_std(staging.as_file().try_clone()?);

        Ok(Self {
            staging,
            file,
            destination: destination.to_path_buf(),
            bytes_written: 0,
            expected_size,
            hasher: Sha256::new(),
        })
    }

    pub async fn write_chunk(&mut self, data: &[u8]) -> TransferResult<()> {
        self.file.write_all(data).await?;
        self.hasher.update(data);
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_written >= self.expected_size
    }

    /// Sync and move the staging file into place, replacing any existing
    /// file. Returns the destination and the hex SHA-256 of the content.
    pub async fn finalize(mut self) -> TransferResult<(PathBuf, String)> {
        if !self.is_complete() {
            return Err(TransferError::IncompleteTransfer {
                received: self.bytes_written,
                expected: self.expected_size,
            });
        }

        self.file.flush().await?;
        self.file.sync_all().await?;
        drop(self.file);

        self.staging
            .persist(&self.destination)
            .map_err(|e| TransferError::Io(e.error))?;

        Ok((self.destination, hex::encode(self.hasher.finalize())))
    }
}
