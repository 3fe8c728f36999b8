use std::path::PathBuf;
use std::time::Duration;

use crate::error::{TransferError, TransferResult};

/// Size of each chunk moved in one read/write call
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Delimiter between the filename and filesize fields of the metadata frame
pub const SEPARATOR: &str = "<SEPARATOR>";

/// Byte the receiver writes back once the metadata frame is parsed
pub const ACK_BYTE: u8 = b'1';

/// Upper bound on filename + separator + filesize
pub const DEFAULT_MAX_METADATA_LEN: usize = 1024;

pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings shared by both ends of a transfer.
///
/// Built once and handed to each [`Sender`](crate::session::Sender) or
/// [`Receiver`](crate::session::Receiver), so independent sessions in one
/// process never share state.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub buffer_size: usize,
    pub separator: Vec<u8>,
    /// Directory incoming files are written into
    pub receive_dir: PathBuf,
    /// Exchange the single acknowledgment byte after the metadata frame.
    /// Must match on both ends.
    pub handshake: bool,
    /// Bound on connect, accept and every individual read/write
    pub io_timeout: Option<Duration>,
    pub max_metadata_len: usize,
    pub show_progress: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            separator: SEPARATOR.as_bytes().to_vec(),
            receive_dir: PathBuf::from("."),
            handshake: true,
            io_timeout: Some(DEFAULT_IO_TIMEOUT),
            max_metadata_len: DEFAULT_MAX_METADATA_LEN,
            show_progress: false,
        }
    }
}

impl TransferConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_receive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.receive_dir = dir.into();
        self
    }

    pub fn with_handshake(mut self, handshake: bool) -> Self {
        self.handshake = handshake;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_max_metadata_len(mut self, len: usize) -> Self {
        self.max_metadata_len = len;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Reject settings that would make the protocol unusable
    pub fn validate(&self) -> TransferResult<()> {
        if self.buffer_size == 0 {
            return Err(TransferError::Config("buffer size must be at least 1 byte".into()));
        }
        if self.separator.is_empty() {
            return Err(TransferError::Config("separator must not be empty".into()));
        }
        if self.max_metadata_len <= self.separator.len() {
            return Err(TransferError::Config(format!(
                "max metadata length {} leaves no room beside the {}-byte separator",
                self.max_metadata_len,
                self.separator.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TransferConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.separator, b"<SEPARATOR>");
        assert!(config.handshake);
    }

    #[test]
    fn test_rejects_zero_buffer() {
        let config = TransferConfig::new().with_buffer_size(0);
        assert!(matches!(config.validate(), Err(TransferError::Config(_))));
    }

    #[test]
    fn test_rejects_tiny_metadata_bound() {
        let config = TransferConfig::new().with_max_metadata_len(SEPARATOR.len());
        assert!(matches!(config.validate(), Err(TransferError::Config(_))));
    }
}
