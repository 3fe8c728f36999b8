//! Metadata frame encoding and parsing.
//!
//! ```text
//! Frame 1: <basename> <separator> <decimal filesize>   (no length prefix, no terminator)
//! Frame 2: <filesize raw bytes>
//! ```
//!
//! The frame has no explicit end, so the receiver scans the bytes it has
//! accumulated so far. The filesize field is the run of ASCII digits right
//! after the first separator; whatever follows it already belongs to the body.

use crate::error::{TransferError, TransferResult};

/// Width of `u64::MAX` in decimal
pub const MAX_FILESIZE_DIGITS: usize = 20;

/// What the sender declares about the file before the body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMetadata {
    pub filename: String,
    pub filesize: u64,
}

impl TransferMetadata {
    /// Build metadata, reducing `filename` to its basename
    pub fn new(filename: &str, filesize: u64) -> TransferResult<Self> {
        Ok(Self {
            filename: sanitize_filename(filename)?,
            filesize,
        })
    }

    /// Serialize as `filename + separator + filesize`
    pub fn encode(&self, separator: &[u8]) -> Vec<u8> {
        let size = self.filesize.to_string();
        let mut frame = Vec::with_capacity(self.filename.len() + separator.len() + size.len());
        frame.extend_from_slice(self.filename.as_bytes());
        frame.extend_from_slice(separator);
        frame.extend_from_slice(size.as_bytes());
        frame
    }
}

/// Strip every directory segment so a peer cannot write outside the
/// receive directory. Both `/` and `\` count as separators.
pub fn sanitize_filename(raw: &str) -> TransferResult<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();

    if base.is_empty() || base == "." || base == ".." {
        return Err(TransferError::MalformedMetadata(format!(
            "filename {:?} has no usable basename",
            raw
        )));
    }
    if base.contains('\0') {
        return Err(TransferError::MalformedMetadata("filename contains a NUL byte".into()));
    }

    Ok(base.to_string())
}

/// Index of the first occurrence of `needle` in `haystack`
pub fn find_separator(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Result of scanning the bytes accumulated so far
#[derive(Debug, PartialEq, Eq)]
pub enum FrameScan {
    /// Keep reading
    Incomplete,
    /// Separator and at least one filesize digit are present, but the digit
    /// run reaches the end of the bytes so far and may continue
    SizeUnterminated,
    /// Metadata is final; `buf[body_start..]` is body already received
    Complete {
        metadata: TransferMetadata,
        body_start: usize,
    },
}

/// Incremental parser for the metadata frame
#[derive(Debug, Clone)]
pub struct FrameParser {
    separator: Vec<u8>,
    max_len: usize,
    handshake: bool,
}

impl FrameParser {
    pub fn new(separator: &[u8], max_len: usize, handshake: bool) -> Self {
        Self {
            separator: separator.to_vec(),
            max_len,
            handshake,
        }
    }

    /// Scan the accumulated bytes. `sealed` is true once no more frame bytes
    /// can arrive: the peer closed, or it is waiting for our acknowledgement
    /// and nothing further is buffered.
    pub fn scan(&self, buf: &[u8], sealed: bool) -> TransferResult<FrameScan> {
        let Some(pos) = find_separator(buf, &self.separator) else {
            if buf.len() > self.max_len {
                return Err(TransferError::MalformedMetadata(format!(
                    "no separator within the first {} bytes",
                    self.max_len
                )));
            }
            if sealed {
                return Err(TransferError::MalformedMetadata(
                    "connection closed before the separator arrived".into(),
                ));
            }
            return Ok(FrameScan::Incomplete);
        };

        let size_start = pos + self.separator.len();
        if size_start > self.max_len {
            return Err(TransferError::MalformedMetadata(format!(
                "filename field longer than {} bytes",
                self.max_len
            )));
        }

        let rest = &buf[size_start..];
        let digits = rest
            .iter()
            .take(MAX_FILESIZE_DIGITS)
            .take_while(|b| b.is_ascii_digit())
            .count();

        if digits == 0 {
            if rest.is_empty() && !sealed {
                return Ok(FrameScan::Incomplete);
            }
            return Err(TransferError::MalformedMetadata(
                "filesize is not a non-negative integer".into(),
            ));
        }

        if !sealed && digits == rest.len() && digits < MAX_FILESIZE_DIGITS {
            return Ok(FrameScan::SizeUnterminated);
        }

        let body_start = size_start + digits;
        if body_start > self.max_len {
            return Err(TransferError::MalformedMetadata(format!(
                "metadata frame longer than {} bytes",
                self.max_len
            )));
        }
        if self.handshake && body_start < buf.len() {
            return Err(TransferError::MalformedMetadata(
                "unexpected bytes after metadata before acknowledgement".into(),
            ));
        }

        let name = std::str::from_utf8(&buf[..pos]).map_err(|e| {
            TransferError::MalformedMetadata(format!("filename is not valid UTF-8: {}", e))
        })?;
        // Digits only, so this fails on overflow alone
        let filesize = std::str::from_utf8(&rest[..digits])
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| {
                TransferError::MalformedMetadata("filesize does not fit in 64 bits".into())
            })?;

        Ok(FrameScan::Complete {
            metadata: TransferMetadata::new(name, filesize)?,
            body_start,
        })
    }
}
