use thiserror::Error;

/// Every way a transfer can fail. All of them are terminal for the
/// transfer in progress; nothing is retried.
#[derive(Error, Debug)]
pub enum TransferError {
    /// Connect, bind or accept failed, or a peer stayed silent too long
    #[error("connection error: {0}")]
    Connection(String),

    /// Local filesystem access failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Separator missing, frame too long, or filesize not a non-negative integer
    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),

    #[error("incomplete transfer: received {received} of {expected} bytes")]
    IncompleteTransfer { received: u64, expected: u64 },

    #[error("acknowledgement error: {0}")]
    Acknowledgement(String),

    /// Writing to the socket failed mid-transfer
    #[error("transmission error: {0}")]
    Transmission(#[source] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TransferError {
    /// Process exit status for this failure kind
    pub fn exit_code(&self) -> i32 {
        match self {
            TransferError::Connection(_) => 2,
            TransferError::Io(_) => 3,
            TransferError::MalformedMetadata(_) => 4,
            TransferError::IncompleteTransfer { .. } => 5,
            TransferError::Acknowledgement(_) => 6,
            TransferError::Transmission(_) => 7,
            TransferError::Config(_) => 64,
        }
    }
}

pub type TransferResult<T> = std::result::Result<T, TransferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_and_nonzero() {
        let errors = [
            TransferError::Connection("refused".into()),
            TransferError::Io(std::io::Error::other("disk")),
            TransferError::MalformedMetadata("bad".into()),
            TransferError::IncompleteTransfer { received: 1, expected: 2 },
            TransferError::Acknowledgement("none".into()),
            TransferError::Transmission(std::io::Error::other("pipe")),
            TransferError::Config("zero".into()),
        ];

        let mut codes: Vec<i32> = errors.iter().map(TransferError::exit_code).collect();
        assert!(codes.iter().all(|&c| c != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_incomplete_message() {
        let err = TransferError::IncompleteTransfer { received: 10, expected: 100 };
        assert_eq!(err.to_string(), "incomplete transfer: received 10 of 100 bytes");
    }
}
