use std::{io, path::PathBuf, time::Duration};

use reqwest::StatusCode;
use thiserror::Error;

/// Outward error of a transfer. Every failed `download` ends in exactly one of these.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("invalid transfer request: {0}")]
    InvalidInput(String),

    #[error("size unavailable, chunked download is not possible for this source: {0}")]
    SizeUnavailable(String),

    #[error("segment {index} failed: {cause}")]
    SegmentFailed {
        index: usize,
        #[source]
        cause: FetchError,
    },

    #[error("failed to assemble {}: {source}", path.display())]
    MergeIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The caller asked the transfer to stop.
    #[error("transfer cancelled")]
    Cancelled,

    #[error("segment worker stopped unexpectedly: {0}")]
    Worker(String),
}

/// Why a single segment attempt did not produce a complete artifact.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("server answered {0}")]
    Status(StatusCode),

    #[error("expected {expected} bytes, received {received}")]
    LengthMismatch { expected: u64, received: u64 },

    #[error("server sent a different range: {0}")]
    UnexpectedRange(String),

    #[error("{0}")]
    UnexpectedContent(String),

    #[error("storage error: {0}")]
    Storage(#[from] io::Error),

    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether another attempt of the same segment may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Network(_)
                | FetchError::Timeout(_)
                | FetchError::Status(_)
                | FetchError::LengthMismatch { .. }
                | FetchError::UnexpectedRange(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_causes() {
        assert!(FetchError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(FetchError::Status(StatusCode::SERVICE_UNAVAILABLE).is_retryable());
        assert!(FetchError::LengthMismatch {
            expected: 10,
            received: 4
        }
        .is_retryable());
    }

    #[test]
    fn test_terminal_causes() {
        assert!(!FetchError::Cancelled.is_retryable());
        assert!(!FetchError::Storage(io::Error::from(io::ErrorKind::PermissionDenied)).is_retryable());
        assert!(!FetchError::UnexpectedContent("html".to_string()).is_retryable());
    }

    #[test]
    fn test_segment_failed_message() {
        let err = TransferError::SegmentFailed {
            index: 2,
            cause: FetchError::Status(StatusCode::INTERNAL_SERVER_ERROR),
        };
        assert_eq!(
            err.to_string(),
            "segment 2 failed: server answered 500 Internal Server Error"
        );
    }
}
