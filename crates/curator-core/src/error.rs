//! Transport error type shared by download operations

use std::io;

/// Error from a streaming transfer (HTTP or local I/O).
#[derive(Debug)]
pub enum StreamError {
    /// HTTP error with optional status code
    Http {
        status: Option<u16>,
        message: String,
    },
    /// I/O error while reading the body or writing to disk
    Io(io::Error),
    /// Transfer ended before the announced content length
    Truncated { expected: u64, received: u64 },
    /// Shutdown was requested mid-transfer
    Cancelled,
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Truncated { expected, received } => {
                write!(f, "truncated transfer: {received}/{expected} bytes")
            }
            Self::Cancelled => write!(f, "transfer cancelled"),
        }
    }
}

impl std::error::Error for StreamError {}

impl StreamError {
    /// Create HTTP error from reqwest error
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        Self::Http {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => {
                // Client errors won't get better on retry, except
                // 408 (request timeout) and 429 (rate limited)
                match status {
                    Some(408) | Some(429) => true,
                    Some(s) if (400..500).contains(s) => false,
                    _ => true,
                }
            }
            Self::Io(e) => {
                // Disk full is not retryable, timeout IS retryable
                e.kind() != io::ErrorKind::StorageFull
            }
            Self::Truncated { .. } => true,
            Self::Cancelled => false,
        }
    }
}

impl From<io::Error> for StreamError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
