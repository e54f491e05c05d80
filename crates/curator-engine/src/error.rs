//! Error taxonomy for the resource engine.
//!
//! Three families with different handling:
//!
//! - [`ConfigError`]: the dataset declaration or persisted metadata is
//!   wrong. Fatal, surfaced before any download runs, never retried.
//! - [`FetchError`]: a single resource failed to download or validate.
//!   The orchestrator records PARTIAL or NONE (per `can_recover`) and
//!   continues with independent branches.
//! - [`PrepareError`]: the construction callback was invoked against
//!   resources that are not COMPLETE.

use std::io;
use std::path::PathBuf;

use curator_core::{retry::Retryable, StreamError};

use crate::checksum::ChecksumAlgorithm;

/// Fatal configuration problem in a dataset declaration or its
/// persisted metadata.
#[derive(Debug)]
pub enum ConfigError {
    /// The dependency graph contains a cycle. Resource names are
    /// listed in cycle order.
    Cycle(Vec<String>),
    /// Two resources declared with the same name.
    DuplicateResource(String),
    /// A dependency handle that does not belong to this dataset.
    UnknownResource(String),
    /// The state metadata file declares a version this build does not
    /// understand.
    UnknownStateVersion { found: u32, supported: u32 },
    /// The state metadata file exists but cannot be read or parsed.
    StateFile { path: PathBuf, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cycle(names) => {
                write!(f, "cycle in resource dependencies: {}", names.join(" -> "))
            }
            Self::DuplicateResource(name) => {
                write!(f, "resource name declared twice: {name}")
            }
            Self::UnknownResource(name) => {
                write!(f, "dependency on a resource from another dataset: {name}")
            }
            Self::UnknownStateVersion { found, supported } => write!(
                f,
                "state file version {found} not supported (this build reads version {supported})"
            ),
            Self::StateFile { path, message } => {
                write!(f, "unreadable state file {}: {message}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Failure while producing a single resource.
///
/// Checksum mismatches, decode errors and extraction errors are
/// deliberately part of this type: the orchestrator treats them
/// exactly like a failed transfer.
#[derive(Debug)]
pub enum FetchError {
    /// Transport failure (HTTP or streaming I/O).
    Stream(StreamError),
    /// Local I/O failure.
    Io(io::Error),
    /// Downloaded bytes do not match the expected digest.
    Checksum {
        algorithm: ChecksumAlgorithm,
        expected: String,
        actual: String,
    },
    /// Archive could not be decoded or extracted.
    Extract(String),
    /// The download cache refused the request (URL key collision).
    Cache(String),
    /// A referenced dataset did not fully materialize.
    Upstream { dataset: String },
    /// Shutdown was requested mid-download.
    Cancelled,
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "IO: {e}"),
            Self::Checksum {
                algorithm,
                expected,
                actual,
            } => write!(
                f,
                "{algorithm} mismatch: expected {expected}, got {actual}"
            ),
            Self::Extract(msg) => write!(f, "extraction failed: {msg}"),
            Self::Cache(msg) => write!(f, "download cache: {msg}"),
            Self::Upstream { dataset } => {
                write!(f, "referenced dataset {dataset} did not materialize")
            }
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for FetchError {}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Stream(e) => e.is_retryable(),
            Self::Io(e) => e.kind() != io::ErrorKind::StorageFull,
            // Fully transferred but wrong bytes: retrying the same
            // URL will fetch the same bytes
            Self::Checksum { .. } | Self::Extract(_) | Self::Cache(_) => false,
            Self::Upstream { .. } => false,
            Self::Cancelled => false,
        }
    }
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        FetchError::is_retryable(self)
    }
}

impl From<StreamError> for FetchError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::Cancelled => Self::Cancelled,
            other => Self::Stream(other),
        }
    }
}

impl From<io::Error> for FetchError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Failure when assembling the typed dataset value.
#[derive(Debug)]
pub enum PrepareError {
    /// A required resource is not COMPLETE; names the resource
    /// instead of surfacing a file-not-found deeper in user code.
    ResourceIncomplete { resource: String },
    /// The handle was asked for a path of a value resource, or a
    /// value of a path resource.
    WrongKind {
        resource: String,
        expected: &'static str,
    },
    /// Materialization could not run at all.
    Materialize(anyhow::Error),
    /// The construction callback itself failed.
    Build(anyhow::Error),
}

impl std::fmt::Display for PrepareError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResourceIncomplete { resource } => {
                write!(f, "resource {resource} is not complete")
            }
            Self::WrongKind { resource, expected } => {
                write!(f, "resource {resource} does not provide a {expected}")
            }
            Self::Materialize(e) => write!(f, "materialization failed: {e}"),
            Self::Build(e) => write!(f, "dataset construction failed: {e}"),
        }
    }
}

impl std::error::Error for PrepareError {}
