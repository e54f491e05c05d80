//! Curator Core - Common infrastructure for dataset acquisition
//!
//! This crate provides the transport and reporting plumbing shared by
//! the resource engine: HTTP streaming with resume support, retry with
//! backoff, progress bars, logging, and graceful shutdown.

pub mod error;
pub mod logging;
pub mod progress;
pub mod retry;
pub mod shutdown;
pub mod stream;

// Re-exports for convenience
pub use error::StreamError;
pub use logging::{init_logging, IndicatifLogger};
pub use progress::{ProgressContext, SharedProgress};
pub use retry::{backoff_duration, retry_with_backoff};
pub use shutdown::{install_signal_handlers, is_shutdown_requested, request_shutdown, shutdown_flag};
pub use stream::{download_to, DownloadOutcome, SHARED_RUNTIME};
