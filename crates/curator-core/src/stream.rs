//! HTTP downloads with resume support and stall detection.
//!
//! Uses async reqwest internally with tokio::time::timeout for stall
//! detection, but presents a sync interface so the engine's worker
//! threads can call it directly.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use futures_util::StreamExt;
use indicatif::ProgressBar;

use crate::error::StreamError;
use crate::shutdown::is_shutdown_requested;

/// Read timeout for stall detection (no data for this long = stall)
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(8)
        .build()
        .expect("failed to build HTTP client")
});

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Result of a completed transfer.
#[derive(Debug)]
pub struct DownloadOutcome {
    /// Bytes written by this call (excludes any resumed prefix).
    pub bytes_written: u64,
    /// Total size of the file on disk after the transfer.
    pub file_size: u64,
    /// Whether the server honored a range request.
    pub resumed: bool,
}

/// Download `url` to `dest`, streaming chunk by chunk.
///
/// If `resume_from` is non-zero, a `Range` request is attempted and the
/// existing bytes at `dest` are kept when the server honors it (206).
/// A 200 response or a 416 (range not satisfiable) falls back to a
/// full transfer from scratch.
///
/// The transfer is cancellable: the shutdown flag is checked between
/// chunks, and cancellation leaves whatever was written at `dest` in
/// place for the caller to keep or discard.
pub fn download_to(
    url: &str,
    dest: &Path,
    resume_from: u64,
    pb: &ProgressBar,
) -> Result<DownloadOutcome, StreamError> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    match transfer(url, dest, resume_from, pb) {
        Err(StreamError::Http {
            status: Some(416), ..
        }) if resume_from > 0 => {
            // Staged data no longer matches what the server will
            // serve; restart from scratch.
            log::debug!("{url}: range not satisfiable, restarting full transfer");
            transfer(url, dest, 0, pb)
        }
        other => other,
    }
}

fn transfer(
    url: &str,
    dest: &Path,
    resume_from: u64,
    pb: &ProgressBar,
) -> Result<DownloadOutcome, StreamError> {
    SHARED_RUNTIME.handle().block_on(async {
        let mut request = SHARED_CLIENT.get(url);
        if resume_from > 0 {
            request = request.header(reqwest::header::RANGE, format!("bytes={resume_from}-"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| StreamError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Http {
                status: Some(status.as_u16()),
                message: status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string(),
            });
        }

        let resumed = resume_from > 0 && status == reqwest::StatusCode::PARTIAL_CONTENT;
        let offset = if resumed { resume_from } else { 0 };

        let content_length: Option<u64> = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());

        if let Some(len) = content_length {
            pb.set_length(offset + len);
            pb.set_position(offset);
        }

        let mut out = OpenOptions::new()
            .create(true)
            .write(true)
            .append(resumed)
            .truncate(!resumed)
            .open(dest)?;

        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;

        loop {
            if is_shutdown_requested() {
                out.flush()?;
                return Err(StreamError::Cancelled);
            }

            let chunk = match tokio::time::timeout(READ_TIMEOUT, stream.next()).await {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(e))) => return Err(StreamError::from_reqwest(&e)),
                Ok(None) => break,
                Err(_) => {
                    return Err(StreamError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("no data for {}s", READ_TIMEOUT.as_secs()),
                    )))
                }
            };

            out.write_all(&chunk)?;
            received += chunk.len() as u64;
            pb.inc(chunk.len() as u64);
        }

        out.flush()?;

        if let Some(expected) = content_length {
            if received < expected {
                return Err(StreamError::Truncated { expected, received });
            }
        }

        Ok(DownloadOutcome {
            bytes_written: received,
            file_size: offset + received,
            resumed,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_is_shared() {
        // First access initializes; subsequent accesses reuse
        let r1 = &*SHARED_RUNTIME as *const _;
        let r2 = &*SHARED_RUNTIME as *const _;
        assert_eq!(r1, r2);
    }

    #[test]
    fn download_invalid_url_fails() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let pb = ProgressBar::hidden();
        let err = download_to("http://127.0.0.1:1/nothing", &dest, 0, &pb);
        assert!(err.is_err());
    }
}
