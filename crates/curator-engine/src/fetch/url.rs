//! Single-file URL producers.
//!
//! Plain downloads stream straight into the staging path and resume
//! over HTTP Range, so they are recoverable. Transformed downloads
//! (gzip / bzip2 decompression) go through the URL cache instead: the
//! compressed bytes are what resumes, the decompressed output is
//! rewritten whole.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use bzip2::read::BzDecoder;
use flate2::read::MultiGzDecoder;
use indicatif::ProgressBar;

use curator_core::{download_to, retry_with_backoff};

use crate::cache::Cache;
use crate::context::Context;
use crate::error::FetchError;
use crate::resource::Producer;

/// Decompression applied to downloaded bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    None,
    Gzip,
    Bzip2,
}

impl Transform {
    /// Infer from a filename or URL suffix.
    pub fn from_name(name: &str) -> Self {
        if name.ends_with(".gz") {
            Self::Gzip
        } else if name.ends_with(".bz2") {
            Self::Bzip2
        } else {
            Self::None
        }
    }

    fn decompress(&self, input: impl Read, out: &mut impl Write) -> io::Result<u64> {
        let mut input = input;
        match self {
            Self::None => io::copy(&mut input, out),
            Self::Gzip => io::copy(&mut MultiGzDecoder::new(input), out),
            Self::Bzip2 => io::copy(&mut BzDecoder::new(input), out),
        }
    }
}

fn decode_err(e: io::Error) -> FetchError {
    match e.kind() {
        io::ErrorKind::InvalidData
        | io::ErrorKind::InvalidInput
        | io::ErrorKind::UnexpectedEof => FetchError::Extract(e.to_string()),
        _ => FetchError::Io(e),
    }
}

/// Downloads one URL to one file, optionally decompressing.
pub struct UrlDownload {
    url: String,
    transform: Transform,
}

impl UrlDownload {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            transform: Transform::None,
        }
    }

    /// Decompress the payload as gzip while writing it.
    pub fn gunzip(mut self) -> Self {
        self.transform = Transform::Gzip;
        self
    }

    /// Decompress the payload as bzip2 while writing it.
    pub fn bunzip2(mut self) -> Self {
        self.transform = Transform::Bzip2;
        self
    }
}

impl Producer for UrlDownload {
    fn produce(&self, ctx: &Context, dest: &Path, pb: &ProgressBar) -> Result<(), FetchError> {
        match self.transform {
            Transform::None => {
                retry_with_backoff(&self.url, ctx.max_retries, pb, || {
                    let resume_from =
                        std::fs::metadata(dest).map(|m| m.len()).unwrap_or(0);
                    if resume_from > 0 {
                        log::info!("resuming {} from byte {resume_from}", self.url);
                    }
                    download_to(&self.url, dest, resume_from, pb)
                })?;
                Ok(())
            }
            transform => {
                let cached = Cache::new(ctx).fetch(&self.url, ctx.max_retries, pb)?;
                let input = File::open(cached.path())?;
                let mut out = File::create(dest)?;
                transform.decompress(input, &mut out).map_err(decode_err)?;
                out.flush()?;
                Ok(())
            }
        }
    }

    /// Raw transfers resume byte-exact; transformed output cannot be
    /// appended to safely.
    fn can_recover(&self) -> bool {
        self.transform == Transform::None
    }
}

/// Concatenates every regular file of a tar archive into one output
/// file, decompressing each member per its own extension.
pub struct ConcatDownload {
    url: String,
}

impl ConcatDownload {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Producer for ConcatDownload {
    fn produce(&self, ctx: &Context, dest: &Path, pb: &ProgressBar) -> Result<(), FetchError> {
        let cached = Cache::new(ctx).fetch(&self.url, ctx.max_retries, pb)?;
        let input = File::open(cached.path())?;
        let reader: Box<dyn Read> = match Transform::from_name(&self.url) {
            Transform::Gzip => Box::new(MultiGzDecoder::new(input)),
            Transform::Bzip2 => Box::new(BzDecoder::new(input)),
            Transform::None => Box::new(input),
        };

        let mut archive = tar::Archive::new(reader);
        let mut out = File::create(dest)?;
        for entry in archive.entries().map_err(decode_err)? {
            let entry = entry.map_err(decode_err)?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let member = entry
                .path()
                .map_err(decode_err)?
                .to_string_lossy()
                .into_owned();
            log::debug!("concatenating {member}");
            Transform::from_name(&member)
                .decompress(entry, &mut out)
                .map_err(decode_err)?;
        }
        out.flush()?;
        Ok(())
    }
}
