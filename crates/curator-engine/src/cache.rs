//! URL download cache.
//!
//! Keyed by the sha256 of the URL. Three files per entry:
//!
//! - `<key>.url`  the URL itself, to detect hash collisions
//! - `<key>.tmp`  in-flight bytes, resumable across runs
//! - `<key>.dl`   the completed download
//!
//! Cache entries are scoped to one consumer: the returned handle
//! deletes the entry when dropped unless `keep_downloads` is set or
//! another run is expected to reuse it via [`CachedFile::keep`].

use std::path::{Path, PathBuf};

use indicatif::ProgressBar;
use sha2::{Digest, Sha256};

use curator_core::{download_to, retry_with_backoff};

use crate::context::Context;
use crate::error::FetchError;

pub struct Cache {
    dir: PathBuf,
    keep_downloads: bool,
}

impl Cache {
    pub fn new(ctx: &Context) -> Self {
        Self {
            dir: ctx.cache_dir(),
            keep_downloads: ctx.keep_downloads,
        }
    }

    /// Download `url` into the cache, reusing a completed entry and
    /// resuming an in-flight one.
    pub fn fetch(
        &self,
        url: &str,
        max_retries: u32,
        pb: &ProgressBar,
    ) -> Result<CachedFile, FetchError> {
        std::fs::create_dir_all(&self.dir)?;

        let key = hex::encode(Sha256::digest(url.as_bytes()));
        let url_path = self.dir.join(format!("{key}.url"));
        let tmp_path = self.dir.join(format!("{key}.tmp"));
        let dl_path = self.dir.join(format!("{key}.dl"));

        match std::fs::read_to_string(&url_path) {
            Ok(stored) if stored != url => {
                return Err(FetchError::Cache(format!(
                    "key {key} already bound to {stored}"
                )));
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                std::fs::write(&url_path, url)?;
            }
            Err(e) => return Err(e.into()),
        }

        if dl_path.exists() {
            log::debug!("cache hit for {url}");
            return Ok(CachedFile {
                key,
                dir: self.dir.clone(),
                path: dl_path,
                keep: self.keep_downloads,
            });
        }

        retry_with_backoff(url, max_retries, pb, || {
            let resume_from = std::fs::metadata(&tmp_path).map(|m| m.len()).unwrap_or(0);
            if resume_from > 0 {
                log::info!("resuming {url} from byte {resume_from}");
            }
            download_to(url, &tmp_path, resume_from, pb)
        })?;

        std::fs::rename(&tmp_path, &dl_path)?;
        Ok(CachedFile {
            key,
            dir: self.dir.clone(),
            path: dl_path,
            keep: self.keep_downloads,
        })
    }
}

/// Handle to a completed cache entry. Dropping it removes the entry
/// unless it was marked kept.
pub struct CachedFile {
    key: String,
    dir: PathBuf,
    path: PathBuf,
    keep: bool,
}

impl CachedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Leave the entry in the cache after drop.
    pub fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for CachedFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        let _ = std::fs::remove_file(&self.path);
        let _ = std::fs::remove_file(self.dir.join(format!("{}.url", self.key)));
    }
}
