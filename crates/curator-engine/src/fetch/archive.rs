//! Archive extraction producers (folder resources).
//!
//! ZIP and TAR (plain, gzip, bzip2) archives are downloaded through
//! the URL cache and extracted into the staging directory. Extraction
//! supports a subpath (only entries under it, with the prefix
//! stripped), an explicit file allow-list, and unwrapping of the
//! single top-level directory most published archives carry.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use bzip2::read::BzDecoder;
use flate2::read::MultiGzDecoder;
use indicatif::ProgressBar;

use crate::cache::Cache;
use crate::context::Context;
use crate::error::FetchError;
use crate::resource::Producer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    TarBz2,
}

impl ArchiveFormat {
    /// Infer from a filename or URL suffix.
    pub fn from_name(name: &str) -> Option<Self> {
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
            Some(Self::TarBz2)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

/// Downloads and extracts an archive into a folder resource.
pub struct ArchiveDownload {
    url: String,
    format: Option<ArchiveFormat>,
    subpath: Option<PathBuf>,
    files: Option<HashSet<PathBuf>>,
    unwrap_single_dir: bool,
}

impl ArchiveDownload {
    /// The format is inferred from the URL suffix; override with
    /// [`format`](ArchiveDownload::format) when the URL does not
    /// carry one.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let format = ArchiveFormat::from_name(&url);
        Self {
            url,
            format,
            subpath: None,
            files: None,
            unwrap_single_dir: true,
        }
    }

    pub fn format(mut self, format: ArchiveFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Extract only entries under this path inside the archive, with
    /// the prefix stripped from the output layout.
    pub fn subpath(mut self, subpath: impl Into<PathBuf>) -> Self {
        self.subpath = Some(subpath.into());
        self
    }

    /// Extract only the named files (relative to the subpath when one
    /// is set).
    pub fn only_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.files = Some(files.into_iter().map(Into::into).collect());
        self
    }

    /// Keep a lone top-level directory instead of unwrapping it.
    pub fn keep_root(mut self) -> Self {
        self.unwrap_single_dir = false;
        self
    }

    /// Relative output path for one archive entry, or None to skip it.
    fn accept(&self, entry_path: &Path) -> Option<PathBuf> {
        let rel = sanitized(entry_path)?;
        let rel = match &self.subpath {
            Some(sub) => rel.strip_prefix(sub).ok()?.to_path_buf(),
            None => rel,
        };
        if rel.as_os_str().is_empty() {
            return None;
        }
        if let Some(files) = &self.files {
            if !files.contains(&rel) {
                return None;
            }
        }
        Some(rel)
    }

    fn extract_zip(&self, archive_path: &Path, dest: &Path) -> Result<(), FetchError> {
        let file = File::open(archive_path)?;
        let mut zip = zip::ZipArchive::new(file)
            .map_err(|e| FetchError::Extract(e.to_string()))?;
        for i in 0..zip.len() {
            let mut entry = zip
                .by_index(i)
                .map_err(|e| FetchError::Extract(e.to_string()))?;
            let Some(name) = entry.enclosed_name() else {
                log::warn!("skipping unsafe archive entry: {}", entry.name());
                continue;
            };
            let Some(rel) = self.accept(&name) else {
                continue;
            };
            let target = dest.join(rel);
            if entry.is_dir() {
                std::fs::create_dir_all(&target)?;
                continue;
            }
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            io::copy(&mut entry, &mut out)?;
            #[cfg(unix)]
            if let Some(mode) = entry.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode))?;
            }
        }
        Ok(())
    }

    fn extract_tar(&self, reader: impl Read, dest: &Path) -> Result<(), FetchError> {
        let mut archive = tar::Archive::new(reader);
        for entry in archive.entries().map_err(tar_err)? {
            let mut entry = entry.map_err(tar_err)?;
            let path = entry.path().map_err(tar_err)?.into_owned();
            let Some(rel) = self.accept(&path) else {
                continue;
            };
            let target = dest.join(rel);
            if entry.header().entry_type().is_dir() {
                std::fs::create_dir_all(&target)?;
                continue;
            }
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            entry.unpack(&target).map_err(tar_err)?;
        }
        Ok(())
    }
}

fn tar_err(e: io::Error) -> FetchError {
    match e.kind() {
        io::ErrorKind::InvalidData
        | io::ErrorKind::InvalidInput
        | io::ErrorKind::UnexpectedEof => FetchError::Extract(e.to_string()),
        _ => FetchError::Io(e),
    }
}

/// Drops `..`, absolute prefixes, and other non-normal components.
fn sanitized(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(c) => out.push(c),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Flatten `dest/<only-dir>/...` to `dest/...` when extraction left a
/// single top-level directory.
fn unwrap_single_dir(dest: &Path) -> io::Result<()> {
    let entries: Vec<_> = std::fs::read_dir(dest)?.collect::<io::Result<_>>()?;
    let [only] = entries.as_slice() else {
        return Ok(());
    };
    if !only.file_type()?.is_dir() {
        return Ok(());
    }
    let inner = only.path();
    log::debug!("unwrapping single directory {}", inner.display());
    for child in std::fs::read_dir(&inner)? {
        let child = child?;
        std::fs::rename(child.path(), dest.join(child.file_name()))?;
    }
    std::fs::remove_dir(inner)
}

impl Producer for ArchiveDownload {
    fn produce(&self, ctx: &Context, dest: &Path, pb: &ProgressBar) -> Result<(), FetchError> {
        let Some(format) = self.format else {
            return Err(FetchError::Extract(format!(
                "cannot determine archive format of {}",
                self.url
            )));
        };

        let cached = Cache::new(ctx).fetch(&self.url, ctx.max_retries, pb)?;
        std::fs::create_dir_all(dest)?;

        match format {
            ArchiveFormat::Zip => self.extract_zip(cached.path(), dest)?,
            ArchiveFormat::Tar => self.extract_tar(File::open(cached.path())?, dest)?,
            ArchiveFormat::TarGz => {
                self.extract_tar(MultiGzDecoder::new(File::open(cached.path())?), dest)?
            }
            ArchiveFormat::TarBz2 => {
                self.extract_tar(BzDecoder::new(File::open(cached.path())?), dest)?
            }
        }

        if self.unwrap_single_dir {
            unwrap_single_dir(dest)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};
    use std::io::Write;

    fn seed_cache(ctx: &Context, url: &str, bytes: &[u8]) {
        let dir = ctx.cache_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let key = hex::encode(Sha256::digest(url.as_bytes()));
        std::fs::write(dir.join(format!("{key}.url")), url).unwrap();
        std::fs::write(dir.join(format!("{key}.dl")), bytes).unwrap();
    }

    fn tar_bytes(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, bytes) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(bytes.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *bytes).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn zip_bytes(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        for (name, bytes) in members {
            writer.start_file(*name, options).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn format_inference() {
        assert_eq!(ArchiveFormat::from_name("a.zip"), Some(ArchiveFormat::Zip));
        assert_eq!(
            ArchiveFormat::from_name("a.tar.gz"),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(
            ArchiveFormat::from_name("a.tbz2"),
            Some(ArchiveFormat::TarBz2)
        );
        assert_eq!(ArchiveFormat::from_name("a.bin"), None);
    }

    #[test]
    fn zip_extraction_unwraps_single_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = Context::new(tmp.path());
        let url = "http://example.org/data.zip";
        seed_cache(
            &ctx,
            url,
            &zip_bytes(&[
                ("dataset-1.0/a.txt", b"A"),
                ("dataset-1.0/sub/b.txt", b"B"),
            ]),
        );

        let dest = tmp.path().join("out");
        let pb = ProgressBar::hidden();
        ArchiveDownload::new(url).produce(&ctx, &dest, &pb).unwrap();
        assert_eq!(std::fs::read(dest.join("a.txt")).unwrap(), b"A");
        assert_eq!(std::fs::read(dest.join("sub/b.txt")).unwrap(), b"B");
        assert!(!dest.join("dataset-1.0").exists());
    }

    #[test]
    fn keep_root_disables_unwrapping() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = Context::new(tmp.path());
        let url = "http://example.org/rooted.tar";
        seed_cache(&ctx, url, &tar_bytes(&[("root/a.txt", b"A")]));

        let dest = tmp.path().join("out");
        let pb = ProgressBar::hidden();
        ArchiveDownload::new(url)
            .keep_root()
            .produce(&ctx, &dest, &pb)
            .unwrap();
        assert!(dest.join("root/a.txt").exists());
    }

    #[test]
    fn subpath_strips_prefix_and_filters() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = Context::new(tmp.path());
        let url = "http://example.org/mixed.tar";
        seed_cache(
            &ctx,
            url,
            &tar_bytes(&[
                ("keep/x.txt", b"X"),
                ("keep/y.txt", b"Y"),
                ("drop/z.txt", b"Z"),
            ]),
        );

        let dest = tmp.path().join("out");
        let pb = ProgressBar::hidden();
        ArchiveDownload::new(url)
            .subpath("keep")
            .produce(&ctx, &dest, &pb)
            .unwrap();
        assert!(dest.join("x.txt").exists());
        assert!(dest.join("y.txt").exists());
        assert!(!dest.join("z.txt").exists());
        assert!(!dest.join("drop").exists());
    }

    #[test]
    fn file_allow_list() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = Context::new(tmp.path());
        let url = "http://example.org/many.zip";
        seed_cache(
            &ctx,
            url,
            &zip_bytes(&[("a.txt", b"A"), ("b.txt", b"B"), ("c.txt", b"C")]),
        );

        let dest = tmp.path().join("out");
        let pb = ProgressBar::hidden();
        ArchiveDownload::new(url)
            .only_files(["a.txt", "c.txt"])
            .keep_root()
            .produce(&ctx, &dest, &pb)
            .unwrap();
        assert!(dest.join("a.txt").exists());
        assert!(!dest.join("b.txt").exists());
        assert!(dest.join("c.txt").exists());
    }

    #[test]
    fn unknown_format_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = Context::new(tmp.path());
        let dest = tmp.path().join("out");
        let pb = ProgressBar::hidden();
        let err = ArchiveDownload::new("http://example.org/blob.bin")
            .produce(&ctx, &dest, &pb)
            .unwrap_err();
        assert!(matches!(err, FetchError::Extract(_)));
    }

    #[test]
    fn traversal_entries_skipped() {
        assert!(sanitized(Path::new("../evil")).is_none());
        assert!(sanitized(Path::new("/abs")).is_none());
        assert_eq!(
            sanitized(Path::new("./ok/fine")).unwrap(),
            PathBuf::from("ok/fine")
        );
    }
}
