//! Concrete producers: URL downloads, archive extraction, and
//! closure-backed custom steps.

pub mod archive;
pub mod custom;
pub mod url;

pub use archive::{ArchiveDownload, ArchiveFormat};
pub use custom::{Custom, CustomValue};
pub use url::{ConcatDownload, Transform, UrlDownload};
