//! Resource declarations and the producer traits.
//!
//! A resource names one artefact a dataset needs on disk (or in
//! memory) and the producer that knows how to obtain it. Declarations
//! are inert: nothing touches the network or the filesystem until the
//! orchestrator runs.

use std::any::Any;
use std::path::Path;
use std::sync::Arc;

use indicatif::ProgressBar;

use crate::checksum::Checksum;
use crate::context::Context;
use crate::error::FetchError;
use crate::materialize::MaterializeReport;

/// Handle to a resource inside one dataset builder.
///
/// Only valid for the builder that issued it; using it against another
/// dataset is rejected at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(pub(crate) usize);

/// Produces the bytes of a file or folder resource.
///
/// The contract is strict: write only under `dest` (a path inside the
/// staging area) and never touch the final location. The orchestrator
/// alone commits staged output, so a crashed producer can never leave
/// a half-written artefact where consumers look for it.
pub trait Producer: Send + Sync {
    /// Produce the artefact at `dest`. On entry `dest` may already
    /// hold bytes from an earlier attempt when [`can_recover`] is
    /// true; otherwise it does not exist.
    ///
    /// [`can_recover`]: Producer::can_recover
    fn produce(&self, ctx: &Context, dest: &Path, pb: &ProgressBar) -> Result<(), FetchError>;

    /// Whether partial output at `dest` is worth keeping across a
    /// failure. When false, the orchestrator deletes the staged bytes
    /// and the next attempt starts from scratch.
    fn can_recover(&self) -> bool {
        false
    }
}

/// Produces an in-memory value resource.
///
/// Values are recomputed on every run (a COMPLETE marker only skips
/// the side-effecting warm-up), so `value` must be cheap or memoized
/// by the implementation.
pub trait ValueProducer: Send + Sync {
    /// One-time side-effecting preparation. The default derives it
    /// from [`value`](ValueProducer::value).
    fn fetch(&self, ctx: &Context) -> Result<(), FetchError> {
        self.value(ctx).map(|_| ())
    }

    /// Compute (or return the memoized) value.
    fn value(&self, ctx: &Context) -> Result<Arc<dyn Any + Send + Sync>, FetchError>;
}

/// Anything that can be materialized as a whole; implemented by
/// [`Dataset`](crate::dataset::Dataset) for every payload type, which
/// is what lets one dataset reference another without sharing its
/// type parameter.
pub trait Materializable: Send + Sync {
    /// Qualified dataset id, e.g. `ml.image.mnist`.
    fn id(&self) -> &str;

    fn materialize(&self, ctx: &Context, force: bool) -> anyhow::Result<MaterializeReport>;
}

pub(crate) enum ResourceKind {
    File {
        filename: String,
        producer: Arc<dyn Producer>,
    },
    Folder {
        producer: Arc<dyn Producer>,
    },
    Value {
        producer: Arc<dyn ValueProducer>,
    },
    Reference {
        target: Arc<dyn Materializable>,
    },
}

impl ResourceKind {
    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Self::File { .. } => "file",
            Self::Folder { .. } => "folder",
            Self::Value { .. } => "value",
            Self::Reference { .. } => "reference",
        }
    }
}

/// Declaration of one resource: a name, a kind, and scheduling hints.
pub struct Resource {
    pub(crate) name: String,
    pub(crate) kind: ResourceKind,
    pub(crate) transient: bool,
    pub(crate) checksum: Option<Checksum>,
    pub(crate) deps: Vec<ResourceId>,
}

impl Resource {
    /// File resource. The name defaults to the filename with
    /// everything from the first dot stripped (`images.tar.gz`
    /// becomes `images`); override with [`named`](Resource::named).
    pub fn file(filename: impl Into<String>, producer: impl Producer + 'static) -> Self {
        let filename = filename.into();
        let name = default_name(&filename);
        Self {
            name,
            kind: ResourceKind::File {
                filename,
                producer: Arc::new(producer),
            },
            transient: false,
            checksum: None,
            deps: Vec::new(),
        }
    }

    /// Folder resource; the name is also the directory name under the
    /// dataset directory.
    pub fn folder(name: impl Into<String>, producer: impl Producer + 'static) -> Self {
        Self {
            name: name.into(),
            kind: ResourceKind::Folder {
                producer: Arc::new(producer),
            },
            transient: false,
            checksum: None,
            deps: Vec::new(),
        }
    }

    /// In-memory value resource.
    pub fn value(name: impl Into<String>, producer: impl ValueProducer + 'static) -> Self {
        Self {
            name: name.into(),
            kind: ResourceKind::Value {
                producer: Arc::new(producer),
            },
            transient: false,
            checksum: None,
            deps: Vec::new(),
        }
    }

    /// Reference to another dataset: materializing this resource
    /// materializes the target dataset in full.
    pub fn reference(name: impl Into<String>, target: Arc<dyn Materializable>) -> Self {
        Self {
            name: name.into(),
            kind: ResourceKind::Reference { target },
            transient: false,
            checksum: None,
            deps: Vec::new(),
        }
    }

    /// Override the derived name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Mark the resource as an intermediate: once every dependent is
    /// COMPLETE its on-disk artefact is deleted and its state reset.
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    /// Expected digest, checked before commit.
    pub fn checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    /// Order this resource after another one from the same builder.
    pub fn after(mut self, dep: ResourceId) -> Self {
        self.deps.push(dep);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn default_name(filename: &str) -> String {
    match filename.split('.').next() {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => filename.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Producer for Noop {
        fn produce(
            &self,
            _ctx: &Context,
            _dest: &Path,
            _pb: &ProgressBar,
        ) -> Result<(), FetchError> {
            Ok(())
        }
    }

    #[test]
    fn file_name_strips_from_first_dot() {
        let r = Resource::file("images.tar.gz", Noop);
        assert_eq!(r.name(), "images");
    }

    #[test]
    fn hidden_filename_keeps_full_name() {
        let r = Resource::file(".labels", Noop);
        assert_eq!(r.name(), ".labels");
    }

    #[test]
    fn named_overrides_derived_name() {
        let r = Resource::file("data.bin", Noop).named("payload");
        assert_eq!(r.name(), "payload");
    }

    #[test]
    fn fluent_flags() {
        let r = Resource::file("a.txt", Noop)
            .transient()
            .after(ResourceId(3));
        assert!(r.transient);
        assert_eq!(r.deps, vec![ResourceId(3)]);
    }

    #[test]
    fn producer_defaults_to_non_recoverable() {
        assert!(!Noop.can_recover());
    }

    #[test]
    fn kind_description_follows_constructor() {
        assert_eq!(Resource::file("a.txt", Noop).kind.describe(), "file");
        assert_eq!(Resource::folder("imgs", Noop).kind.describe(), "folder");
    }
}
