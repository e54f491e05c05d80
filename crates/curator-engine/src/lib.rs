//! curator-engine: resource dependency and download orchestration
//!
//! A dataset is declared as a DAG of resources (files, folders,
//! in-memory values, references to other datasets). Materializing a
//! dataset walks the DAG in dependency order, downloads each resource
//! into a staging area, and commits it to its final location only on
//! verified success. Per-resource lifecycle state (none / partial /
//! complete) is persisted so an interrupted run resumes where it
//! stopped.

pub mod cache;
pub mod checksum;
pub mod context;
pub mod dataset;
pub mod error;
pub mod fetch;
pub mod graph;
pub mod materialize;
pub mod resource;
pub mod state;

// Re-exports for convenience
pub use cache::{Cache, CachedFile};
pub use checksum::{Checksum, ChecksumAlgorithm};
pub use context::Context;
pub use dataset::{Dataset, DatasetBuilder, Prepared};
pub use error::{ConfigError, FetchError, PrepareError};
pub use materialize::{MaterializeReport, Outcome};
pub use resource::{Materializable, Producer, Resource, ResourceId, ValueProducer};
pub use state::{ResourceState, StateFile};
