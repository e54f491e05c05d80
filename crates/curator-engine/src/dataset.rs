//! Dataset aggregate: a qualified id, a resource graph, and a typed
//! construction callback.
//!
//! Declaring a dataset performs no I/O. The builder hands out
//! [`ResourceId`] handles as resources are added; dependencies are
//! wired through those handles and validated once at [`build`].
//!
//! [`build`]: DatasetBuilder::build

use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;

use crate::context::Context;
use crate::error::{ConfigError, PrepareError};
use crate::graph::Graph;
use crate::materialize::{self, MaterializeReport};
use crate::resource::{Materializable, Resource, ResourceId, ResourceKind};

type Construct<T> = Box<dyn Fn(&Prepared<'_>) -> Result<T, PrepareError> + Send + Sync>;

/// Declares the resources of one dataset.
pub struct DatasetBuilder {
    id: String,
    resources: Vec<Resource>,
    extra_edges: Vec<(ResourceId, ResourceId)>,
}

impl DatasetBuilder {
    /// `id` is the qualified dataset identifier, e.g.
    /// `ml.image.mnist`; its dot components become the on-disk
    /// directory layout.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resources: Vec::new(),
            extra_edges: Vec::new(),
        }
    }

    /// Add a resource, returning its handle for dependency wiring.
    pub fn add(&mut self, resource: Resource) -> ResourceId {
        self.resources.push(resource);
        ResourceId(self.resources.len() - 1)
    }

    /// Declare that `resource` runs only after `on` is complete.
    /// Validated (with the rest of the graph) at build time.
    pub fn depends(&mut self, resource: ResourceId, on: ResourceId) {
        self.extra_edges.push((resource, on));
    }

    /// Validate the graph and attach the construction callback.
    pub fn build<T, F>(mut self, construct: F) -> Result<Dataset<T>, ConfigError>
    where
        F: Fn(&Prepared<'_>) -> Result<T, PrepareError> + Send + Sync + 'static,
    {
        for (resource, on) in self.extra_edges.drain(..) {
            let name = match self.resources.get(resource.0) {
                Some(r) => r.name.clone(),
                None => {
                    return Err(ConfigError::UnknownResource(format!(
                        "resource #{}",
                        resource.0
                    )))
                }
            };
            if on.0 >= self.resources.len() {
                return Err(ConfigError::UnknownResource(name));
            }
            self.resources[resource.0].deps.push(on);
        }

        let graph = Graph::build(&self.resources)?;
        Ok(Dataset {
            id: self.id,
            resources: self.resources,
            graph,
            construct: Box::new(construct),
        })
    }
}

/// A declared dataset with a typed payload.
pub struct Dataset<T> {
    id: String,
    resources: Vec<Resource>,
    graph: Graph,
    construct: Construct<T>,
}

impl<T> Dataset<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run one orchestration pass over the resource graph.
    pub fn materialize(&self, ctx: &Context, force: bool) -> anyhow::Result<MaterializeReport> {
        materialize::run(&self.id, &self.resources, &self.graph, ctx, force)
    }

    /// Materialize, then build the typed payload from the completed
    /// resources.
    pub fn prepare(&self, ctx: &Context) -> Result<T, PrepareError> {
        let report = self
            .materialize(ctx, false)
            .map_err(PrepareError::Materialize)?;
        let prepared = Prepared {
            resources: &self.resources,
            datapath: ctx.dataset_dir(&self.id),
            ctx,
            report,
        };
        (self.construct)(&prepared)
    }
}

impl<T> Materializable for Dataset<T> {
    fn id(&self) -> &str {
        &self.id
    }

    fn materialize(&self, ctx: &Context, force: bool) -> anyhow::Result<MaterializeReport> {
        Dataset::materialize(self, ctx, force)
    }
}

/// Handle over a materialized dataset, passed to the construction
/// callback.
pub struct Prepared<'a> {
    resources: &'a [Resource],
    datapath: PathBuf,
    ctx: &'a Context,
    report: MaterializeReport,
}

impl Prepared<'_> {
    pub fn report(&self) -> &MaterializeReport {
        &self.report
    }

    fn get(&self, id: ResourceId) -> Result<&Resource, PrepareError> {
        self.resources
            .get(id.0)
            .ok_or_else(|| PrepareError::WrongKind {
                resource: format!("resource #{}", id.0),
                expected: "resource of this dataset",
            })
    }

    fn require_complete(&self, resource: &Resource) -> Result<(), PrepareError> {
        let complete = self
            .report
            .outcome(&resource.name)
            .map(|o| o.is_complete())
            .unwrap_or(false);
        if complete {
            Ok(())
        } else {
            Err(PrepareError::ResourceIncomplete {
                resource: resource.name.clone(),
            })
        }
    }

    /// Final on-disk path of a COMPLETE file or folder resource.
    pub fn path(&self, id: ResourceId) -> Result<PathBuf, PrepareError> {
        let resource = self.get(id)?;
        let path = match &resource.kind {
            ResourceKind::File { filename, .. } => self.datapath.join(filename),
            ResourceKind::Folder { .. } => self.datapath.join(&resource.name),
            _ => {
                return Err(PrepareError::WrongKind {
                    resource: resource.name.clone(),
                    expected: "file or folder",
                })
            }
        };
        self.require_complete(resource)?;
        Ok(path)
    }

    /// Typed value of a COMPLETE value resource.
    pub fn value<V: Any + Send + Sync>(&self, id: ResourceId) -> Result<Arc<V>, PrepareError> {
        let resource = self.get(id)?;
        let ResourceKind::Value { producer } = &resource.kind else {
            return Err(PrepareError::WrongKind {
                resource: resource.name.clone(),
                expected: "value",
            });
        };
        self.require_complete(resource)?;
        let value = producer
            .value(self.ctx)
            .map_err(|e| PrepareError::Build(anyhow::anyhow!("{e}")))?;
        value.downcast::<V>().map_err(|_| PrepareError::WrongKind {
            resource: resource.name.clone(),
            expected: "value of the requested type",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{Custom, CustomValue};

    #[test]
    fn builder_hands_out_sequential_handles() {
        let mut builder = DatasetBuilder::new("t.seq");
        let a = builder.add(Resource::file("a.txt", Custom::new(|_, _, _| Ok(()))));
        let b = builder.add(Resource::file("b.txt", Custom::new(|_, _, _| Ok(()))));
        assert_eq!(a, ResourceId(0));
        assert_eq!(b, ResourceId(1));
    }

    #[test]
    fn build_rejects_cycle_naming_members() {
        let mut builder = DatasetBuilder::new("t.cycle");
        let x = builder.add(
            Resource::file("x.txt", Custom::new(|_, _, _| Ok(()))).named("x"),
        );
        let y = builder.add(
            Resource::file("y.txt", Custom::new(|_, _, _| Ok(()))).named("y"),
        );
        builder.depends(x, y);
        builder.depends(y, x);
        match builder.build::<(), _>(|_| Ok(())) {
            Err(ConfigError::Cycle(names)) => {
                assert!(names.contains(&"x".to_string()));
                assert!(names.contains(&"y".to_string()));
            }
            _ => panic!("expected cycle error"),
        }
    }

    #[test]
    fn build_rejects_foreign_handle() {
        let mut builder = DatasetBuilder::new("t.foreign");
        let a = builder.add(Resource::file("a.txt", Custom::new(|_, _, _| Ok(()))));
        builder.depends(a, ResourceId(42));
        assert!(matches!(
            builder.build::<(), _>(|_| Ok(())),
            Err(ConfigError::UnknownResource(_))
        ));
    }

    #[test]
    fn prepare_returns_typed_payload() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = Context::new(tmp.path());

        let mut builder = DatasetBuilder::new("t.payload");
        let file = builder.add(Resource::file(
            "greeting.txt",
            Custom::new(|_, dest, _| {
                std::fs::write(dest, b"hi")?;
                Ok(())
            }),
        ));
        let count = builder.add(Resource::value(
            "count",
            CustomValue::new(|_| Ok(Arc::new(3usize) as Arc<_>)),
        ));
        let dataset = builder
            .build(move |p| Ok((p.path(file)?, *p.value::<usize>(count)?)))
            .unwrap();

        let (path, n) = dataset.prepare(&ctx).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hi");
        assert_eq!(n, 3);
    }

    #[test]
    fn prepare_names_incomplete_resource() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = Context::new(tmp.path());

        let mut builder = DatasetBuilder::new("t.broken");
        let file = builder.add(Resource::file(
            "missing.txt",
            Custom::new(|_, _, _| {
                Err(crate::FetchError::Extract("no such payload".into()))
            }),
        ));
        let dataset = builder.build(move |p| p.path(file)).unwrap();

        match dataset.prepare(&ctx) {
            Err(PrepareError::ResourceIncomplete { resource }) => {
                assert_eq!(resource, "missing");
            }
            other => panic!("expected incomplete error, got {other:?}"),
        }
    }

    #[test]
    fn path_on_value_resource_is_wrong_kind() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = Context::new(tmp.path());

        let mut builder = DatasetBuilder::new("t.kinds");
        let v = builder.add(Resource::value(
            "n",
            CustomValue::new(|_| Ok(Arc::new(1u8) as Arc<_>)),
        ));
        let dataset = builder.build(move |p| p.path(v)).unwrap();
        assert!(matches!(
            dataset.prepare(&ctx),
            Err(PrepareError::WrongKind { .. })
        ));
    }
}
