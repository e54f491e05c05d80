//! Closure-backed producers for bespoke acquisition steps.
//!
//! Tests use these heavily to script orchestration scenarios without
//! touching the network.

use std::any::Any;
use std::path::Path;
use std::sync::Arc;

use indicatif::ProgressBar;

use crate::context::Context;
use crate::error::FetchError;
use crate::resource::{Producer, ValueProducer};

/// File or folder producer backed by a closure.
pub struct Custom<F> {
    run: F,
    recoverable: bool,
}

impl<F> Custom<F>
where
    F: Fn(&Context, &Path, &ProgressBar) -> Result<(), FetchError> + Send + Sync,
{
    pub fn new(run: F) -> Self {
        Self {
            run,
            recoverable: false,
        }
    }

    /// Declare that partial output at the destination is resumable.
    pub fn recoverable(mut self) -> Self {
        self.recoverable = true;
        self
    }
}

impl<F> Producer for Custom<F>
where
    F: Fn(&Context, &Path, &ProgressBar) -> Result<(), FetchError> + Send + Sync,
{
    fn produce(&self, ctx: &Context, dest: &Path, pb: &ProgressBar) -> Result<(), FetchError> {
        (self.run)(ctx, dest, pb)
    }

    fn can_recover(&self) -> bool {
        self.recoverable
    }
}

/// Value producer backed by a closure.
pub struct CustomValue<F> {
    compute: F,
}

impl<F> CustomValue<F>
where
    F: Fn(&Context) -> Result<Arc<dyn Any + Send + Sync>, FetchError> + Send + Sync,
{
    pub fn new(compute: F) -> Self {
        Self { compute }
    }
}

impl<F> ValueProducer for CustomValue<F>
where
    F: Fn(&Context) -> Result<Arc<dyn Any + Send + Sync>, FetchError> + Send + Sync,
{
    fn value(&self, ctx: &Context) -> Result<Arc<dyn Any + Send + Sync>, FetchError> {
        (self.compute)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_writes_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = Context::new(tmp.path());
        let dest = tmp.path().join("out.txt");
        let producer = Custom::new(|_ctx, dest, _pb| {
            std::fs::write(dest, b"hello")?;
            Ok(())
        });
        let pb = ProgressBar::hidden();
        producer.produce(&ctx, &dest, &pb).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
        assert!(!producer.can_recover());
    }

    #[test]
    fn recoverable_flag() {
        let producer = Custom::new(|_, _, _| Ok(())).recoverable();
        assert!(producer.can_recover());
    }

    #[test]
    fn value_closure() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = Context::new(tmp.path());
        let producer = CustomValue::new(|_ctx| Ok(Arc::new(41u32 + 1) as Arc<_>));
        let value = producer.value(&ctx).unwrap();
        assert_eq!(*value.downcast::<u32>().ok().unwrap(), 42);
    }
}
