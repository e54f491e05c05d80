//! Materializes the MNIST handwritten-digit dataset.
//!
//! Run with `cargo run --example fetch_mnist`. Interrupt with Ctrl-C
//! and re-run to watch partial downloads resume.

use std::path::PathBuf;

use anyhow::Result;

use curator_core::{init_logging, install_signal_handlers};
use curator_engine::fetch::UrlDownload;
use curator_engine::{Context, DatasetBuilder, Resource};

const MIRROR: &str = "https://ossci-datasets.s3.amazonaws.com/mnist";

struct Mnist {
    train_images: PathBuf,
    train_labels: PathBuf,
    test_images: PathBuf,
    test_labels: PathBuf,
}

fn idx_file(builder: &mut DatasetBuilder, name: &str) -> curator_engine::ResourceId {
    builder.add(Resource::file(
        name,
        UrlDownload::new(format!("{MIRROR}/{name}.gz")).gunzip(),
    ))
}

fn main() -> Result<()> {
    install_signal_handlers();
    let ctx = Context::load()?;
    let multi = ctx.progress.is_tty().then(|| ctx.progress.multi().clone());
    init_logging(false, false, multi.as_ref());

    let mut builder = DatasetBuilder::new("ml.image.mnist");
    let train_images = idx_file(&mut builder, "train-images-idx3-ubyte");
    let train_labels = idx_file(&mut builder, "train-labels-idx1-ubyte");
    let test_images = idx_file(&mut builder, "t10k-images-idx3-ubyte");
    let test_labels = idx_file(&mut builder, "t10k-labels-idx1-ubyte");

    let dataset = builder.build(move |p| {
        Ok(Mnist {
            train_images: p.path(train_images)?,
            train_labels: p.path(train_labels)?,
            test_images: p.path(test_images)?,
            test_labels: p.path(test_labels)?,
        })
    })?;

    let mnist = dataset.prepare(&ctx)?;
    ctx.progress.println(format!(
        "mnist ready:\n  {}\n  {}\n  {}\n  {}",
        mnist.train_images.display(),
        mnist.train_labels.display(),
        mnist.test_images.display(),
        mnist.test_labels.display(),
    ));
    Ok(())
}
