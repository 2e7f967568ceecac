use std::{path::PathBuf, sync::Arc};

use image::RgbImage;
use ndarray::Array1;

use super::{
    celeba::CelebA,
    dataset::{Dataset, InMemoryDataset, Split},
    transforms::Pipeline,
};
use crate::Result;

/// Opens the splits of a dataset with a given transform pipeline.
pub trait SplitSource: Send + Sync {
    /// Opens `split`, applying `pipeline` to every sample read from it.
    ///
    /// # Errors
    /// Returns an `ExperimentErr` if the split cannot be located or indexed.
    fn open(&self, split: Split, pipeline: Pipeline) -> Result<Arc<dyn Dataset>>;
}

/// The CelebA face dataset, read from `{root}/celeba`.
#[derive(Debug, Clone)]
pub struct CelebASource {
    root: PathBuf,
}

impl CelebASource {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }
}

impl SplitSource for CelebASource {
    fn open(&self, split: Split, pipeline: Pipeline) -> Result<Arc<dyn Dataset>> {
        Ok(Arc::new(CelebA::open(&self.root, split, pipeline)?))
    }
}

type LabeledImages = Vec<(RgbImage, Array1<f32>)>;

/// Decoded images held in memory, one collection for training and one for evaluation.
///
/// The evaluation collection serves both the `Valid` and the `Test` split.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    train: LabeledImages,
    eval: LabeledImages,
}

impl InMemorySource {
    pub fn new(train: LabeledImages, eval: LabeledImages) -> Self {
        Self { train, eval }
    }
}

impl SplitSource for InMemorySource {
    fn open(&self, split: Split, pipeline: Pipeline) -> Result<Arc<dyn Dataset>> {
        let samples: LabeledImages = match split {
            Split::Train => self.train.clone(),
            Split::Valid | Split::Test => self.eval.clone(),
            Split::All => self.train.iter().chain(&self.eval).cloned().collect(),
        };

        let (images, labels) = samples.into_iter().unzip();
        Ok(Arc::new(InMemoryDataset::new(images, labels, pipeline)?))
    }
}
