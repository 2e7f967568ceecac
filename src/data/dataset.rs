use image::RgbImage;
use ndarray::{Array1, Array3};
use rand::rngs::StdRng;

use super::transforms::Pipeline;
use crate::{ExperimentErr, Result};

/// A partition of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Valid,
    Test,
    All,
}

impl Split {
    pub fn name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Valid => "valid",
            Split::Test => "test",
            Split::All => "all",
        }
    }

    /// The partition id used by CelebA's evaluation partition file, `None` for `All`.
    pub fn partition(&self) -> Option<u8> {
        match self {
            Split::Train => Some(0),
            Split::Valid => Some(1),
            Split::Test => Some(2),
            Split::All => None,
        }
    }
}

/// A transformed image with its per-sample label vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Laid out as `(C, H, W)`.
    pub image: Array3<f32>,
    pub label: Array1<f32>,
}

/// A random-access collection of samples.
///
/// `get` receives the rng that drives the random transforms of that sample, so loading
/// a sample is reproducible no matter which thread performs it.
pub trait Dataset: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Loads and transforms the sample at `idx`.
    ///
    /// # Errors
    /// Returns `ExperimentErr::OutOfBounds` if `idx >= len()`, or the error raised while
    /// reading the sample.
    fn get(&self, idx: usize, rng: &mut StdRng) -> Result<Sample>;
}

/// A dataset whose decoded images live in memory.
pub struct InMemoryDataset {
    images: Vec<RgbImage>,
    labels: Vec<Array1<f32>>,
    pipeline: Pipeline,
}

impl InMemoryDataset {
    /// Creates a new `InMemoryDataset`.
    ///
    /// # Errors
    /// Returns `ExperimentErr::SizeMismatch` if there isn't one label per image.
    pub fn new(
        images: Vec<RgbImage>,
        labels: Vec<Array1<f32>>,
        pipeline: Pipeline,
    ) -> Result<Self> {
        if images.len() != labels.len() {
            return Err(ExperimentErr::SizeMismatch {
                what: "dataset labels",
                got: labels.len(),
                expected: images.len(),
            });
        }

        Ok(Self {
            images,
            labels,
            pipeline,
        })
    }
}

impl Dataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.images.len()
    }

    fn get(&self, idx: usize, rng: &mut StdRng) -> Result<Sample> {
        let len = self.len();
        let (image, label) = self
            .images
            .get(idx)
            .zip(self.labels.get(idx))
            .ok_or(ExperimentErr::OutOfBounds { idx, len })?;

        Ok(Sample {
            image: self.pipeline.apply(image.clone(), rng),
            label: label.clone(),
        })
    }
}
