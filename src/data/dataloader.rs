use std::{num::NonZeroUsize, sync::Arc};

use ndarray::{ArrayView1, ArrayView3, Axis};
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use rayon::prelude::*;

use super::dataset::{Dataset, Sample};
use crate::{
    Result,
    tensor::{Device, Images, Matrix},
};

/// A batch of images with their labels.
#[derive(Debug, Clone)]
pub struct Batch {
    images: Images,
    labels: Matrix,
}

impl Batch {
    pub fn new(images: Images, labels: Matrix) -> Self {
        Self { images, labels }
    }

    /// Laid out as `(N, C, H, W)`.
    pub fn images(&self) -> &Images {
        &self.images
    }

    /// Laid out as `(N, K)`.
    pub fn labels(&self) -> &Matrix {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.images.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Moves both tensors to `device`.
    pub fn to(self, device: Device) -> Self {
        Self {
            images: self.images.to(device),
            labels: self.labels.to(device),
        }
    }

    pub fn into_parts(self) -> (Images, Matrix) {
        (self.images, self.labels)
    }
}

/// Groups the samples of a dataset into batches.
///
/// Every call to `iter` starts a new pass over the dataset, reshuffling it when
/// shuffling is enabled. Cloning a loader clones its rng, so a clone replays the
/// same sequence of passes.
#[derive(Clone)]
pub struct DataLoader {
    dataset: Arc<dyn Dataset>,
    batch_size: NonZeroUsize,
    shuffle: bool,
    drop_last: bool,
    rng: StdRng,
}

impl DataLoader {
    /// Creates a new `DataLoader` that neither shuffles nor drops the last batch.
    ///
    /// # Arguments
    /// * `dataset` - The samples to batch.
    /// * `batch_size` - The amount of samples per batch.
    /// * `rng` - Drives shuffling and the random transforms of every sample.
    pub fn new(dataset: Arc<dyn Dataset>, batch_size: NonZeroUsize, rng: StdRng) -> Self {
        Self {
            dataset,
            batch_size,
            shuffle: false,
            drop_last: false,
            rng,
        }
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Whether to skip the last batch when it has fewer than `batch_size` samples.
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.get()
    }

    /// The amount of samples in the underlying dataset.
    pub fn dataset_len(&self) -> usize {
        self.dataset.len()
    }

    /// The amount of batches in one pass.
    pub fn len(&self) -> usize {
        let n = self.dataset.len();
        let bs = self.batch_size.get();

        if self.drop_last {
            n / bs
        } else {
            n.div_ceil(bs)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts a new pass over the dataset.
    pub fn iter(&mut self) -> Batches<'_> {
        let n = self.dataset.len();
        let bs = self.batch_size.get();

        let mut order: Vec<usize> = (0..n).collect();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }

        let end = if self.drop_last { n - n % bs } else { n };

        Batches {
            dataset: self.dataset.as_ref(),
            rng: &mut self.rng,
            order,
            batch_size: bs,
            cursor: 0,
            end,
        }
    }
}

/// One pass of a `DataLoader`.
pub struct Batches<'a> {
    dataset: &'a dyn Dataset,
    rng: &'a mut StdRng,
    order: Vec<usize>,
    batch_size: usize,
    cursor: usize,
    end: usize,
}

impl Iterator for Batches<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.end {
            return None;
        }

        let stop = (self.cursor + self.batch_size).min(self.end);
        let idxs = &self.order[self.cursor..stop];
        self.cursor = stop;

        Some(load_batch(self.dataset, idxs, self.rng))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.end - self.cursor).div_ceil(self.batch_size);
        (left, Some(left))
    }
}

/// Loads the samples at `idxs` in parallel and stacks them.
fn load_batch(dataset: &dyn Dataset, idxs: &[usize], rng: &mut StdRng) -> Result<Batch> {
    let seeds: Vec<u64> = idxs.iter().map(|_| rng.random()).collect();

    let samples = idxs
        .par_iter()
        .zip(seeds.par_iter())
        .map(|(&idx, &seed)| dataset.get(idx, &mut StdRng::seed_from_u64(seed)))
        .collect::<Result<Vec<Sample>>>()?;

    let images: Vec<ArrayView3<f32>> = samples.iter().map(|s| s.image.view()).collect();
    let labels: Vec<ArrayView1<f32>> = samples.iter().map(|s| s.label.view()).collect();

    let images = ndarray::stack(Axis(0), &images)?;
    let labels = ndarray::stack(Axis(0), &labels)?;

    Ok(Batch::new(Images::new(images), Matrix::new(labels)))
}
