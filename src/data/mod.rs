mod celeba;
mod dataloader;
mod dataset;
mod source;
mod transforms;

pub use celeba::CelebA;
pub use dataloader::{Batch, Batches, DataLoader};
pub use dataset::{Dataset, InMemoryDataset, Sample, Split};
pub use source::{CelebASource, InMemorySource, SplitSource};
pub use transforms::{
    CELEBA_CROP, CenterCrop, ImageTransform, Pipeline, RandomHorizontalFlip, Resize, SetRange,
    TensorTransform, to_tensor,
};
