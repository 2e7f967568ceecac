use std::{
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
};

use serde::Deserialize;

use crate::tensor::Device;

/// The datasets the experiment knows how to open.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    #[default]
    Celeba,
}

/// Parameters of the experiment itself: data, batching and optimization.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ExpParams {
    #[serde(default)]
    pub dataset: DatasetKind,
    pub data_path: PathBuf,
    pub img_size: NonZeroU32,
    pub batch_size: NonZeroUsize,
    #[serde(rename = "LR")]
    pub lr: f32,
    pub scheduler_gamma: f32,
}

/// Parameters consumed by the training driver.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TrainerParams {
    #[serde(default = "default_max_epochs")]
    pub max_epochs: NonZeroUsize,
    /// Ordinal of the accelerator to place batches on, `None` for cpu.
    #[serde(default)]
    pub accelerator: Option<usize>,
    #[serde(default = "default_checkpoint")]
    pub checkpoint: bool,
}

impl TrainerParams {
    pub fn device(&self) -> Device {
        match self.accelerator {
            Some(ordinal) => Device::Accelerator(ordinal),
            None => Device::Cpu,
        }
    }
}

impl Default for TrainerParams {
    fn default() -> Self {
        Self {
            max_epochs: default_max_epochs(),
            accelerator: None,
            checkpoint: default_checkpoint(),
        }
    }
}

/// Where and under which name the run writes its outputs.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingParams {
    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,
    pub name: String,
    #[serde(default)]
    pub manual_seed: Option<u64>,
}

impl LoggingParams {
    /// Returns the directory every artifact of this run is written to.
    pub fn run_dir(&self) -> PathBuf {
        self.save_dir.join(&self.name)
    }
}

fn default_max_epochs() -> NonZeroUsize {
    NonZeroUsize::MIN
}

fn default_checkpoint() -> bool {
    true
}

fn default_save_dir() -> PathBuf {
    PathBuf::from("logs")
}
