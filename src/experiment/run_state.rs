use std::fmt;

use crate::{ExperimentErr, Result, data::DataLoader, tensor::Device};

/// The mutable context threaded through every lifecycle hook of a run.
#[derive(Clone, Default)]
pub struct RunState {
    /// The device of the last training batch, latents are sampled next to it.
    pub current_device: Device,
    /// The size of the training split, known once its loader is built.
    pub num_train_samples: Option<usize>,
    /// The cached validation loader reconstructions are drawn from.
    pub sample_loader: Option<DataLoader>,
    pub epoch: usize,
    pub global_step: usize,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The weight of the KL term for batches of `batch_size` samples.
    ///
    /// # Errors
    /// Returns `ExperimentErr::TrainSamplesUnset` if the training split hasn't been loaded.
    pub fn kld_weight(&self, batch_size: usize) -> Result<f32> {
        match self.num_train_samples {
            Some(n) if n > 0 => Ok(batch_size as f32 / n as f32),
            _ => Err(ExperimentErr::TrainSamplesUnset),
        }
    }
}

impl fmt::Debug for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunState")
            .field("current_device", &self.current_device)
            .field("num_train_samples", &self.num_train_samples)
            .field("sample_loader", &self.sample_loader.is_some())
            .field("epoch", &self.epoch)
            .field("global_step", &self.global_step)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kld_weight_needs_the_training_split() {
        let mut state = RunState::new();
        assert!(matches!(state.kld_weight(4), Err(ExperimentErr::TrainSamplesUnset)));

        state.num_train_samples = Some(16);
        assert_eq!(state.kld_weight(4).unwrap(), 0.25);
    }
}
