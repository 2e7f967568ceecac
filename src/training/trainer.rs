use std::num::NonZeroUsize;

use log::{debug, info};

use super::checkpoint::{checkpoint_path, save_checkpoint};
use crate::{
    Result,
    arch::GenerativeModel,
    configs::TrainerParams,
    experiment::{RunState, VaeExperiment},
    metrics::MetricsSink,
    tensor::Device,
};

/// What a finished `fit` went through.
#[derive(Debug, Clone)]
pub struct FitReport {
    pub epochs: usize,
    /// Optimizer steps over the whole run.
    pub steps: usize,
    pub last_val_loss: Option<f32>,
    /// The state the run ended in.
    pub state: RunState,
}

/// Drives an experiment through its lifecycle: optimizer setup, data loading and, for
/// every epoch, a training pass followed by a validation pass.
#[derive(Debug, Clone)]
pub struct Trainer {
    max_epochs: NonZeroUsize,
    device: Device,
    checkpoint: bool,
}

impl Trainer {
    /// Creates a new `Trainer` from the `trainer_params` section of a config.
    pub fn new(params: &TrainerParams) -> Self {
        Self {
            max_epochs: params.max_epochs,
            device: params.device(),
            checkpoint: params.checkpoint,
        }
    }

    pub fn with_max_epochs(mut self, max_epochs: NonZeroUsize) -> Self {
        self.max_epochs = max_epochs;
        self
    }

    pub fn max_epochs(&self) -> usize {
        self.max_epochs.get()
    }

    /// Trains `experiment` for `max_epochs` epochs.
    ///
    /// Every training batch is moved to the configured device, then goes through
    /// `training_step`, the backward pass and one step of every optimizer. After each
    /// training pass, the validation batches go through `validation_step` and the
    /// results through `validation_epoch_end`. A checkpoint of the model is written after
    /// every epoch when enabled.
    ///
    /// # Arguments
    /// * `experiment` - The experiment to train.
    /// * `sink` - Receives the loss terms of every training step and the validation summaries.
    ///
    /// # Errors
    /// Returns the first `ExperimentErr` raised by a lifecycle hook.
    pub fn fit<M: GenerativeModel>(
        &self,
        experiment: &mut VaeExperiment<M>,
        sink: &mut dyn MetricsSink,
    ) -> Result<FitReport> {
        let mut state = RunState::new();
        let mut optimizers = experiment.configure_optimizers();
        let mut train = experiment.training_dataset_provider(&mut state)?;
        let mut valid = experiment.validation_dataset_provider(&mut state)?;
        let run_dir = experiment.config().logging_params.run_dir();

        info!(
            "training {} parameters for {} epochs on {}",
            experiment.model().num_params(),
            self.max_epochs,
            self.device
        );

        let mut last_val_loss = None;

        for epoch in 0..self.max_epochs.get() {
            state.epoch = epoch;

            for (batch_idx, batch) in train.iter().enumerate() {
                let batch = batch?.to(self.device);

                experiment.zero_grad();
                let step = experiment.training_step(&mut state, batch, batch_idx, sink)?;
                experiment.backward(&step)?;

                for optimizer in optimizers.iter_mut() {
                    experiment.optimizer_step(optimizer)?;
                }

                state.global_step += 1;
            }

            let mut outputs = Vec::with_capacity(valid.len());
            for (batch_idx, batch) in valid.iter().enumerate() {
                let batch = batch?.to(self.device);
                outputs.push(experiment.validation_step(&state, batch, batch_idx)?);
            }

            let summary = experiment.validation_epoch_end(&mut state, &outputs)?;
            sink.log_metrics(&summary.log, state.global_step)?;
            last_val_loss = Some(summary.avg_val_loss);

            if self.checkpoint {
                let path = checkpoint_path(&run_dir, epoch);
                save_checkpoint(experiment.model(), &path, epoch)?;
                debug!("saved checkpoint {}", path.display());
            }
        }

        info!("training finished after {} steps", state.global_step);

        Ok(FitReport {
            epochs: self.max_epochs.get(),
            steps: state.global_step,
            last_val_loss,
            state,
        })
    }
}
