use std::{collections::BTreeMap, fs, sync::Arc};

use log::{debug, info};
use ndarray::Array2;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::StandardNormal;

use super::{RunState, generate_rng};
use crate::{
    ExperimentErr, Result,
    arch::{ForwardOutput, GenerativeModel, LossTerms},
    configs::{DatasetKind, ExperimentConfig},
    data::{Batch, CelebASource, DataLoader, Pipeline, Split, SplitSource},
    grid::{grid_nrow, save_image_grid},
    metrics::MetricsSink,
    optimization::{Adam, ExponentialLr, LrScheduler, Optimizer},
    tensor::{Images, Matrix},
};

/// The key the averaged validation loss is reported under.
pub const AVG_VAL_LOSS: &str = "avg_val_loss";

/// The result of a training step, kept so the driver can run the backward pass.
#[derive(Debug, Clone)]
pub struct StepOutput<O> {
    pub terms: LossTerms,
    pub output: O,
    /// The KL weight the loss was computed with.
    pub kld_weight: f32,
}

/// The outcome of a validation epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationSummary {
    pub avg_val_loss: f32,
    /// The scalars to report, currently only `avg_val_loss`.
    pub log: BTreeMap<String, f32>,
}

/// Trains a generative image model: per step losses, data loading, optimizer setup and
/// periodic sampling of image grids.
///
/// The experiment owns the model. Everything that changes while the run advances lives
/// in the `RunState` handed to each hook.
pub struct VaeExperiment<M: GenerativeModel> {
    model: M,
    config: ExperimentConfig,
    source: Arc<dyn SplitSource>,
    rng: StdRng,
}

impl<M: GenerativeModel> VaeExperiment<M> {
    /// Creates a new `VaeExperiment` reading the dataset named in the config.
    ///
    /// # Errors
    /// Returns `ExperimentErr::InvalidConfig` if the config is out of range.
    pub fn new(model: M, config: ExperimentConfig) -> Result<Self> {
        let source: Arc<dyn SplitSource> = match config.exp_params.dataset {
            DatasetKind::Celeba => Arc::new(CelebASource::new(&config.exp_params.data_path)),
        };

        Self::with_source(model, config, source)
    }

    /// Creates a new `VaeExperiment` reading its splits from `source`.
    ///
    /// # Arguments
    /// * `model` - The model to train.
    /// * `config` - The run configuration, validated here.
    /// * `source` - Opens the training and test splits.
    ///
    /// # Errors
    /// Returns `ExperimentErr::InvalidConfig` if the config is out of range.
    pub fn with_source(
        model: M,
        config: ExperimentConfig,
        source: Arc<dyn SplitSource>,
    ) -> Result<Self> {
        config.validate()?;
        let rng = generate_rng(config.logging_params.manual_seed);

        Ok(Self {
            model,
            config,
            source,
            rng,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    fn batch_size(&self) -> usize {
        self.config.exp_params.batch_size.get()
    }

    // -------------------------------------------------------------------------
    // Steps
    // -------------------------------------------------------------------------

    /// Runs the model on `input`.
    pub fn forward(&mut self, input: &Images, labels: Option<&Matrix>) -> Result<M::Output> {
        self.model.forward(input, labels)
    }

    /// Computes the losses of a training batch and reports them to `sink`.
    ///
    /// Records the device of the batch in `state.current_device`. The KL term is weighted
    /// by `batch_size / num_train_samples`.
    ///
    /// # Errors
    /// Returns `ExperimentErr::TrainSamplesUnset` if `training_dataset_provider` hasn't run,
    /// or the error raised by the model or the sink.
    pub fn training_step(
        &mut self,
        state: &mut RunState,
        batch: Batch,
        batch_idx: usize,
        sink: &mut dyn MetricsSink,
    ) -> Result<StepOutput<M::Output>> {
        let (images, labels) = batch.into_parts();
        state.current_device = images.device();

        let kld_weight = state.kld_weight(self.batch_size())?;
        let output = self.forward(&images, Some(&labels))?;
        let terms = self.model.loss_function(&output, kld_weight)?;

        sink.log_metrics(terms.as_map(), state.global_step)?;
        debug!(
            "epoch={} batch={batch_idx} loss={:.6}",
            state.epoch,
            terms.loss()
        );

        Ok(StepOutput {
            terms,
            output,
            kld_weight,
        })
    }

    /// Computes the losses of a validation batch.
    ///
    /// # Errors
    /// Returns `ExperimentErr::TrainSamplesUnset` if `training_dataset_provider` hasn't run,
    /// or the error raised by the model.
    pub fn validation_step(
        &mut self,
        state: &RunState,
        batch: Batch,
        batch_idx: usize,
    ) -> Result<LossTerms> {
        let (images, labels) = batch.into_parts();

        let kld_weight = state.kld_weight(self.batch_size())?;
        let output = self.forward(&images, Some(&labels))?;
        let terms = self.model.loss_function(&output, kld_weight)?;

        debug!("validation batch={batch_idx} loss={:.6}", terms.loss());
        Ok(terms)
    }

    /// Averages the validation losses of an epoch and writes the epoch's image grids.
    ///
    /// # Errors
    /// Returns `ExperimentErr::NoValidationOutputs` if `outputs` is empty, or the error
    /// raised by `sample_images`.
    pub fn validation_epoch_end(
        &mut self,
        state: &mut RunState,
        outputs: &[LossTerms],
    ) -> Result<ValidationSummary> {
        if outputs.is_empty() {
            return Err(ExperimentErr::NoValidationOutputs);
        }

        let total: f32 = outputs.iter().map(LossTerms::loss).sum();
        let avg_val_loss = total / outputs.len() as f32;

        self.sample_images(state)?;
        info!("epoch {}: {AVG_VAL_LOSS}={avg_val_loss:.6}", state.epoch);

        Ok(ValidationSummary {
            avg_val_loss,
            log: BTreeMap::from([(AVG_VAL_LOSS.to_string(), avg_val_loss)]),
        })
    }

    /// Writes `sample_{epoch}.png`, decoded from `batch_size` latents drawn from
    /// `N(0, I)`, and `recons_{epoch}.png`, the reconstruction of one batch of the
    /// cached validation loader, to the run directory.
    ///
    /// # Errors
    /// Returns `ExperimentErr::SampleSourceUnset` if `validation_dataset_provider` hasn't
    /// run, or the error raised while decoding or writing the grids.
    pub fn sample_images(&mut self, state: &mut RunState) -> Result<()> {
        let loader = state
            .sample_loader
            .as_mut()
            .ok_or(ExperimentErr::SampleSourceUnset)?;

        let batch_size = self.batch_size();
        let nrow = grid_nrow(batch_size);
        let run_dir = self.config.logging_params.run_dir();
        fs::create_dir_all(&run_dir)?;

        let rng = &mut self.rng;
        let z = Array2::from_shape_simple_fn((batch_size, self.model.latent_dim()), || {
            rng.sample(StandardNormal)
        });

        let mut z = Matrix::new(z);
        if state.current_device.is_accelerator() {
            z = z.to(state.current_device);
        }

        let samples = self.model.decode(&z)?;
        let path = run_dir.join(format!("sample_{}.png", state.epoch));
        save_image_grid(&samples, &path, nrow)?;
        debug!("wrote {}", path.display());

        let batch = loader
            .iter()
            .next()
            .ok_or(ExperimentErr::EmptySplit {
                split: Split::Test.name(),
            })??
            .to(state.current_device);

        let recons = self.model.forward(batch.images(), None)?;
        let path = run_dir.join(format!("recons_{}.png", state.epoch));
        save_image_grid(recons.reconstruction(), &path, nrow)?;
        debug!("wrote {}", path.display());

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Optimization
    // -------------------------------------------------------------------------

    /// Creates one Adam optimizer over every parameter of the model, with the configured
    /// learning rate.
    ///
    /// An exponential learning rate schedule with `scheduler_gamma` is built as well but
    /// not handed out, the learning rate stays constant for the whole run.
    pub fn configure_optimizers(&self) -> Vec<Adam> {
        let exp = &self.config.exp_params;
        let optimizer = Adam::with_defaults(self.model.num_params(), exp.lr);
        let scheduler = ExponentialLr::new(&optimizer, exp.scheduler_gamma);

        debug!(
            "built an inactive exponential schedule: gamma={} epoch={}",
            scheduler.gamma(),
            scheduler.last_epoch()
        );

        vec![optimizer]
    }

    /// Runs the backward pass of a training step, accumulating into the model's gradient.
    pub fn backward(&mut self, step: &StepOutput<M::Output>) -> Result<()> {
        self.model.backward(&step.output, step.kld_weight)
    }

    /// Updates the model's parameters with its accumulated gradient.
    pub fn optimizer_step<O: Optimizer>(&mut self, optimizer: &mut O) -> Result<()> {
        let (params, grad) = self.model.params_and_grad();
        optimizer.update_params(grad, params)
    }

    pub fn zero_grad(&mut self) {
        self.model.zero_grad();
    }

    // -------------------------------------------------------------------------
    // Data
    // -------------------------------------------------------------------------

    /// The per-sample transforms shared by both splits.
    pub fn build_transform_pipeline(&self) -> Pipeline {
        Pipeline::celeba(self.config.exp_params.img_size.get())
    }

    /// Opens a split and wraps it in a shuffling loader that drops the incomplete batch.
    fn open_loader(&mut self, split: Split) -> Result<DataLoader> {
        let dataset = self.source.open(split, self.build_transform_pipeline())?;
        let rng = StdRng::seed_from_u64(self.rng.random());

        let loader = DataLoader::new(dataset, self.config.exp_params.batch_size, rng)
            .shuffle(true)
            .drop_last(true);

        if loader.is_empty() {
            return Err(ExperimentErr::EmptySplit {
                split: split.name(),
            });
        }

        info!(
            "{} split: {} samples, {} batches",
            split.name(),
            loader.dataset_len(),
            loader.len()
        );

        Ok(loader)
    }

    /// Builds the training loader and records the size of the training split.
    ///
    /// # Errors
    /// Returns an `ExperimentErr` if the split cannot be opened or doesn't fill a batch.
    pub fn training_dataset_provider(&mut self, state: &mut RunState) -> Result<DataLoader> {
        let loader = self.open_loader(Split::Train)?;
        state.num_train_samples = Some(loader.dataset_len());
        Ok(loader)
    }

    /// Builds the validation loader over the test split and caches a copy of it for
    /// sampling reconstructions.
    ///
    /// # Errors
    /// Returns an `ExperimentErr` if the split cannot be opened or doesn't fill a batch.
    pub fn validation_dataset_provider(&mut self, state: &mut RunState) -> Result<DataLoader> {
        let loader = self.open_loader(Split::Test)?;
        state.sample_loader = Some(loader.clone());
        Ok(loader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        arch::{LOSS, VanillaVae},
        configs::{ExpParams, LoggingParams, ModelParams, TrainerParams},
        data::InMemorySource,
        metrics::MemorySink,
    };
    use image::{Rgb, RgbImage};
    use ndarray::Array1;
    use std::{
        num::{NonZeroU32, NonZeroUsize},
        path::Path,
    };
    use tempfile::TempDir;

    const IMG: u32 = 4;

    fn config(save_dir: &Path) -> ExperimentConfig {
        ExperimentConfig {
            model_params: ModelParams::VanillaVae {
                in_channels: NonZeroUsize::new(3).unwrap(),
                latent_dim: NonZeroUsize::new(2).unwrap(),
                hidden_dim: NonZeroUsize::new(8).unwrap(),
            },
            exp_params: ExpParams {
                dataset: DatasetKind::Celeba,
                data_path: "unused".into(),
                img_size: NonZeroU32::new(IMG).unwrap(),
                batch_size: NonZeroUsize::new(4).unwrap(),
                lr: 1e-3,
                scheduler_gamma: 0.95,
            },
            trainer_params: TrainerParams::default(),
            logging_params: LoggingParams {
                save_dir: save_dir.to_path_buf(),
                name: "vae".into(),
                manual_seed: Some(3),
            },
        }
    }

    fn faces(n: usize) -> Vec<(RgbImage, Array1<f32>)> {
        (0..n)
            .map(|i| {
                let image = RgbImage::from_fn(160, 170, |x, y| Rgb([(x + y + i as u32) as u8; 3]));
                (image, Array1::zeros(3))
            })
            .collect()
    }

    fn experiment(save_dir: &Path) -> VaeExperiment<VanillaVae> {
        let model = VanillaVae::new(3, IMG as usize, 8, 2, StdRng::seed_from_u64(0)).unwrap();
        let source = Arc::new(InMemorySource::new(faces(10), faces(4)));
        VaeExperiment::with_source(model, config(save_dir), source).unwrap()
    }

    #[test]
    fn providers_record_the_run_state() {
        let dir = TempDir::new().unwrap();
        let mut exp = experiment(dir.path());
        let mut state = RunState::new();

        let train = exp.training_dataset_provider(&mut state).unwrap();
        assert_eq!(state.num_train_samples, Some(10));
        assert_eq!(train.len(), 2);

        let valid = exp.validation_dataset_provider(&mut state).unwrap();
        assert_eq!(valid.len(), 1);
        assert!(state.sample_loader.is_some());
    }

    #[test]
    fn training_step_weights_the_kld_by_the_split_size() {
        let dir = TempDir::new().unwrap();
        let mut exp = experiment(dir.path());
        let mut state = RunState::new();
        let mut sink = MemorySink::new();

        let mut train = exp.training_dataset_provider(&mut state).unwrap();
        let batch = train.iter().next().unwrap().unwrap();
        let batch = batch.to(crate::tensor::Device::Accelerator(0));

        let step = exp.training_step(&mut state, batch, 0, &mut sink).unwrap();
        assert_eq!(step.kld_weight, 0.4);
        assert_eq!(state.current_device, crate::tensor::Device::Accelerator(0));
        assert_eq!(sink.records.len(), 1);
        assert!(sink.records[0].1.contains_key(LOSS));
        assert!(sink.records[0].1.contains_key("KLD"));
    }

    #[test]
    fn sample_images_needs_the_validation_loader() {
        let dir = TempDir::new().unwrap();
        let mut exp = experiment(dir.path());
        let mut state = RunState::new();

        let err = exp.sample_images(&mut state).unwrap_err();
        assert!(matches!(err, ExperimentErr::SampleSourceUnset));

        exp.validation_dataset_provider(&mut state).unwrap();
        state.epoch = 4;
        exp.sample_images(&mut state).unwrap();

        let run_dir = dir.path().join("vae");
        assert!(run_dir.join("sample_4.png").is_file());
        assert!(run_dir.join("recons_4.png").is_file());
    }

    #[test]
    fn one_optimizer_covers_every_parameter() {
        let dir = TempDir::new().unwrap();
        let exp = experiment(dir.path());

        let optimizers = exp.configure_optimizers();
        assert_eq!(optimizers.len(), 1);
        assert_eq!(optimizers[0].len(), exp.model().num_params());
        assert_eq!(optimizers[0].learning_rate(), 1e-3);
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let dir = TempDir::new().unwrap();
        let mut config = config(dir.path());
        config.exp_params.lr = 0.;

        let model = VanillaVae::new(3, IMG as usize, 8, 2, StdRng::seed_from_u64(0)).unwrap();
        let res = VaeExperiment::with_source(model, config, Arc::new(InMemorySource::default()));
        assert!(matches!(res, Err(ExperimentErr::InvalidConfig(_))));
    }

    #[test]
    fn two_channel_models_fail_before_any_image_is_written() {
        let dir = TempDir::new().unwrap();
        let mut config = config(dir.path());
        config.model_params = ModelParams::VanillaVae {
            in_channels: NonZeroUsize::new(2).unwrap(),
            latent_dim: NonZeroUsize::new(2).unwrap(),
            hidden_dim: NonZeroUsize::new(8).unwrap(),
        };

        let model = VanillaVae::new(2, IMG as usize, 8, 2, StdRng::seed_from_u64(0)).unwrap();
        let source = Arc::new(InMemorySource::new(faces(4), faces(4)));
        let res = VaeExperiment::with_source(model, config, source);

        assert!(matches!(res, Err(ExperimentErr::InvalidConfig(_))));
        assert!(!dir.path().join("vae").exists());
    }
}
