use std::{fs, path::Path, sync::Arc};

use image::{Rgb, RgbImage};
use ndarray::{Array1, Array4};
use rand::{SeedableRng, rngs::StdRng};
use serde_json::json;
use tempfile::TempDir;

use vae_experiment::{
    ExperimentErr, Result,
    arch::{ForwardOutput, GenerativeModel, LossTerms, VanillaVae},
    configs::ExperimentConfig,
    data::{InMemorySource, Split, SplitSource},
    experiment::{AVG_VAL_LOSS, RunState, VaeExperiment},
    metrics::{ExperimentLogger, MemorySink, MetricsSink},
    optimization::Optimizer,
    tensor::{Device, Images, Matrix},
    training::{Trainer, checkpoint},
};

const BATCH_SIZE: usize = 4;
const LATENT_DIM: usize = 3;
const IMG_SIZE: usize = 4;

/// Reconstructs its input unchanged and records every call it receives.
#[derive(Default)]
struct RecordingModel {
    forwards: Vec<Device>,
    decodes: Vec<(Vec<usize>, Device)>,
    params: Vec<f32>,
    grad: Vec<f32>,
}

impl RecordingModel {
    fn new() -> Self {
        Self {
            params: vec![0.; 2],
            grad: vec![0.; 2],
            ..Default::default()
        }
    }
}

#[derive(Debug)]
struct Reconstruction {
    recons: Images,
}

impl ForwardOutput for Reconstruction {
    fn reconstruction(&self) -> &Images {
        &self.recons
    }
}

impl GenerativeModel for RecordingModel {
    type Output = Reconstruction;

    fn latent_dim(&self) -> usize {
        LATENT_DIM
    }

    fn num_params(&self) -> usize {
        self.params.len()
    }

    fn forward(&mut self, input: &Images, _labels: Option<&Matrix>) -> Result<Reconstruction> {
        self.forwards.push(input.device());
        Ok(Reconstruction {
            recons: input.clone(),
        })
    }

    fn loss_function(&self, _output: &Reconstruction, kld_weight: f32) -> Result<LossTerms> {
        Ok(LossTerms::new(kld_weight).with("Reconstruction_Loss", 0.))
    }

    fn backward(&mut self, _output: &Reconstruction, _kld_weight: f32) -> Result<()> {
        self.grad.iter_mut().for_each(|g| *g += 1.);
        Ok(())
    }

    fn decode(&mut self, z: &Matrix) -> Result<Images> {
        self.decodes.push((z.shape().to_vec(), z.device()));
        let n = z.shape()[0];
        Ok(Images::on(Array4::zeros((n, 3, IMG_SIZE, IMG_SIZE)), z.device()))
    }

    fn params(&self) -> &[f32] {
        &self.params
    }

    fn params_and_grad(&mut self) -> (&mut [f32], &[f32]) {
        (&mut self.params, &self.grad)
    }

    fn zero_grad(&mut self) {
        self.grad.fill(0.);
    }
}

fn config(save_dir: &Path, max_epochs: usize, accelerator: Option<usize>) -> ExperimentConfig {
    let value = json!({
        "model_params": { "name": "VanillaVAE", "latent_dim": LATENT_DIM, "hidden_dim": 16 },
        "exp_params": {
            "dataset": "celeba",
            "data_path": "unused",
            "img_size": IMG_SIZE,
            "batch_size": BATCH_SIZE,
            "LR": 0.001,
            "scheduler_gamma": 0.95
        },
        "trainer_params": { "max_epochs": max_epochs, "accelerator": accelerator },
        "logging_params": { "save_dir": save_dir, "name": "run", "manual_seed": 7 }
    });

    ExperimentConfig::from_json_str(&value.to_string()).unwrap()
}

fn faces(n: usize) -> Vec<(RgbImage, Array1<f32>)> {
    (0..n)
        .map(|i| {
            let image = RgbImage::from_fn(150, 160, |x, y| {
                Rgb([(x * 3 + i as u32) as u8, (y * 2) as u8, (x ^ y) as u8])
            });
            (image, Array1::from_elem(2, (i % 2) as f32))
        })
        .collect()
}

fn source() -> Arc<dyn SplitSource> {
    Arc::new(InMemorySource::new(faces(10), faces(5)))
}

fn recording_experiment(dir: &Path) -> VaeExperiment<RecordingModel> {
    VaeExperiment::with_source(RecordingModel::new(), config(dir, 1, None), source()).unwrap()
}

#[test]
fn training_step_before_the_training_provider_fails() {
    let dir = TempDir::new().unwrap();
    let mut exp = recording_experiment(dir.path());
    let mut state = RunState::new();
    let mut sink = MemorySink::new();

    let mut valid = exp.validation_dataset_provider(&mut state).unwrap();
    let batch = valid.iter().next().unwrap().unwrap();

    let err = exp
        .training_step(&mut state, batch.clone(), 0, &mut sink)
        .unwrap_err();
    assert!(matches!(err, ExperimentErr::TrainSamplesUnset));

    let err = exp.validation_step(&state, batch, 0).unwrap_err();
    assert!(matches!(err, ExperimentErr::TrainSamplesUnset));
    assert!(sink.records.is_empty());
}

#[test]
fn training_step_logs_every_term_at_the_global_step() {
    let dir = TempDir::new().unwrap();
    let mut exp = recording_experiment(dir.path());
    let mut state = RunState::new();
    let mut sink = MemorySink::new();

    let mut train = exp.training_dataset_provider(&mut state).unwrap();
    state.global_step = 5;
    let batch = train.iter().next().unwrap().unwrap();

    let step = exp.training_step(&mut state, batch, 0, &mut sink).unwrap();

    let weight = BATCH_SIZE as f32 / 10.;
    assert_eq!(step.kld_weight, weight);
    assert_eq!(step.terms.loss(), weight);
    assert_eq!(sink.records.len(), 1);
    assert_eq!(sink.records[0].0, 5);
    assert_eq!(&sink.records[0].1, step.terms.as_map());
}

#[test]
fn sample_images_decodes_one_latent_per_batch_sample() {
    let dir = TempDir::new().unwrap();
    let mut exp = recording_experiment(dir.path());
    let mut state = RunState::new();

    exp.validation_dataset_provider(&mut state).unwrap();
    state.current_device = Device::Accelerator(1);
    state.epoch = 2;
    exp.sample_images(&mut state).unwrap();

    let model = exp.model();
    assert_eq!(
        model.decodes,
        vec![(vec![BATCH_SIZE, LATENT_DIM], Device::Accelerator(1))]
    );
    // The reconstructed batch is moved next to the training data.
    assert_eq!(model.forwards, vec![Device::Accelerator(1)]);

    let run_dir = dir.path().join("run");
    assert!(run_dir.join("sample_2.png").is_file());
    assert!(run_dir.join("recons_2.png").is_file());
}

#[test]
fn latents_stay_on_the_cpu_without_an_accelerator() {
    let dir = TempDir::new().unwrap();
    let mut exp = recording_experiment(dir.path());
    let mut state = RunState::new();

    exp.validation_dataset_provider(&mut state).unwrap();
    exp.sample_images(&mut state).unwrap();

    assert_eq!(exp.model().decodes[0].1, Device::Cpu);
}

#[test]
fn sample_images_without_the_validation_provider_fails() {
    let dir = TempDir::new().unwrap();
    let mut exp = recording_experiment(dir.path());

    let err = exp.sample_images(&mut RunState::new()).unwrap_err();
    assert!(matches!(err, ExperimentErr::SampleSourceUnset));
    assert!(exp.model().decodes.is_empty());
}

#[test]
fn validation_epoch_end_averages_the_losses() {
    let dir = TempDir::new().unwrap();
    let mut exp = recording_experiment(dir.path());
    let mut state = RunState::new();
    exp.validation_dataset_provider(&mut state).unwrap();

    let outputs = [LossTerms::new(1.), LossTerms::new(3.)];
    let summary = exp.validation_epoch_end(&mut state, &outputs).unwrap();

    assert_eq!(summary.avg_val_loss, 2.);
    assert_eq!(summary.log.get(AVG_VAL_LOSS), Some(&2.));
    assert_eq!(exp.model().decodes.len(), 1);
}

#[test]
fn validation_epoch_end_without_outputs_fails() {
    let dir = TempDir::new().unwrap();
    let mut exp = recording_experiment(dir.path());
    let mut state = RunState::new();
    exp.validation_dataset_provider(&mut state).unwrap();

    let err = exp.validation_epoch_end(&mut state, &[]).unwrap_err();
    assert!(matches!(err, ExperimentErr::NoValidationOutputs));
}

#[test]
fn a_single_optimizer_with_the_configured_rate() {
    let dir = TempDir::new().unwrap();
    let exp = recording_experiment(dir.path());

    let optimizers = exp.configure_optimizers();
    assert_eq!(optimizers.len(), 1);
    assert_eq!(optimizers[0].learning_rate(), 0.001);
}

#[test]
fn a_split_smaller_than_a_batch_is_rejected() {
    let dir = TempDir::new().unwrap();
    let source: Arc<dyn SplitSource> = Arc::new(InMemorySource::new(faces(3), faces(5)));
    let mut exp =
        VaeExperiment::with_source(RecordingModel::new(), config(dir.path(), 1, None), source)
            .unwrap();

    let err = exp
        .training_dataset_provider(&mut RunState::new())
        .err()
        .unwrap();
    assert!(matches!(err, ExperimentErr::EmptySplit { split: "train" }));
}

#[test]
fn transform_pipeline_is_deterministic_for_a_fixed_seed() {
    let dir = TempDir::new().unwrap();
    let exp = recording_experiment(dir.path());
    let image = faces(1).remove(0).0;

    let a = exp
        .build_transform_pipeline()
        .apply(image.clone(), &mut StdRng::seed_from_u64(1));
    let b = exp
        .build_transform_pipeline()
        .apply(image, &mut StdRng::seed_from_u64(1));

    assert_eq!(a, b);
    assert_eq!(a.dim(), (3, IMG_SIZE, IMG_SIZE));
    assert!(a.iter().all(|v| (-1.0..=1.0).contains(v)));

    let train = source()
        .open(Split::Train, exp.build_transform_pipeline())
        .unwrap();
    assert_eq!(train.len(), 10);
}

#[test]
fn fit_drives_every_hook_on_the_configured_device() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), 2, Some(0));
    let trainer = Trainer::new(&config.trainer_params);
    let mut exp = VaeExperiment::with_source(RecordingModel::new(), config, source()).unwrap();
    let mut sink = MemorySink::new();

    let report = trainer.fit(&mut exp, &mut sink).unwrap();

    // 10 training samples in batches of 4, the last one dropped.
    assert_eq!(report.steps, 4);
    assert_eq!(report.epochs, 2);
    assert_eq!(report.state.current_device, Device::Accelerator(0));
    assert_eq!(report.last_val_loss, Some(0.4));

    // One record per step plus one validation summary per epoch.
    assert_eq!(sink.records.len(), 6);
    assert!(sink.records[2].1.contains_key(AVG_VAL_LOSS));

    let model = exp.model();
    assert!(model.forwards.iter().all(|d| *d == Device::Accelerator(0)));
    assert_eq!(model.decodes.len(), 2);
    // The gradient is constant and positive, so every update is a decrease.
    assert!(model.params.iter().all(|p| *p < 0.));
}

#[test]
fn fit_trains_a_vanilla_vae_and_writes_its_outputs() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), 2, None);
    let trainer = Trainer::new(&config.trainer_params);

    let model = VanillaVae::new(3, IMG_SIZE, 16, LATENT_DIM, StdRng::seed_from_u64(0)).unwrap();
    let initial = model.params().to_vec();
    let mut exp = VaeExperiment::with_source(model, config, source()).unwrap();
    let mut logger = ExperimentLogger::new(dir.path(), "run").unwrap();

    let report = trainer.fit(&mut exp, &mut logger).unwrap();
    assert!(report.last_val_loss.is_some_and(f32::is_finite));
    assert_ne!(exp.model().params(), initial.as_slice());

    let run_dir = dir.path().join("run");
    for file in ["sample_0.png", "recons_0.png", "sample_1.png", "recons_1.png"] {
        assert!(run_dir.join(file).is_file(), "missing {file}");
    }

    let metrics = fs::read_to_string(run_dir.join("metrics.jsonl")).unwrap();
    assert_eq!(metrics.lines().count(), 6);
    assert!(metrics.lines().next().unwrap().contains("Reconstruction_Loss"));

    let mut restored =
        VanillaVae::new(3, IMG_SIZE, 16, LATENT_DIM, StdRng::seed_from_u64(1)).unwrap();
    let epoch =
        checkpoint::load_checkpoint(&mut restored, checkpoint::checkpoint_path(&run_dir, 1))
            .unwrap();
    assert_eq!(epoch, 1);
    assert_eq!(restored.params(), exp.model().params());
}

#[test]
fn metrics_sink_is_an_object_safe_seam() {
    let mut sinks: Vec<Box<dyn MetricsSink>> = vec![Box::new(MemorySink::new())];
    let metrics = LossTerms::new(1.).as_map().clone();

    for sink in sinks.iter_mut() {
        sink.log_metrics(&metrics, 0).unwrap();
    }
}
