use std::{num::NonZeroUsize, path::PathBuf};

use anyhow::Context;
use clap::Parser;
use log::info;
use rand::{Rng, SeedableRng, rngs::StdRng};

use vae_experiment::{
    arch::VanillaVae,
    configs::{ExperimentConfig, ModelParams},
    experiment::{VaeExperiment, generate_rng},
    metrics::ExperimentLogger,
    training::Trainer,
};

/// Trains a variational autoencoder on face images.
#[derive(Parser, Debug)]
#[command(name = "vae-experiment", version, about, long_about = None)]
struct Args {
    /// Experiment configuration file
    #[arg(short, long, default_value = "configs/vae.json")]
    config: PathBuf,

    /// Overrides trainer_params.max_epochs
    #[arg(short, long)]
    epochs: Option<NonZeroUsize>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = ExperimentConfig::from_path(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    info!("loaded {} from {}", config.model_params.kind(), args.config.display());

    let mut rng = generate_rng(config.logging_params.manual_seed);
    let model = match config.model_params {
        ModelParams::VanillaVae {
            in_channels,
            latent_dim,
            hidden_dim,
        } => VanillaVae::new(
            in_channels.get(),
            config.exp_params.img_size.get() as usize,
            hidden_dim.get(),
            latent_dim.get(),
            StdRng::seed_from_u64(rng.random()),
        )?,
    };

    let logging = &config.logging_params;
    let mut logger = ExperimentLogger::new(&logging.save_dir, &logging.name)?;
    info!("writing run outputs to {}", logger.run_dir().display());

    let mut trainer = Trainer::new(&config.trainer_params);
    if let Some(epochs) = args.epochs {
        trainer = trainer.with_max_epochs(epochs);
    }

    let mut experiment = VaeExperiment::new(model, config)?;
    let report = trainer.fit(&mut experiment, &mut logger)?;

    info!(
        "done: {} epochs, {} steps, last avg_val_loss={:?}",
        report.epochs, report.steps, report.last_val_loss
    );

    Ok(())
}
