mod experiment;
mod model;

use std::{fs, path::Path};

use serde::Deserialize;

pub use experiment::{DatasetKind, ExpParams, LoggingParams, TrainerParams};
pub use model::ModelParams;

use crate::{ExperimentErr, Result};

/// The channels of the tensors the dataset pipelines produce.
pub const IMAGE_CHANNELS: usize = 3;

/// The full, validated configuration of a training run.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ExperimentConfig {
    pub model_params: ModelParams,
    pub exp_params: ExpParams,
    #[serde(default)]
    pub trainer_params: TrainerParams,
    pub logging_params: LoggingParams,
}

impl ExperimentConfig {
    /// Parses and validates a configuration from a JSON document.
    ///
    /// # Errors
    /// Returns an `ExperimentErr` if a key is missing, malformed or out of range.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a configuration file.
    ///
    /// # Errors
    /// Returns an `ExperimentErr` if the file cannot be read or is invalid.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    // -------------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------------

    /// Checks the ranges serde cannot express.
    ///
    /// # Errors
    /// Returns `ExperimentErr::InvalidConfig` describing the first violation.
    pub fn validate(&self) -> Result<()> {
        let exp = &self.exp_params;

        let ModelParams::VanillaVae { in_channels, .. } = &self.model_params;
        if in_channels.get() != IMAGE_CHANNELS {
            return Err(ExperimentErr::InvalidConfig(format!(
                "in_channels must be {IMAGE_CHANNELS} for RGB face images, got {in_channels}"
            )));
        }

        if !(exp.lr.is_finite() && exp.lr > 0.0) {
            return Err(ExperimentErr::InvalidConfig(format!(
                "LR must be a positive number, got {}",
                exp.lr
            )));
        }

        let gamma = exp.scheduler_gamma;
        if !(gamma > 0.0 && gamma <= 1.0) {
            return Err(ExperimentErr::InvalidConfig(format!(
                "scheduler_gamma must be in (0, 1], got {gamma}"
            )));
        }

        if exp.data_path.as_os_str().is_empty() {
            return Err(ExperimentErr::InvalidConfig(
                "data_path must not be empty".into(),
            ));
        }

        if self.logging_params.name.is_empty() {
            return Err(ExperimentErr::InvalidConfig(
                "logging_params.name must not be empty".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Device;

    const CONFIG: &str = r#"{
        "model_params": { "name": "VanillaVAE", "latent_dim": 128 },
        "exp_params": {
            "dataset": "celeba",
            "data_path": "../../shared/Data/",
            "img_size": 64,
            "batch_size": 144,
            "LR": 0.0005,
            "scheduler_gamma": 0.95
        },
        "trainer_params": { "max_epochs": 50, "accelerator": 1 },
        "logging_params": { "save_dir": "logs/", "name": "VanillaVAE", "manual_seed": 1265 }
    }"#;

    #[test]
    fn parses_a_complete_config() {
        let config = ExperimentConfig::from_json_str(CONFIG).unwrap();

        assert_eq!(config.model_params.kind(), "VanillaVAE");
        assert_eq!(config.model_params.latent_dim(), 128);
        let ModelParams::VanillaVae {
            in_channels,
            hidden_dim,
            ..
        } = config.model_params;
        assert_eq!(in_channels.get(), 3);
        assert_eq!(hidden_dim.get(), 512);

        assert_eq!(config.exp_params.batch_size.get(), 144);
        assert_eq!(config.exp_params.img_size.get(), 64);
        assert_eq!(config.exp_params.lr, 0.0005);
        assert_eq!(config.trainer_params.max_epochs.get(), 50);
        assert_eq!(config.trainer_params.device(), Device::Accelerator(1));
        assert!(config.trainer_params.checkpoint);
        assert_eq!(config.logging_params.manual_seed, Some(1265));
        assert!(config.logging_params.run_dir().ends_with("VanillaVAE"));
    }

    #[test]
    fn missing_required_key_fails_at_construction() {
        let without_lr = CONFIG.replace("\"LR\": 0.0005,", "");
        let err = ExperimentConfig::from_json_str(&without_lr).unwrap_err();
        assert!(matches!(err, ExperimentErr::Json(_)), "{err}");
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let zero = CONFIG.replace("\"batch_size\": 144", "\"batch_size\": 0");
        assert!(ExperimentConfig::from_json_str(&zero).is_err());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let bad_gamma = CONFIG.replace("0.95", "1.5");
        let err = ExperimentConfig::from_json_str(&bad_gamma).unwrap_err();
        assert!(matches!(err, ExperimentErr::InvalidConfig(_)));

        let bad_lr = CONFIG.replace("0.0005", "-1.0");
        let err = ExperimentConfig::from_json_str(&bad_lr).unwrap_err();
        assert!(matches!(err, ExperimentErr::InvalidConfig(_)));
    }

    #[test]
    fn trainer_params_default_to_a_single_cpu_epoch() {
        let value: serde_json::Value = serde_json::from_str(CONFIG).unwrap();
        let mut value = value;
        value.as_object_mut().unwrap().remove("trainer_params");

        let config = ExperimentConfig::from_json_str(&value.to_string()).unwrap();
        assert_eq!(config.trainer_params, TrainerParams::default());
        assert_eq!(config.trainer_params.device(), Device::Cpu);
    }

    #[test]
    fn non_rgb_models_are_rejected() {
        for channels in [1, 2, 4] {
            let config = CONFIG.replace(
                "\"latent_dim\": 128",
                &format!("\"in_channels\": {channels}, \"latent_dim\": 128"),
            );

            let err = ExperimentConfig::from_json_str(&config).unwrap_err();
            assert!(matches!(err, ExperimentErr::InvalidConfig(_)), "{err}");
        }

        let rgb = CONFIG.replace(
            "\"latent_dim\": 128",
            "\"in_channels\": 3, \"latent_dim\": 128",
        );
        assert!(ExperimentConfig::from_json_str(&rgb).is_ok());
    }
}
