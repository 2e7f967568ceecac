use std::num::NonZeroUsize;

use serde::Deserialize;

/// The model to train, selected by its `name`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "name")]
pub enum ModelParams {
    #[serde(rename = "VanillaVAE")]
    VanillaVae {
        #[serde(default = "default_in_channels")]
        in_channels: NonZeroUsize,
        latent_dim: NonZeroUsize,
        #[serde(default = "default_hidden_dim")]
        hidden_dim: NonZeroUsize,
    },
}

impl ModelParams {
    /// Returns a stable identifier for the model kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ModelParams::VanillaVae { .. } => "VanillaVAE",
        }
    }

    pub fn latent_dim(&self) -> usize {
        match self {
            ModelParams::VanillaVae { latent_dim, .. } => latent_dim.get(),
        }
    }
}

const DEFAULT_IN_CHANNELS: NonZeroUsize = NonZeroUsize::new(3).unwrap();
const DEFAULT_HIDDEN_DIM: NonZeroUsize = NonZeroUsize::new(512).unwrap();

fn default_in_channels() -> NonZeroUsize {
    DEFAULT_IN_CHANNELS
}

fn default_hidden_dim() -> NonZeroUsize {
    DEFAULT_HIDDEN_DIM
}
