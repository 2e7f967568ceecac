use std::collections::{BTreeMap, btree_map};

use crate::{
    Result,
    tensor::{Images, Matrix},
};

/// The name of the loss term gradients are computed from.
pub const LOSS: &str = "loss";

/// Named scalar loss terms of a single step. Always holds the `loss` term.
#[derive(Debug, Clone, PartialEq)]
pub struct LossTerms {
    terms: BTreeMap<String, f32>,
}

impl LossTerms {
    /// Creates a new `LossTerms` holding only the optimized `loss`.
    pub fn new(loss: f32) -> Self {
        Self {
            terms: BTreeMap::from([(LOSS.to_string(), loss)]),
        }
    }

    /// Adds a reported term, replacing any previous value under `name`.
    pub fn with(mut self, name: &str, value: f32) -> Self {
        self.terms.insert(name.to_string(), value);
        self
    }

    /// The scalar the optimizer minimizes.
    pub fn loss(&self) -> f32 {
        self.terms[LOSS]
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.terms.get(name).copied()
    }

    pub fn as_map(&self) -> &BTreeMap<String, f32> {
        &self.terms
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, f32> {
        self.terms.iter()
    }
}

/// The output of a model's forward pass.
pub trait ForwardOutput {
    /// The reconstruction of the input batch, laid out like the input.
    fn reconstruction(&self) -> &Images;
}

/// A generative model trainable by the experiment.
///
/// Parameters live in one flat buffer and gradients in another of the same length,
/// so optimizers can update the model without knowing its structure.
pub trait GenerativeModel {
    type Output: ForwardOutput;

    /// Returns the dimension of the latent space `decode` reads from.
    fn latent_dim(&self) -> usize;

    /// Returns the amount of parameters in the model.
    fn num_params(&self) -> usize;

    /// Encodes and reconstructs a batch of images.
    ///
    /// # Arguments
    /// * `input` - The images, laid out as `(N, C, H, W)`.
    /// * `labels` - Per sample labels, ignored by unconditional models.
    fn forward(&mut self, input: &Images, labels: Option<&Matrix>) -> Result<Self::Output>;

    /// Computes the named loss terms of a forward output.
    ///
    /// # Arguments
    /// * `output` - The output of `forward`.
    /// * `kld_weight` - The weight of the KL term, the batch to dataset size ratio.
    fn loss_function(&self, output: &Self::Output, kld_weight: f32) -> Result<LossTerms>;

    /// Computes the gradient of `loss_function(output, kld_weight).loss()` with respect to
    /// the parameters and **accumulates** it into the gradient buffer.
    fn backward(&mut self, output: &Self::Output, kld_weight: f32) -> Result<()>;

    /// Decodes latent vectors laid out as `(N, latent_dim)` into images.
    fn decode(&mut self, z: &Matrix) -> Result<Images>;

    fn params(&self) -> &[f32];

    /// Returns the parameters together with the gradient buffer.
    fn params_and_grad(&mut self) -> (&mut [f32], &[f32]);

    fn zero_grad(&mut self);
}
