use std::ops::Range;

use ndarray::{Array2, Array4, ArrayView2, Zip};
use rand::{Rng, rngs::StdRng};
use rand_distr::StandardNormal;

use super::{
    ForwardOutput, GenerativeModel, LossTerms,
    activations::ActFn,
    layers::{Dense, DenseOut},
};
use crate::{
    ExperimentErr, Result,
    tensor::{Images, Matrix},
};

const LEAKY_SLOPE: f32 = 0.01;

/// A fully connected variational autoencoder.
///
/// Images are flattened to `D = C * S * S` features and go through
/// `D -> hidden -> (mu, log_var)`, the reparameterization `z = mu + eps * exp(log_var / 2)`
/// and back through `latent -> hidden -> D` with a `tanh` output, matching the `[-1, 1]`
/// range of the transformed data.
pub struct VanillaVae {
    in_channels: usize,
    img_size: usize,
    latent_dim: usize,

    encoder: Dense,
    fc_mu: Dense,
    fc_var: Dense,
    decoder_input: Dense,
    final_layer: Dense,

    params: Vec<f32>,
    grad: Vec<f32>,
    rng: StdRng,
}

/// Everything a `VanillaVae` forward pass computed.
pub struct VaeOutput {
    recons: Images,
    input: Images,
    cache: ForwardCache,
}

struct ForwardCache {
    x: Array2<f32>,
    encoded: DenseOut,
    mu: DenseOut,
    log_var: DenseOut,
    eps: Array2<f32>,
    z: Array2<f32>,
    decoded: DenseOut,
    out: DenseOut,
}

impl VaeOutput {
    pub fn input(&self) -> &Images {
        &self.input
    }

    pub fn mu(&self) -> ArrayView2<'_, f32> {
        self.cache.mu.output()
    }

    pub fn log_var(&self) -> ArrayView2<'_, f32> {
        self.cache.log_var.output()
    }
}

impl ForwardOutput for VaeOutput {
    fn reconstruction(&self) -> &Images {
        &self.recons
    }
}

impl VanillaVae {
    /// Creates a new `VanillaVae` with freshly initialized parameters.
    ///
    /// # Arguments
    /// * `in_channels` - The channels of the input images.
    /// * `img_size` - The side of the (square) input images.
    /// * `hidden_dim` - The width of the hidden layers.
    /// * `latent_dim` - The dimension of the latent space.
    /// * `rng` - Used for the initialization and afterwards for the reparameterization noise.
    pub fn new(
        in_channels: usize,
        img_size: usize,
        hidden_dim: usize,
        latent_dim: usize,
        rng: StdRng,
    ) -> Result<Self> {
        let features = in_channels * img_size * img_size;
        let leaky = Some(ActFn::leaky_relu(LEAKY_SLOPE));

        let mut model = Self {
            in_channels,
            img_size,
            latent_dim,
            encoder: Dense::new((features, hidden_dim), leaky),
            fc_mu: Dense::new((hidden_dim, latent_dim), None),
            fc_var: Dense::new((hidden_dim, latent_dim), None),
            decoder_input: Dense::new((latent_dim, hidden_dim), leaky),
            final_layer: Dense::new((hidden_dim, features), Some(ActFn::tanh())),
            params: Vec::new(),
            grad: Vec::new(),
            rng,
        };

        let size = model.layers().iter().map(|layer| layer.size()).sum();
        let mut params = vec![0.; size];
        let layers = model.layers().map(Dense::clone);

        for (layer, range) in layers.iter().zip(model.ranges()) {
            layer.init_params(&mut params[range], &mut model.rng)?;
        }

        model.params = params;
        model.grad = vec![0.; size];
        Ok(model)
    }

    fn features(&self) -> usize {
        self.in_channels * self.img_size * self.img_size
    }

    fn layers(&self) -> [&Dense; 5] {
        [
            &self.encoder,
            &self.fc_mu,
            &self.fc_var,
            &self.decoder_input,
            &self.final_layer,
        ]
    }

    /// Where each layer's parameters live in the flat buffers.
    fn ranges(&self) -> [Range<usize>; 5] {
        let mut start = 0;
        self.layers().map(|layer| {
            let range = start..start + layer.size();
            start = range.end;
            range
        })
    }

    fn unflatten(&self, x: Array2<f32>) -> Result<Array4<f32>> {
        let n = x.nrows();
        let s = self.img_size;
        Ok(x.into_shape_with_order((n, self.in_channels, s, s))?)
    }

    /// Runs a forward pass with the given reparameterization noise.
    fn forward_with_noise(&self, input: &Images, eps: Array2<f32>) -> Result<VaeOutput> {
        let (n, c, h, w) = input.data().dim();
        if c * h * w != self.features() || h != self.img_size || w != self.img_size {
            return Err(ExperimentErr::SizeMismatch {
                what: "input features",
                got: c * h * w,
                expected: self.features(),
            });
        }

        let [enc_r, mu_r, var_r, dec_r, out_r] = self.ranges();
        let p = &self.params;

        let x = Array2::from_shape_vec((n, c * h * w), input.data().iter().copied().collect())?;
        let encoded = self.encoder.forward(&p[enc_r], x.view())?;
        let mu = self.fc_mu.forward(&p[mu_r], encoded.output())?;
        let log_var = self.fc_var.forward(&p[var_r], encoded.output())?;

        if eps.dim() != mu.output().dim() {
            return Err(ExperimentErr::SizeMismatch {
                what: "reparameterization noise",
                got: eps.len(),
                expected: mu.output().len(),
            });
        }

        let std = log_var.output().mapv(|v| (0.5 * v).exp());
        let z = &mu.output() + &(&eps * &std);

        let decoded = self.decoder_input.forward(&p[dec_r], z.view())?;
        let out = self.final_layer.forward(&p[out_r], decoded.output())?;
        let recons = self.unflatten(out.output().to_owned())?;

        Ok(VaeOutput {
            recons: Images::on(recons, input.device()),
            input: input.clone(),
            cache: ForwardCache {
                x,
                encoded,
                mu,
                log_var,
                eps,
                z,
                decoded,
                out,
            },
        })
    }
}

impl GenerativeModel for VanillaVae {
    type Output = VaeOutput;

    fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    fn num_params(&self) -> usize {
        self.params.len()
    }

    fn forward(&mut self, input: &Images, _labels: Option<&Matrix>) -> Result<VaeOutput> {
        let shape = (input.shape()[0], self.latent_dim);
        let rng = &mut self.rng;
        let eps = Array2::from_shape_simple_fn(shape, || rng.sample(StandardNormal));

        self.forward_with_noise(input, eps)
    }

    fn loss_function(&self, output: &VaeOutput, kld_weight: f32) -> Result<LossTerms> {
        let cache = &output.cache;

        let recons_loss = (&cache.out.output() - &cache.x)
            .mapv(|v| v.powi(2))
            .mean()
            .unwrap_or_default();

        let mu = output.mu();
        let log_var = output.log_var();
        let n = mu.nrows().max(1) as f32;
        let kld_sum = Zip::from(&mu)
            .and(&log_var)
            .fold(0., |acc, &m, &lv| acc + (1. + lv - m * m - lv.exp()));
        let kld_loss = -0.5 * kld_sum / n;

        let loss = recons_loss + kld_weight * kld_loss;

        Ok(LossTerms::new(loss)
            .with("Reconstruction_Loss", recons_loss)
            .with("KLD", -kld_loss))
    }

    fn backward(&mut self, output: &VaeOutput, kld_weight: f32) -> Result<()> {
        let [enc_r, mu_r, var_r, dec_r, out_r] = self.ranges();
        let cache = &output.cache;
        let params = &self.params;
        let grad = &mut self.grad;

        if params.len() != grad.len() {
            return Err(ExperimentErr::SizeMismatch {
                what: "gradient",
                got: grad.len(),
                expected: params.len(),
            });
        }

        // d(mean squared error) / d(x_hat)
        let scale = 2. / cache.x.len().max(1) as f32;
        let d_out = (&cache.out.output() - &cache.x) * scale;

        let d_decoded = self.final_layer.backward(
            &params[out_r.clone()],
            &mut grad[out_r],
            cache.decoded.output(),
            &cache.out,
            d_out,
        )?;
        let d_z = self.decoder_input.backward(
            &params[dec_r.clone()],
            &mut grad[dec_r],
            cache.z.view(),
            &cache.decoded,
            d_decoded,
        )?;

        let n = cache.x.nrows().max(1) as f32;
        let mu = cache.mu.output();
        let log_var = cache.log_var.output();
        let std = log_var.mapv(|v| (0.5 * v).exp());

        let d_mu = &d_z + &(&mu * (kld_weight / n));
        let d_log_var = (&d_z * &cache.eps) * &std * 0.5f32
            + log_var.mapv(|v| kld_weight * 0.5 * (v.exp() - 1.) / n);

        let d_h_mu = self.fc_mu.backward(
            &params[mu_r.clone()],
            &mut grad[mu_r],
            cache.encoded.output(),
            &cache.mu,
            d_mu,
        )?;
        let d_h_var = self.fc_var.backward(
            &params[var_r.clone()],
            &mut grad[var_r],
            cache.encoded.output(),
            &cache.log_var,
            d_log_var,
        )?;

        self.encoder.backward(
            &params[enc_r.clone()],
            &mut grad[enc_r],
            cache.x.view(),
            &cache.encoded,
            d_h_mu + d_h_var,
        )?;

        Ok(())
    }

    fn decode(&mut self, z: &Matrix) -> Result<Images> {
        if z.data().ncols() != self.latent_dim {
            return Err(ExperimentErr::SizeMismatch {
                what: "latent dimension",
                got: z.data().ncols(),
                expected: self.latent_dim,
            });
        }

        let [_, _, _, dec_r, out_r] = self.ranges();
        let decoded = self.decoder_input.forward(&self.params[dec_r], z.data().view())?;
        let out = self.final_layer.forward(&self.params[out_r], decoded.output())?;

        Ok(Images::on(self.unflatten(out.into_output())?, z.device()))
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
