use rand::Rng;
use rand_distr::{Distribution, Uniform};

use crate::{ExperimentErr, Result};

/// Fills `out` with samples of a uniform distribution following Xavier initialization.
///
/// # Arguments
/// * `rng` - A random number generator.
/// * `fan_in` - The number of input units in the weight tensor.
/// * `fan_out` - The number of output units in the weight tensor.
/// * `out` - The weights to fill.
///
/// # Returns
/// An error if the calculated range is invalid.
pub fn xavier_uniform<R: Rng>(
    rng: &mut R,
    fan_in: usize,
    fan_out: usize,
    out: &mut [f32],
) -> Result<()> {
    let range = (6. / (fan_in + fan_out) as f32).sqrt();
    let distribution =
        Uniform::new(-range, range).map_err(|e| ExperimentErr::Distribution(e.to_string()))?;

    out.iter_mut().for_each(|w| *w = distribution.sample(rng));

    Ok(())
}
