use ndarray::{Axis, linalg, prelude::*};
use rand::Rng;

use crate::{
    ExperimentErr, Result,
    arch::{activations::ActFn, init},
};

/// The values a `Dense` forward pass produces, kept for its backward pass.
#[derive(Debug, Clone)]
pub struct DenseOut {
    z: Array2<f32>,
    a: Option<Array2<f32>>,
}

impl DenseOut {
    /// The layer's output: the activation if the layer has one, the weighted sum otherwise.
    pub fn output(&self) -> ArrayView2<'_, f32> {
        self.a.as_ref().unwrap_or(&self.z).view()
    }

    pub fn into_output(self) -> Array2<f32> {
        self.a.unwrap_or(self.z)
    }
}

/// A fully connected layer reading its weights and biases from a flat parameter slice.
///
/// The slice layout is `dim.0 * dim.1` row-major weights followed by `dim.1` biases.
#[derive(Debug, Clone)]
pub struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
    size: usize,
}

impl Dense {
    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `dim` - The input and output dimensions.
    /// * `act_fn` - An optional activation applied to the weighted sum.
    pub fn new(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self {
            dim,
            size: (dim.0 + 1) * dim.1,
            act_fn,
        }
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    /// Initializes the layer's weights with Xavier uniform values and its biases with zeros.
    ///
    /// # Arguments
    /// * `params` - This layer's parameter slice.
    /// * `rng` - A random number generator.
    pub fn init_params<R: Rng>(&self, params: &mut [f32], rng: &mut R) -> Result<()> {
        self.check_len("dense params", params.len())?;

        let w_size = self.size - self.dim.1;
        let (weights, biases) = params.split_at_mut(w_size);
        init::xavier_uniform(rng, self.dim.0, self.dim.1, weights)?;
        biases.fill(0.);
        Ok(())
    }

    /// Makes a forward pass through the layer.
    ///
    /// # Arguments
    /// * `params` - This layer's parameter slice.
    /// * `x` - The input, one sample per row.
    ///
    /// # Returns
    /// The weighted sum and activation, or an error if the sizes don't match.
    pub fn forward(&self, params: &[f32], x: ArrayView2<f32>) -> Result<DenseOut> {
        let (w, b) = self.view_params(params)?;

        if x.ncols() != self.dim.0 {
            return Err(ExperimentErr::SizeMismatch {
                what: "dense input",
                got: x.ncols(),
                expected: self.dim.0,
            });
        }

        let mut z = Array2::zeros((x.nrows(), self.dim.1));
        linalg::general_mat_mul(1.0, &x, &w, 0.0, &mut z);
        z += &b;

        let a = self.act_fn.map(|act_fn| z.mapv(|z| act_fn.f(z)));
        Ok(DenseOut { z, a })
    }

    /// Backpropagates `d`, the derivative of the loss with respect to this layer's output.
    /// The parameter gradient is **accumulated** into `grad`.
    ///
    /// # Arguments
    /// * `params` - This layer's parameter slice.
    /// * `grad` - This layer's gradient slice.
    /// * `x` - The input given to the matching forward pass.
    /// * `out` - The output of the matching forward pass.
    /// * `d` - The derivative of the loss with respect to the layer's output.
    ///
    /// # Returns
    /// The derivative of the loss with respect to `x`.
    pub fn backward(
        &self,
        params: &[f32],
        grad: &mut [f32],
        x: ArrayView2<f32>,
        out: &DenseOut,
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        if let Some(act_fn) = &self.act_fn {
            d.zip_mut_with(&out.z, |d, &z| *d *= act_fn.df(z));
        }

        let (w, _) = self.view_params(params)?;
        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &x.t(), &d, 1.0, &mut dw);
        db += &d.sum_axis(Axis(0));

        Ok(d.dot(&w.t()))
    }

    fn check_len(&self, what: &'static str, got: usize) -> Result<()> {
        if got != self.size {
            return Err(ExperimentErr::SizeMismatch {
                what,
                got,
                expected: self.size,
            });
        }

        Ok(())
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        self.check_len("dense grad", grad.len())?;

        let w_size = self.size - self.dim.1;
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw)?;
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        self.check_len("dense params", params.len())?;

        let w_size = self.size - self.dim.1;
        let weights = ArrayView2::from_shape(self.dim, &params[..w_size])?;
        let biases = ArrayView1::from_shape(self.dim.1, &params[w_size..])?;
        Ok((weights, biases))
    }
}
