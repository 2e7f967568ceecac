//! Host tensors tagged with the device they are considered to live on.
//!
//! All arithmetic runs on `ndarray` arrays in host memory. The `Device` tag records
//! the placement reported by the data pipeline so that placement decisions (for
//! example moving sampled latents next to the training data) stay observable.

use std::fmt;

use ndarray::{Array, Dimension, Ix2, Ix4};
use serde::{Deserialize, Serialize};

/// A compute device identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    #[default]
    Cpu,
    Accelerator(usize),
}

impl Device {
    /// Returns `true` if this device is an accelerator.
    pub fn is_accelerator(&self) -> bool {
        matches!(self, Device::Accelerator(_))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Accelerator(ordinal) => write!(f, "accelerator:{ordinal}"),
        }
    }
}

/// An `f32` array together with its device.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<D: Dimension> {
    data: Array<f32, D>,
    device: Device,
}

/// A batch of images laid out as `(N, C, H, W)`.
pub type Images = Tensor<Ix4>;

/// A batch of row vectors laid out as `(N, K)`, used for labels and latents.
pub type Matrix = Tensor<Ix2>;

impl<D: Dimension> Tensor<D> {
    /// Creates a new tensor on the cpu.
    pub fn new(data: Array<f32, D>) -> Self {
        Self::on(data, Device::Cpu)
    }

    /// Creates a new tensor on `device`.
    pub fn on(data: Array<f32, D>, device: Device) -> Self {
        Self { data, device }
    }

    /// Moves the tensor to `device`.
    pub fn to(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn data(&self) -> &Array<f32, D> {
        &self.data
    }

    pub fn into_data(self) -> Array<f32, D> {
        self.data
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }
}
