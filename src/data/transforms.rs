//! Per-sample image transforms.
//!
//! Transforms run in two stages: operations on decoded `RgbImage`s, then the conversion to a
//! `(C, H, W)` tensor with values in `[0, 1]`, then operations on that tensor.

use image::{
    RgbImage,
    imageops::{self, FilterType},
};
use ndarray::Array3;
use rand::{Rng, rngs::StdRng};

/// The side of the square face crop taken from the aligned CelebA images.
pub const CELEBA_CROP: u32 = 148;

pub trait ImageTransform: Send + Sync {
    fn apply(&self, image: RgbImage, rng: &mut StdRng) -> RgbImage;
}

pub trait TensorTransform: Send + Sync {
    fn apply(&self, tensor: Array3<f32>) -> Array3<f32>;
}

/// Mirrors the image left to right with probability `p`.
#[derive(Debug, Clone, Copy)]
pub struct RandomHorizontalFlip {
    p: f64,
}

impl RandomHorizontalFlip {
    pub fn new(p: f64) -> Self {
        Self { p: p.clamp(0., 1.) }
    }
}

impl Default for RandomHorizontalFlip {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl ImageTransform for RandomHorizontalFlip {
    fn apply(&self, image: RgbImage, rng: &mut StdRng) -> RgbImage {
        if rng.random_bool(self.p) {
            imageops::flip_horizontal(&image)
        } else {
            image
        }
    }
}

/// Crops the central `size x size` square, zero padding images smaller than that.
#[derive(Debug, Clone, Copy)]
pub struct CenterCrop {
    size: u32,
}

impl CenterCrop {
    pub fn new(size: u32) -> Self {
        Self { size }
    }
}

impl ImageTransform for CenterCrop {
    fn apply(&self, mut image: RgbImage, _rng: &mut StdRng) -> RgbImage {
        let s = self.size;
        let (w, h) = image.dimensions();

        if w < s || h < s {
            let mut canvas = RgbImage::new(w.max(s), h.max(s));
            let left = (canvas.width() - w) / 2;
            let top = (canvas.height() - h) / 2;
            imageops::replace(&mut canvas, &image, left as i64, top as i64);
            image = canvas;
        }

        let (w, h) = image.dimensions();
        let top = ((h - s) as f64 / 2.).round_ties_even() as u32;
        let left = ((w - s) as f64 / 2.).round_ties_even() as u32;

        imageops::crop_imm(&image, left, top, s, s).to_image()
    }
}

/// Resizes the shorter side to `size`, keeping the aspect ratio (bilinear filtering).
#[derive(Debug, Clone, Copy)]
pub struct Resize {
    size: u32,
}

impl Resize {
    pub fn new(size: u32) -> Self {
        Self { size }
    }

    /// The output dimensions for an image of `(w, h)`.
    pub fn output_size(&self, w: u32, h: u32) -> (u32, u32) {
        let s = self.size as u64;
        let (w64, h64) = (w as u64, h as u64);

        if w <= h {
            (self.size, (s * h64 / w64.max(1)) as u32)
        } else {
            ((s * w64 / h64.max(1)) as u32, self.size)
        }
    }
}

impl ImageTransform for Resize {
    fn apply(&self, image: RgbImage, _rng: &mut StdRng) -> RgbImage {
        let (w, h) = image.dimensions();
        let (ow, oh) = self.output_size(w, h);

        if (ow, oh) == (w, h) {
            return image;
        }

        imageops::resize(&image, ow, oh, FilterType::Triangle)
    }
}

/// Converts an image to a `(C, H, W)` tensor with values in `[0, 1]`.
pub fn to_tensor(image: &RgbImage) -> Array3<f32> {
    let (w, h) = image.dimensions();

    Array3::from_shape_fn((3, h as usize, w as usize), |(c, y, x)| {
        image.get_pixel(x as u32, y as u32)[c] as f32 / 255.
    })
}

/// Rescales `[0, 1]` values to `[-1, 1]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetRange;

impl TensorTransform for SetRange {
    fn apply(&self, tensor: Array3<f32>) -> Array3<f32> {
        tensor.mapv_into(|x| 2. * x - 1.)
    }
}

/// A composition of transforms turning a decoded image into a tensor.
#[derive(Default)]
pub struct Pipeline {
    image_ops: Vec<Box<dyn ImageTransform>>,
    tensor_ops: Vec<Box<dyn TensorTransform>>,
}

impl Pipeline {
    /// Creates a pipeline that only converts images to tensors.
    pub fn new() -> Self {
        Self::default()
    }

    /// The pipeline used for face images: random horizontal flip, center crop, resize of the
    /// shorter side to `img_size`, conversion to tensor and rescaling to `[-1, 1]`.
    pub fn celeba(img_size: u32) -> Self {
        Self::new()
            .then_image(RandomHorizontalFlip::default())
            .then_image(CenterCrop::new(CELEBA_CROP))
            .then_image(Resize::new(img_size))
            .then_tensor(SetRange)
    }

    /// Appends a transform applied before the tensor conversion.
    pub fn then_image<T: ImageTransform + 'static>(mut self, transform: T) -> Self {
        self.image_ops.push(Box::new(transform));
        self
    }

    /// Appends a transform applied after the tensor conversion.
    pub fn then_tensor<T: TensorTransform + 'static>(mut self, transform: T) -> Self {
        self.tensor_ops.push(Box::new(transform));
        self
    }

    pub fn apply(&self, image: RgbImage, rng: &mut StdRng) -> Array3<f32> {
        let image = self
            .image_ops
            .iter()
            .fold(image, |image, op| op.apply(image, rng));

        self.tensor_ops
            .iter()
            .fold(to_tensor(&image), |tensor, op| op.apply(tensor))
    }
}
