//! Image grids for qualitative inspection of samples and reconstructions.

use std::path::Path;

use image::{Rgb, RgbImage};
use ndarray::{Array3, Array4, Axis, s};

use crate::{ExperimentErr, Result, tensor::Images};

/// Padding between grid cells, in pixels.
pub const PADDING: usize = 2;

/// The amount of images per grid row for a batch of `batch_size` images.
pub fn grid_nrow(batch_size: usize) -> usize {
    batch_size.isqrt().max(1)
}

/// Min-max normalizes the whole batch into `[0, 1]`. NaNs are left as they are.
fn normalize(images: &Array4<f32>) -> Array4<f32> {
    let (lo, hi) = images
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });

    // Empty, or every value is NaN.
    if lo > hi {
        return images.clone();
    }

    let range = (hi - lo).max(1e-5);

    images.mapv(|v| (v.clamp(lo, hi) - lo) / range)
}

/// Tiles a batch of images laid out as `(N, C, H, W)` into a single `(3, H', W')` image.
///
/// Values are min-max normalized over the whole batch. Single channel images are
/// replicated to RGB. Cells are separated by `PADDING` pixels of zeros.
///
/// # Arguments
/// * `images` - The batch to tile, must not be empty.
/// * `nrow` - The amount of images per grid row.
///
/// # Errors
/// Returns `ExperimentErr::SizeMismatch` if the images have neither 1 nor 3 channels.
pub fn make_grid(images: &Array4<f32>, nrow: usize) -> Result<Array3<f32>> {
    let (n, c, h, w) = images.dim();
    if c != 1 && c != 3 {
        return Err(ExperimentErr::SizeMismatch {
            what: "grid channels",
            got: c,
            expected: 3,
        });
    }

    let images = normalize(images);
    let images = if c == 1 {
        let mut rgb = Array4::zeros((n, 3, h, w));
        for mut channel in rgb.axis_iter_mut(Axis(1)) {
            channel.assign(&images.index_axis(Axis(1), 0));
        }
        rgb
    } else {
        images
    };

    if n == 1 {
        return Ok(images.index_axis(Axis(0), 0).to_owned());
    }

    let xmaps = nrow.clamp(1, n.max(1));
    let ymaps = n.div_ceil(xmaps);
    let (cell_h, cell_w) = (h + PADDING, w + PADDING);
    let mut grid = Array3::zeros((3, cell_h * ymaps + PADDING, cell_w * xmaps + PADDING));

    for (k, image) in images.outer_iter().enumerate() {
        let (y, x) = (k / xmaps, k % xmaps);
        let top = y * cell_h + PADDING;
        let left = x * cell_w + PADDING;

        grid.slice_mut(s![.., top..top + h, left..left + w]).assign(&image);
    }

    Ok(grid)
}

/// Converts a `(3, H, W)` grid with values in `[0, 1]` into an 8 bit image.
fn to_rgb(grid: &Array3<f32>) -> RgbImage {
    let (_, h, w) = grid.dim();
    let byte = |v: f32| (v * 255. + 0.5).clamp(0., 255.) as u8;

    RgbImage::from_fn(w as u32, h as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        Rgb([
            byte(grid[[0, y, x]]),
            byte(grid[[1, y, x]]),
            byte(grid[[2, y, x]]),
        ])
    })
}

/// Writes a normalized grid of `images` as a PNG file at `path`.
///
/// # Errors
/// Returns an `ExperimentErr` if the images can't be tiled or the file cannot be written.
pub fn save_image_grid<P: AsRef<Path>>(images: &Images, path: P, nrow: usize) -> Result<()> {
    let grid = make_grid(images.data(), nrow)?;
    to_rgb(&grid).save(path)?;
    Ok(())
}
