//! The aligned CelebA face dataset.
//!
//! Expected layout under the dataset root:
//!
//! ```text
//! celeba/
//!   img_align_celeba/000001.jpg ...
//!   list_eval_partition.txt
//!   list_attr_celeba.txt
//! ```

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use image::ImageReader;
use ndarray::Array1;
use rand::rngs::StdRng;

use super::{
    dataset::{Dataset, Sample, Split},
    transforms::Pipeline,
};
use crate::{ExperimentErr, Result};

pub const BASE_FOLDER: &str = "celeba";
pub const IMAGES_FOLDER: &str = "img_align_celeba";
pub const PARTITIONS_FILE: &str = "list_eval_partition.txt";
pub const ATTRIBUTES_FILE: &str = "list_attr_celeba.txt";

/// One split of CelebA. Images are decoded lazily, on `get`.
pub struct CelebA {
    images_dir: PathBuf,
    filenames: Vec<String>,
    attrs: Vec<Array1<f32>>,
    attr_names: Vec<String>,
    pipeline: Pipeline,
}

impl CelebA {
    /// Indexes the given split of the dataset found under `root`.
    ///
    /// # Arguments
    /// * `root` - The directory holding the `celeba` folder.
    /// * `split` - The partition to index.
    /// * `pipeline` - The transforms applied to every sample.
    ///
    /// # Errors
    /// Returns an `ExperimentErr` if the index files are missing or malformed, or if
    /// a listed image has no attributes.
    pub fn open<P: AsRef<Path>>(root: P, split: Split, pipeline: Pipeline) -> Result<Self> {
        let base = root.as_ref().join(BASE_FOLDER);
        let partitions = read_partitions(&base.join(PARTITIONS_FILE))?;
        let attributes_path = base.join(ATTRIBUTES_FILE);
        let (attr_names, mut attributes) = read_attributes(&attributes_path)?;

        let mut filenames = Vec::new();
        let mut attrs = Vec::new();

        for (filename, partition) in partitions {
            if split.partition().is_some_and(|p| p != partition) {
                continue;
            }

            let Some(attr) = attributes.remove(&filename) else {
                return Err(ExperimentErr::DatasetFormat {
                    path: attributes_path,
                    line: 0,
                    msg: format!("no attributes for {filename}"),
                });
            };

            filenames.push(filename);
            attrs.push(attr);
        }

        log::debug!("indexed {} CelebA images for {}", filenames.len(), split.name());

        Ok(Self {
            images_dir: base.join(IMAGES_FOLDER),
            filenames,
            attrs,
            attr_names,
            pipeline,
        })
    }

    /// The names of the binary attributes, in label order.
    pub fn attr_names(&self) -> &[String] {
        &self.attr_names
    }
}

impl Dataset for CelebA {
    fn len(&self) -> usize {
        self.filenames.len()
    }

    fn get(&self, idx: usize, rng: &mut StdRng) -> Result<Sample> {
        let len = self.len();
        let (filename, label) = self
            .filenames
            .get(idx)
            .zip(self.attrs.get(idx))
            .ok_or(ExperimentErr::OutOfBounds { idx, len })?;

        let image = ImageReader::open(self.images_dir.join(filename))?
            .with_guessed_format()?
            .decode()?
            .to_rgb8();

        Ok(Sample {
            image: self.pipeline.apply(image, rng),
            label: label.clone(),
        })
    }
}

fn format_err(path: &Path, line: usize, msg: impl Into<String>) -> ExperimentErr {
    ExperimentErr::DatasetFormat {
        path: path.to_path_buf(),
        line,
        msg: msg.into(),
    }
}

/// Reads `filename partition` lines.
fn read_partitions(path: &Path) -> Result<Vec<(String, u8)>> {
    let content = fs::read_to_string(path)?;
    let mut partitions = Vec::new();

    for (i, line) in content.lines().enumerate() {
        let mut fields = line.split_whitespace();
        let Some(filename) = fields.next() else {
            continue;
        };

        let partition = fields
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| format_err(path, i + 1, "expected a partition id"))?;

        partitions.push((filename.to_string(), partition));
    }

    Ok(partitions)
}

/// Reads the attribute file: a count line, a header with the attribute names and one
/// `filename v1 .. vk` line per image with values in `{-1, 1}`, mapped to `{0, 1}`.
fn read_attributes(path: &Path) -> Result<(Vec<String>, HashMap<String, Array1<f32>>)> {
    let content = fs::read_to_string(path)?;
    let mut lines = content.lines().enumerate().skip(1);

    let names: Vec<String> = lines
        .next()
        .map(|(_, header)| header.split_whitespace().map(String::from).collect())
        .ok_or_else(|| format_err(path, 2, "missing attribute names"))?;

    let mut attributes = HashMap::new();

    for (i, line) in lines {
        let mut fields = line.split_whitespace();
        let Some(filename) = fields.next() else {
            continue;
        };

        let values = fields
            .map(|v| v.parse::<i8>().map(|v| (v as f32 + 1.) / 2.))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| format_err(path, i + 1, e.to_string()))?;

        if values.len() != names.len() {
            let msg = format!("expected {} attributes, got {}", names.len(), values.len());
            return Err(format_err(path, i + 1, msg));
        }

        attributes.insert(filename.to_string(), Array1::from(values));
    }

    Ok((names, attributes))
}
