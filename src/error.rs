use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

/// The result type used in the entire crate.
pub type Result<T> = std::result::Result<T, ExperimentErr>;

/// The experiment's error type.
#[derive(Debug)]
pub enum ExperimentErr {
    Io(io::Error),
    Json(serde_json::Error),
    Image(image::ImageError),
    Shape(ndarray::ShapeError),
    /// Invalid configuration, caught before the run starts.
    InvalidConfig(String),
    /// A loss was normalized before the training split was materialized.
    TrainSamplesUnset,
    /// Images were sampled before the validation split was materialized.
    SampleSourceUnset,
    /// The validation epoch ended without any step outputs.
    NoValidationOutputs,
    /// A split produced no complete batch.
    EmptySplit {
        split: &'static str,
    },
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    OutOfBounds {
        idx: usize,
        len: usize,
    },
    DatasetFormat {
        path: PathBuf,
        line: usize,
        msg: String,
    },
    Distribution(String),
    Checkpoint(String),
}

impl Display for ExperimentErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExperimentErr::Io(e) => write!(f, "io error: {e}"),
            ExperimentErr::Json(e) => write!(f, "invalid JSON: {e}"),
            ExperimentErr::Image(e) => write!(f, "image error: {e}"),
            ExperimentErr::Shape(e) => write!(f, "shape error: {e}"),
            ExperimentErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            ExperimentErr::TrainSamplesUnset => write!(
                f,
                "the number of training samples is unknown, the training split must be loaded before computing a loss"
            ),
            ExperimentErr::SampleSourceUnset => write!(
                f,
                "there is no sample data source, the validation split must be loaded before sampling images"
            ),
            ExperimentErr::NoValidationOutputs => {
                write!(f, "the validation epoch ended without step outputs")
            }
            ExperimentErr::EmptySplit { split } => {
                write!(f, "the {split} split does not fill a single batch")
            }
            ExperimentErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            ExperimentErr::OutOfBounds { idx, len } => {
                write!(f, "sample index {idx} is out of bounds for a dataset of {len} samples")
            }
            ExperimentErr::DatasetFormat { path, line, msg } => {
                write!(f, "malformed dataset file {}:{line}: {msg}", path.display())
            }
            ExperimentErr::Distribution(msg) => write!(f, "invalid distribution: {msg}"),
            ExperimentErr::Checkpoint(msg) => write!(f, "checkpoint error: {msg}"),
        }
    }
}

impl Error for ExperimentErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ExperimentErr::Io(e) => Some(e),
            ExperimentErr::Json(e) => Some(e),
            ExperimentErr::Image(e) => Some(e),
            ExperimentErr::Shape(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ExperimentErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ExperimentErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<image::ImageError> for ExperimentErr {
    fn from(value: image::ImageError) -> Self {
        Self::Image(value)
    }
}

impl From<ndarray::ShapeError> for ExperimentErr {
    fn from(value: ndarray::ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<safetensors::SafeTensorError> for ExperimentErr {
    fn from(value: safetensors::SafeTensorError) -> Self {
        Self::Checkpoint(value.to_string())
    }
}
