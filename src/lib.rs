pub mod arch;
pub mod configs;
pub mod data;
pub mod error;
pub mod experiment;
pub mod grid;
pub mod metrics;
pub mod optimization;
pub mod tensor;
pub mod training;

pub use error::{ExperimentErr, Result};
