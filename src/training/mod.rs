pub mod checkpoint;
mod trainer;

pub use trainer::{FitReport, Trainer};
