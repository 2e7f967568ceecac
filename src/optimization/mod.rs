mod adam;
mod optimizer;
mod scheduler;

pub use adam::Adam;
pub use optimizer::Optimizer;
pub use scheduler::{ExponentialLr, LrScheduler};
