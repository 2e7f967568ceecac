pub mod activations;
mod init;
pub mod layers;
mod model;
mod vanilla;

pub use model::{ForwardOutput, GenerativeModel, LOSS, LossTerms};
pub use vanilla::{VaeOutput, VanillaVae};
