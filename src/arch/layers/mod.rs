mod dense;

pub use dense::{Dense, DenseOut};
