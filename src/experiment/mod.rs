mod run_state;
mod vae;

use rand::{SeedableRng, rngs::StdRng};

pub use run_state::RunState;
pub use vae::{AVG_VAL_LOSS, StepOutput, VaeExperiment, ValidationSummary};

/// Creates the rng of a run, seeded when `seed` is given and from the OS otherwise.
pub fn generate_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}
