use crate::core::error::{PipelineError, Result};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;

/// Draws `requested` distinct indices out of `0..available`, returned in
/// ascending order.
///
/// A seed makes the draw reproducible; without one the generator is seeded
/// from the OS.
pub fn choose_subset(available: usize, requested: usize, seed: Option<u64>) -> Result<Vec<usize>> {
    if requested == 0 || requested > available {
        return Err(PipelineError::InvalidSubset {
            requested,
            available,
        });
    }

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let mut chosen = index::sample(&mut rng, available, requested).into_vec();
    chosen.sort_unstable();
    Ok(chosen)
}
