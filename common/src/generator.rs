use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};

use crate::field::{Field, FieldParams};

/// Draws a candidate layout: `mine_count` distinct cells, uniformly at random,
/// from everything outside the start's closed neighbourhood.
///
/// Knows nothing about solvability. The result is always a valid field with
/// the start cell revealed.
pub fn generate<R: Rng + ?Sized>(params: &FieldParams, rng: &mut R) -> Field {
    let mut excluded = vec![false; params.area()];
    for index in params.start_area() {
        excluded[index] = true;
    }
    let candidates: Vec<usize> = (0..params.area()).filter(|&index| !excluded[index]).collect();

    let mut layout = vec![false; params.area()];
    // `FieldParams::new` guarantees the mines fit into the candidates.
    for pick in index::sample(rng, candidates.len(), params.mine_count()) {
        layout[candidates[pick]] = true;
    }
    Field::from_layout(*params, layout)
}

/// [`generate`] with a fresh `StdRng` seeded from `seed`.
pub fn generate_seeded(params: &FieldParams, seed: u64) -> Field {
    generate(params, &mut StdRng::seed_from_u64(seed))
}
