//! Deterministic initial levels.

use crate::model::LevelSeed;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Initial level for each of `count` slots, clamped into `[0, max_level_ml]`.
pub fn initial_levels(seed: &LevelSeed, count: u32, max_level_ml: f64) -> Vec<f64> {
    let count = count as usize;
    let clamp = |level: f64| {
        if level.is_finite() {
            level.clamp(0.0, max_level_ml)
        } else {
            0.0
        }
    };

    match seed {
        LevelSeed::Uniform(level) => vec![clamp(*level); count],
        LevelSeed::Explicit(levels) => (0..count)
            .map(|slot| levels.get(slot).copied().map(clamp).unwrap_or(0.0))
            .collect(),
        LevelSeed::Seeded(seed) => {
            let mut rng = StdRng::seed_from_u64(*seed);
            (0..count)
                .map(|_| clamp(f64::from(rng.random_range(500u32..2500))))
                .collect()
        }
    }
}
