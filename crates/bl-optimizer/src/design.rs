//! Space-filling samples over a domain: initial designs and restart anchors.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use bl_types::{BlResult, Domain};

/// The explicit, seedable generator threaded through sampling and restarts.
pub type SeededRng = ChaCha8Rng;

pub fn seeded_rng(seed: u64) -> SeededRng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// How candidate points are spread over the box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeedSampling {
    /// Independent uniform draws.
    Uniform,
    /// One draw per stratum in every column.
    LatinHypercube,
}

impl Default for SeedSampling {
    fn default() -> Self {
        Self::Uniform
    }
}

/// `count` points inside the box, in model space and not rounded.
pub fn sample_box<R: Rng>(
    bounds: &[(f64, f64)],
    count: usize,
    sampling: SeedSampling,
    rng: &mut R,
) -> Vec<Vec<f64>> {
    match sampling {
        SeedSampling::Uniform => (0..count)
            .map(|_| {
                bounds
                    .iter()
                    .map(|(low, high)| low + rng.gen::<f64>() * (high - low))
                    .collect()
            })
            .collect(),
        SeedSampling::LatinHypercube => {
            let mut points = vec![vec![0.0; bounds.len()]; count];
            for (col, (low, high)) in bounds.iter().enumerate() {
                let mut strata: Vec<usize> = (0..count).collect();
                strata.shuffle(rng);
                for (point, stratum) in points.iter_mut().zip(strata) {
                    let t = (stratum as f64 + rng.gen::<f64>()) / count as f64;
                    point[col] = low + t * (high - low);
                }
            }
            points
        }
    }
}

/// Uniform random initial design, rounded to admissible domain values.
///
/// The domain is validated first, so empty value sets are an error rather
/// than a panic.
pub fn random_design<R: Rng>(
    domain: &Domain,
    count: usize,
    rng: &mut R,
) -> BlResult<Vec<Vec<f64>>> {
    domain.validate()?;
    Ok(sample_box(&domain.bounds(), count, SeedSampling::Uniform, rng)
        .into_iter()
        .map(|x| domain.round(&x))
        .collect())
}
