//! Multi-restart maximization of an acquisition function over a domain.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use bl_types::{BlError, BlResult, Domain};

use crate::acquisition::AcquisitionFunction;
use crate::design::{sample_box, SeedSampling, SeededRng};
use crate::lbfgs::{self, LbfgsConfig};

/// Restart strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionOptimizerType {
    /// Screen anchors, then run projected L-BFGS from the best ones.
    Lbfgs,
    /// Screen anchors only; the best anchor wins.
    RandomSearch,
}

impl Default for AcquisitionOptimizerType {
    fn default() -> Self {
        Self::Lbfgs
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionOptimizerConfig {
    pub optimizer_type: AcquisitionOptimizerType,
    pub seed_sampling: SeedSampling,
    /// Candidates screened before choosing restart seeds.
    pub anchor_samples: usize,
    pub lbfgs: LbfgsConfig,
    /// Worker threads for restarts; 1 runs them inline.
    pub num_cores: usize,
}

impl Default for AcquisitionOptimizerConfig {
    fn default() -> Self {
        Self {
            optimizer_type: AcquisitionOptimizerType::Lbfgs,
            seed_sampling: SeedSampling::Uniform,
            anchor_samples: 1000,
            lbfgs: LbfgsConfig::default(),
            num_cores: 1,
        }
    }
}

/// Best point found by [`AcquisitionOptimizer::maximize`].
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionMaximum {
    pub x: Vec<f64>,
    pub value: f64,
    /// Index of the restart seed that produced `x`.
    pub seed_index: usize,
    /// False when no restart improved on its seed and the best seed was returned.
    pub improved: bool,
    pub restarts: usize,
}

struct Seed {
    x: Vec<f64>,
    value: f64,
}

struct RestartResult {
    x: Vec<f64>,
    value: f64,
    improved: bool,
}

pub struct AcquisitionOptimizer {
    config: AcquisitionOptimizerConfig,
    pool: Option<rayon::ThreadPool>,
}

impl AcquisitionOptimizer {
    pub fn new(config: AcquisitionOptimizerConfig) -> BlResult<Self> {
        let pool = if config.num_cores > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.num_cores)
                .build()
                .map_err(|e| BlError::Internal(format!("failed to build restart pool: {e}")))?;
            Some(pool)
        } else {
            None
        };
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &AcquisitionOptimizerConfig {
        &self.config
    }

    /// Maximize `acquisition` over `domain` from `num_restarts` seeds.
    ///
    /// Seeds are the best of `anchor_samples` screened candidates, plus the
    /// incumbent when given. The result is deterministic for a fixed rng state
    /// and model, whether restarts run inline or on the pool.
    pub fn maximize<A>(
        &self,
        acquisition: &A,
        domain: &Domain,
        num_restarts: usize,
        incumbent: Option<&[f64]>,
        rng: &mut SeededRng,
    ) -> BlResult<AcquisitionMaximum>
    where
        A: AcquisitionFunction + ?Sized,
    {
        let restarts = num_restarts.max(1);
        let bounds = domain.bounds();

        let mut anchors = sample_box(
            &bounds,
            self.config.anchor_samples.max(restarts),
            self.config.seed_sampling,
            rng,
        );
        if !domain.is_continuous() {
            anchors = anchors.into_iter().map(|x| domain.round(&x)).collect();
        }
        let scores = self.run(&anchors, |x| acquisition.value(x))?;

        let mut order: Vec<usize> = (0..anchors.len()).collect();
        order.sort_by(|&a, &b| rank_key(scores[b]).total_cmp(&rank_key(scores[a])));

        let mut seeds: Vec<Seed> = order
            .into_iter()
            .take(restarts)
            .map(|i| Seed {
                x: anchors[i].clone(),
                value: rank_key(scores[i]),
            })
            .collect();
        if let Some(inc) = incumbent {
            domain.validate_point(inc)?;
            seeds.push(Seed {
                x: inc.to_vec(),
                value: rank_key(acquisition.value(inc)?),
            });
        }

        let results = self.run(&seeds, |seed| self.local_search(acquisition, domain, &bounds, seed))?;

        // Every result is at least as good as its own seed, so the winner is
        // never worse than the best screened seed.
        let index = first_max(results.iter().map(|r| r.value));
        let best = &results[index];
        let stalled = !results.iter().any(|r| r.improved);
        if stalled && self.config.optimizer_type == AcquisitionOptimizerType::Lbfgs {
            warn!(
                "Acquisition optimizer stalled: no restart improved on its seed; using best seed {}",
                index
            );
        }
        let maximum = AcquisitionMaximum {
            x: best.x.clone(),
            value: best.value,
            seed_index: index,
            improved: best.improved,
            restarts: seeds.len(),
        };

        debug!(
            "Acquisition maximum {:.6e} from seed {} of {}",
            maximum.value, maximum.seed_index, maximum.restarts
        );
        Ok(maximum)
    }

    fn local_search<A>(
        &self,
        acquisition: &A,
        domain: &Domain,
        bounds: &[(f64, f64)],
        seed: &Seed,
    ) -> BlResult<RestartResult>
    where
        A: AcquisitionFunction + ?Sized,
    {
        if self.config.optimizer_type == AcquisitionOptimizerType::RandomSearch {
            return Ok(RestartResult {
                x: seed.x.clone(),
                value: seed.value,
                improved: false,
            });
        }

        let negated = |x: &[f64]| -> BlResult<(f64, Vec<f64>)> {
            let (value, gradient) = acquisition.value_and_gradient(x)?;
            Ok((-value, gradient.into_iter().map(|g| -g).collect()))
        };
        let local = lbfgs::minimize(negated, &seed.x, bounds, &self.config.lbfgs)?;

        let x = if domain.is_continuous() {
            local.x
        } else {
            domain.round(&local.x)
        };
        let value = rank_key(acquisition.value(&x)?);
        if value > seed.value {
            Ok(RestartResult {
                x,
                value,
                improved: true,
            })
        } else {
            // Rounding or a poor basin can end below the start; keep the seed.
            Ok(RestartResult {
                x: seed.x.clone(),
                value: seed.value,
                improved: false,
            })
        }
    }

    /// Map over items inline or on the pool, preserving order.
    fn run<T, U, F>(&self, items: &[T], f: F) -> BlResult<Vec<U>>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> BlResult<U> + Sync,
    {
        match &self.pool {
            Some(pool) => pool.install(|| items.par_iter().map(|item| f(item)).collect()),
            None => items.iter().map(f).collect(),
        }
    }
}

/// Non-finite scores rank below everything else.
fn rank_key(value: f64) -> f64 {
    if value.is_nan() {
        f64::NEG_INFINITY
    } else {
        value
    }
}

/// Index of the largest value; the first one wins on ties.
fn first_max(values: impl Iterator<Item = f64>) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (i, v) in values.enumerate() {
        if i == 0 || v > best_value {
            best = i;
            best_value = v;
        }
    }
    best
}
