//! Evaluators turn an acquisition into the next point(s) to evaluate.

use bl_types::{BlResult, Domain};

use crate::acquisition::AcquisitionFunction;
use crate::acquisition_optimizer::{AcquisitionMaximum, AcquisitionOptimizer};
use crate::design::SeededRng;

/// Chooses the points evaluated in one iteration.
///
/// Batch implementations must return points pairwise farther apart than their
/// minimum-distance tolerance, typically by penalizing the acquisition around
/// points already chosen for the batch before reoptimizing.
pub trait Evaluator: Send {
    fn select(
        &mut self,
        acquisition: &dyn AcquisitionFunction,
        domain: &Domain,
        incumbent: Option<&[f64]>,
        rng: &mut SeededRng,
    ) -> BlResult<Vec<Vec<f64>>>;

    /// Number of points returned per call.
    fn batch_size(&self) -> usize;

    /// Human-readable evaluator name.
    fn name(&self) -> &str;
}

/// One point per iteration: the acquisition maximizer.
pub struct Sequential {
    optimizer: AcquisitionOptimizer,
    num_restarts: usize,
    last: Option<AcquisitionMaximum>,
}

impl Sequential {
    pub fn new(optimizer: AcquisitionOptimizer, num_restarts: usize) -> Self {
        Self {
            optimizer,
            num_restarts,
            last: None,
        }
    }

    /// The maximum behind the most recent selection.
    pub fn last_maximum(&self) -> Option<&AcquisitionMaximum> {
        self.last.as_ref()
    }
}

impl Evaluator for Sequential {
    fn select(
        &mut self,
        acquisition: &dyn AcquisitionFunction,
        domain: &Domain,
        incumbent: Option<&[f64]>,
        rng: &mut SeededRng,
    ) -> BlResult<Vec<Vec<f64>>> {
        let maximum = self
            .optimizer
            .maximize(acquisition, domain, self.num_restarts, incumbent, rng)?;
        let point = maximum.x.clone();
        self.last = Some(maximum);
        Ok(vec![point])
    }

    fn batch_size(&self) -> usize {
        1
    }

    fn name(&self) -> &str {
        "sequential"
    }
}
