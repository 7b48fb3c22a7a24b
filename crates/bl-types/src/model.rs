//! Collaborator contracts: the surrogate model and the objective.

use crate::dataset::Dataset;
use crate::errors::{BlError, BlResult};

/// Posterior moments and their input gradients at one point.
#[derive(Debug, Clone, PartialEq)]
pub struct Posterior {
    pub mean: f64,
    pub variance: f64,
    pub dmean: Vec<f64>,
    pub dvariance: Vec<f64>,
}

/// A probabilistic surrogate fitted on the accumulated observations.
///
/// Implementations must be `Sync`: acquisition restarts may query one fitted
/// model from several threads at once.
pub trait SurrogateModel: Send + Sync {
    /// Fit (or refit) on the full dataset.
    fn fit(&mut self, dataset: &Dataset) -> BlResult<()>;

    /// Posterior mean and variance at `x`.
    fn predict(&self, x: &[f64]) -> BlResult<(f64, f64)>;

    /// Gradients of the posterior mean and variance with respect to `x`.
    fn predict_gradients(&self, x: &[f64]) -> BlResult<(Vec<f64>, Vec<f64>)>;

    /// Mean, variance and both gradients in one call.
    fn posterior(&self, x: &[f64]) -> BlResult<Posterior> {
        let (mean, variance) = self.predict(x)?;
        let (dmean, dvariance) = self.predict_gradients(x)?;
        Ok(Posterior {
            mean,
            variance,
            dmean,
            dvariance,
        })
    }

    /// Human-readable model name.
    fn name(&self) -> &str;
}

/// The expensive black-box function being optimized.
pub trait Objective {
    fn evaluate(&mut self, x: &[f64]) -> BlResult<f64>;
}

impl<F> Objective for F
where
    F: FnMut(&[f64]) -> BlResult<f64>,
{
    fn evaluate(&mut self, x: &[f64]) -> BlResult<f64> {
        self(x)
    }
}

/// Evaluate and reject non-finite results as objective failures.
pub fn evaluate_checked<O: Objective + ?Sized>(objective: &mut O, x: &[f64]) -> BlResult<f64> {
    let y = objective.evaluate(x).map_err(|e| match e {
        BlError::Objective { .. } => e,
        other => BlError::objective(other.to_string()),
    })?;
    if !y.is_finite() {
        return Err(BlError::objective(format!("non-finite value {y} at {x:?}")));
    }
    Ok(y)
}
