//! Acquisition functions: EI, MPI and confidence bounds with analytic gradients.
//!
//! Every acquisition is expressed as a score the optimizer *maximizes*. For the
//! confidence bound this means the lower bound `mu - kappa*sigma` is negated
//! under minimization (score `-mu + kappa*sigma`) and the upper bound
//! `mu + kappa*sigma` is used directly under maximization.

use serde::{Deserialize, Serialize};

use bl_types::{BlResult, Sense, SurrogateModel};

use crate::normal::{norm_cdf, norm_pdf};

/// Standard deviations below this are treated as zero.
pub const SIGMA_FLOOR: f64 = 1e-10;

/// Exploration weight for the confidence bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ExplorationSchedule {
    /// Fixed kappa.
    Constant { kappa: f64 },
    /// GP-UCB schedule `sqrt(2 ln(t^(d/2+2) pi^2 / (3 delta)))`.
    Srinivas { delta: f64 },
}

impl ExplorationSchedule {
    /// Kappa at acquisition iteration `iteration` (1-based) in `dimension` columns.
    pub fn kappa(&self, iteration: usize, dimension: usize) -> f64 {
        match *self {
            Self::Constant { kappa } => kappa,
            Self::Srinivas { delta } => {
                let t = iteration.max(1) as f64;
                let exponent = dimension as f64 / 2.0 + 2.0;
                let pi2 = std::f64::consts::PI * std::f64::consts::PI;
                let arg = exponent * t.ln() + (pi2 / (3.0 * delta)).ln();
                (2.0 * arg).max(0.0).sqrt()
            }
        }
    }
}

impl Default for ExplorationSchedule {
    fn default() -> Self {
        Self::Constant { kappa: 2.0 }
    }
}

/// Which acquisition criterion to use, with its exploration parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AcquisitionType {
    /// Expected Improvement.
    #[serde(rename = "EI")]
    ExpectedImprovement { jitter: f64 },
    /// Maximum Probability of Improvement.
    #[serde(rename = "MPI")]
    ProbabilityOfImprovement { jitter: f64 },
    /// Lower (minimize) / upper (maximize) confidence bound.
    #[serde(rename = "LCB")]
    ConfidenceBound { schedule: ExplorationSchedule },
}

impl AcquisitionType {
    pub fn expected_improvement() -> Self {
        Self::ExpectedImprovement { jitter: 0.0 }
    }

    pub fn probability_of_improvement() -> Self {
        Self::ProbabilityOfImprovement { jitter: 0.0 }
    }

    pub fn confidence_bound() -> Self {
        Self::ConfidenceBound {
            schedule: ExplorationSchedule::default(),
        }
    }

    /// Short tag used in logs and trace file names.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::ExpectedImprovement { .. } => "EI",
            Self::ProbabilityOfImprovement { .. } => "MPI",
            Self::ConfidenceBound { .. } => "LCB",
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match *self {
            Self::ExpectedImprovement { jitter } | Self::ProbabilityOfImprovement { jitter } => {
                if !(jitter >= 0.0 && jitter.is_finite()) {
                    return Err(format!("{} jitter must be finite and >= 0, got {jitter}", self.tag()));
                }
            }
            Self::ConfidenceBound { schedule } => match schedule {
                ExplorationSchedule::Constant { kappa } => {
                    if !(kappa > 0.0 && kappa.is_finite()) {
                        return Err(format!("LCB kappa must be finite and > 0, got {kappa}"));
                    }
                }
                ExplorationSchedule::Srinivas { delta } => {
                    if !(delta > 0.0 && delta < 1.0) {
                        return Err(format!("LCB delta must lie in (0, 1), got {delta}"));
                    }
                }
            },
        }
        Ok(())
    }
}

impl Default for AcquisitionType {
    fn default() -> Self {
        Self::expected_improvement()
    }
}

/// A scalar criterion to maximize, with its gradient.
///
/// Implementations are shared across restart threads and must not cache state
/// between calls.
pub trait AcquisitionFunction: Sync {
    fn value(&self, x: &[f64]) -> BlResult<f64>;

    fn value_and_gradient(&self, x: &[f64]) -> BlResult<(f64, Vec<f64>)>;
}

/// An [`AcquisitionType`] bound to a fitted model and the current incumbent.
pub struct Acquisition<'m, M: SurrogateModel + ?Sized> {
    model: &'m M,
    kind: AcquisitionType,
    best_y: f64,
    sense: Sense,
    iteration: usize,
}

impl<'m, M: SurrogateModel + ?Sized> Acquisition<'m, M> {
    pub fn new(model: &'m M, kind: AcquisitionType, best_y: f64, sense: Sense) -> Self {
        Self {
            model,
            kind,
            best_y,
            sense,
            iteration: 1,
        }
    }

    /// Set the acquisition iteration used by iteration-dependent schedules.
    pub fn at_iteration(mut self, iteration: usize) -> Self {
        self.iteration = iteration;
        self
    }

    pub fn kind(&self) -> AcquisitionType {
        self.kind
    }

    pub fn best_y(&self) -> f64 {
        self.best_y
    }

    /// Score and (optionally) its gradient from posterior moments.
    fn score(
        &self,
        mean: f64,
        variance: f64,
        grads: Option<(&[f64], &[f64])>,
        dimension: usize,
    ) -> (f64, Vec<f64>) {
        let s = self.sense.sign();
        let sigma = variance.max(0.0).sqrt();
        let degenerate = sigma < SIGMA_FLOOR;
        let mut gradient = vec![0.0; if grads.is_some() { dimension } else { 0 }];

        match self.kind {
            AcquisitionType::ExpectedImprovement { jitter } => {
                if degenerate {
                    return (0.0, gradient);
                }
                let improvement = s * (self.best_y - mean) - jitter;
                let u = improvement / sigma;
                let (cdf, pdf) = (norm_cdf(u), norm_pdf(u));
                let value = (sigma * (u * cdf + pdf)).max(0.0);
                if let Some((dmean, dvar)) = grads {
                    for j in 0..dimension {
                        let dsigma = dvar[j] / (2.0 * sigma);
                        gradient[j] = -s * dmean[j] * cdf + dsigma * pdf;
                    }
                }
                (value, gradient)
            }
            AcquisitionType::ProbabilityOfImprovement { jitter } => {
                let improvement = s * (self.best_y - mean) - jitter;
                if degenerate {
                    return (norm_cdf(improvement / SIGMA_FLOOR), gradient);
                }
                let u = improvement / sigma;
                let pdf = norm_pdf(u);
                if let Some((dmean, dvar)) = grads {
                    for j in 0..dimension {
                        let dsigma = dvar[j] / (2.0 * sigma);
                        gradient[j] = pdf * (-s * dmean[j] - u * dsigma) / sigma;
                    }
                }
                (norm_cdf(u), gradient)
            }
            AcquisitionType::ConfidenceBound { schedule } => {
                let kappa = schedule.kappa(self.iteration, dimension);
                let value = -s * mean + kappa * sigma;
                if let Some((dmean, dvar)) = grads {
                    for j in 0..dimension {
                        let dsigma = if degenerate { 0.0 } else { dvar[j] / (2.0 * sigma) };
                        gradient[j] = -s * dmean[j] + kappa * dsigma;
                    }
                }
                (value, gradient)
            }
        }
    }
}

impl<'m, M: SurrogateModel + ?Sized> AcquisitionFunction for Acquisition<'m, M> {
    fn value(&self, x: &[f64]) -> BlResult<f64> {
        let (mean, variance) = self.model.predict(x)?;
        Ok(self.score(mean, variance, None, x.len()).0)
    }

    fn value_and_gradient(&self, x: &[f64]) -> BlResult<(f64, Vec<f64>)> {
        let posterior = self.model.posterior(x)?;
        Ok(self.score(
            posterior.mean,
            posterior.variance,
            Some((&posterior.dmean, &posterior.dvariance)),
            x.len(),
        ))
    }
}
