//! Loop lifecycle, stopping predicates and the final run report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use bl_types::{BlError, Dataset, Observation};

use crate::config::LoopConfig;

/// Unique optimization run identifier.
pub type RunId = Uuid;

/// Where the loop is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopState {
    /// Created, initial data not yet seeded or no iteration run.
    Init,
    Iterating,
    /// Two consecutive evaluations closer than `eps`.
    Converged,
    MaxIter,
    MaxTime,
    Failed,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Converged | Self::MaxIter | Self::MaxTime | Self::Failed
        )
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Iterating => "iterating",
            Self::Converged => "converged",
            Self::MaxIter => "max_iter",
            Self::MaxTime => "max_time",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What made a run fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    DomainMismatch,
    ModelFit,
    Objective,
    Numerical,
    /// Misuse of the loop or its configuration.
    InvalidState,
}

impl FailureKind {
    pub fn classify(error: &BlError) -> Self {
        match error {
            BlError::DomainMismatch { .. } => Self::DomainMismatch,
            BlError::ModelFit { .. } | BlError::ModelNotFitted => Self::ModelFit,
            BlError::Objective { .. } => Self::Objective,
            BlError::Validation(_) | BlError::Config(_) => Self::InvalidState,
            _ => Self::Numerical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Acquisition iteration during which the failure happened (0 while seeding).
    pub iteration: usize,
}

impl LoopFailure {
    pub fn from_error(error: &BlError, iteration: usize) -> Self {
        Self {
            kind: FailureKind::classify(error),
            message: error.to_string(),
            iteration,
        }
    }
}

/// Snapshot the stopping predicates are evaluated against.
#[derive(Debug, Clone, PartialEq)]
pub struct StoppingState {
    pub iteration: usize,
    pub elapsed: Duration,
    pub last_step_distance: Option<f64>,
}

impl StoppingState {
    /// First predicate that holds, in the order max_iter, max_time, eps.
    pub fn check(&self, config: &LoopConfig) -> Option<LoopState> {
        if self.iteration >= config.max_iter {
            return Some(LoopState::MaxIter);
        }
        if let Some(max_time) = config.max_time {
            if self.elapsed.as_secs_f64() >= max_time {
                return Some(LoopState::MaxTime);
            }
        }
        // Only meaningful once the loop has proposed a point itself.
        if self.iteration >= 1 {
            if let Some(d) = self.last_step_distance {
                if d < config.eps {
                    return Some(LoopState::Converged);
                }
            }
        }
        None
    }
}

/// Everything a caller needs after a run has stopped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub run_id: RunId,
    pub name: String,
    pub state: LoopState,
    pub dataset: Dataset,
    pub best: Option<Observation>,
    pub iterations: usize,
    pub elapsed_seconds: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure: Option<LoopFailure>,
}

impl OptimizationReport {
    pub fn succeeded(&self) -> bool {
        self.state.is_terminal() && self.state != LoopState::Failed
    }

    pub fn to_json(&self) -> Result<String, BlError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(iteration: usize, secs: f64, distance: Option<f64>) -> StoppingState {
        StoppingState {
            iteration,
            elapsed: Duration::from_secs_f64(secs),
            last_step_distance: distance,
        }
    }

    #[test]
    fn terminal_states() {
        assert!(!LoopState::Init.is_terminal());
        assert!(!LoopState::Iterating.is_terminal());
        for s in [
            LoopState::Converged,
            LoopState::MaxIter,
            LoopState::MaxTime,
            LoopState::Failed,
        ] {
            assert!(s.is_terminal());
        }
    }

    #[test]
    fn nothing_fires_mid_run() {
        let config = LoopConfig::default().with_max_iter(5).with_max_time(10.0);
        assert_eq!(snapshot(2, 1.0, Some(0.5)).check(&config), None);
    }

    #[test]
    fn max_iter_takes_priority() {
        let config = LoopConfig::default().with_max_iter(5).with_max_time(1.0);
        assert_eq!(
            snapshot(5, 100.0, Some(0.0)).check(&config),
            Some(LoopState::MaxIter)
        );
        assert_eq!(
            snapshot(4, 100.0, Some(0.0)).check(&config),
            Some(LoopState::MaxTime)
        );
        assert_eq!(
            snapshot(4, 0.5, Some(0.0)).check(&config),
            Some(LoopState::Converged)
        );
    }

    #[test]
    fn zero_budgets_stop_immediately() {
        let config = LoopConfig::default().with_max_iter(0);
        assert_eq!(snapshot(0, 0.0, None).check(&config), Some(LoopState::MaxIter));
        let config = LoopConfig::default().with_max_time(0.0);
        assert_eq!(snapshot(0, 0.0, None).check(&config), Some(LoopState::MaxTime));
    }

    #[test]
    fn convergence_needs_an_iteration() {
        let config = LoopConfig::default().with_eps(1e-3);
        // Initial design may contain duplicates.
        assert_eq!(snapshot(0, 0.0, Some(0.0)).check(&config), None);
        assert_eq!(
            snapshot(1, 0.0, Some(1e-4)).check(&config),
            Some(LoopState::Converged)
        );
        assert_eq!(snapshot(1, 0.0, Some(1e-2)).check(&config), None);
    }

    #[test]
    fn failures_are_classified() {
        let failure = LoopFailure::from_error(&BlError::objective("boom"), 3);
        assert_eq!(failure.kind, FailureKind::Objective);
        assert_eq!(failure.iteration, 3);
        assert!(failure.message.contains("boom"));
        assert_eq!(
            FailureKind::classify(&BlError::model_fit("singular")),
            FailureKind::ModelFit
        );
        assert_eq!(
            FailureKind::classify(&BlError::domain_mismatch("len")),
            FailureKind::DomainMismatch
        );
        assert_eq!(
            FailureKind::classify(&BlError::Internal("nan".into())),
            FailureKind::Numerical
        );
        assert_eq!(
            FailureKind::classify(&BlError::Validation("not seeded".into())),
            FailureKind::InvalidState
        );
    }
}
