//! # bl-optimizer
//!
//! Acquisition evaluation and optimization for BayesLoop.
//!
//! Provides the acquisition family (EI, MPI, confidence bound) with analytic
//! gradients, a projected L-BFGS local search, the multi-restart acquisition
//! optimizer, evaluators that pick the next points, and space-filling designs.

mod acquisition;
mod acquisition_optimizer;
mod design;
mod evaluator;
pub mod lbfgs;
pub mod normal;

pub use acquisition::{
    Acquisition, AcquisitionFunction, AcquisitionType, ExplorationSchedule, SIGMA_FLOOR,
};
pub use acquisition_optimizer::{
    AcquisitionMaximum, AcquisitionOptimizer, AcquisitionOptimizerConfig, AcquisitionOptimizerType,
};
pub use design::{random_design, sample_box, seeded_rng, SeedSampling, SeededRng};
pub use evaluator::{Evaluator, Sequential};
pub use lbfgs::LbfgsConfig;
