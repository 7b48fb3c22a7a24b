//! # bl-engine
//!
//! The sequential optimization loop of BayesLoop: configuration, the
//! INIT to ITERATING to terminal state machine, stopping predicates, run
//! reports and evaluation traces, plus synthetic objectives and the
//! acquisition evaluation scenario.

pub mod config;
pub mod engine;
pub mod objectives;
pub mod scenario;
pub mod state;
pub mod trace;

pub use config::LoopConfig;
pub use engine::{ModelState, OptimizationLoop};
pub use objectives::{Branin, GSobol, Sphere};
pub use scenario::Scenario;
pub use state::{FailureKind, LoopFailure, LoopState, OptimizationReport, RunId, StoppingState};
pub use trace::EvaluationTrace;
