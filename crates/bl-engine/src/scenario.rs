//! The acquisition evaluation scenario: five-dimensional gSobol, five random
//! initial points, five acquisition iterations per acquisition type.

use serde::{Deserialize, Serialize};
use tracing::info;

use bl_model::{GaussianProcess, GpConfig};
use bl_optimizer::{random_design, seeded_rng, AcquisitionType};
use bl_types::BlResult;

use crate::config::LoopConfig;
use crate::engine::OptimizationLoop;
use crate::objectives::GSobol;
use crate::state::OptimizationReport;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub dimension: usize,
    pub initial_points: usize,
    pub seed: u64,
    pub max_iter: usize,
    pub max_time: f64,
    pub eps: f64,
    pub model_update_interval: usize,
    pub model: GpConfig,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            dimension: 5,
            initial_points: 5,
            seed: 1,
            max_iter: 5,
            max_time: 999.0,
            eps: 1e-8,
            model_update_interval: 1,
            model: GpConfig {
                normalize_y: true,
                exact_feval: false,
                ..GpConfig::default()
            },
        }
    }
}

impl Scenario {
    /// The three acquisitions exercised by the scenario, with their trace names.
    pub fn acquisitions() -> [(&'static str, AcquisitionType); 3] {
        [
            ("EI", AcquisitionType::expected_improvement()),
            ("MPI", AcquisitionType::probability_of_improvement()),
            ("LCB", AcquisitionType::confidence_bound()),
        ]
    }

    /// File name of the trace written for `name`.
    pub fn trace_file_name(name: &str) -> String {
        format!("{name}_acquisition_gradient_testfile.txt")
    }

    pub fn loop_config(&self, name: &str, acquisition: AcquisitionType) -> LoopConfig {
        LoopConfig::new(name, acquisition)
            .with_max_iter(self.max_iter)
            .with_max_time(self.max_time)
            .with_eps(self.eps)
            .with_seed(self.seed)
            .with_model_update_interval(self.model_update_interval)
    }

    /// Run one acquisition end to end. The initial design comes from its own
    /// generator so every acquisition starts from the same points.
    pub fn run(&self, name: &str, acquisition: AcquisitionType) -> BlResult<OptimizationReport> {
        let objective = GSobol::unit(self.dimension)?;
        let domain = objective.domain();
        let design = random_design(&domain, self.initial_points, &mut seeded_rng(self.seed))?;

        let mut bo = OptimizationLoop::new(
            self.loop_config(name, acquisition),
            domain,
            GaussianProcess::new(self.model.clone()),
            objective,
        )?;
        bo.seed_by_evaluating(design)?;
        let report = bo.run();
        if let Some(failure) = &report.failure {
            return Err(bl_types::BlError::Internal(format!(
                "{name} scenario failed: {}",
                failure.message
            )));
        }
        info!(
            "Scenario {} finished ({}) with best {:?}",
            name,
            report.state,
            report.best.as_ref().map(|b| b.y)
        );
        Ok(report)
    }
}
