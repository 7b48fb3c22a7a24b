//! Loop configuration: every recognized option, its default, and validation.

use serde::{Deserialize, Serialize};

use bl_optimizer::{
    AcquisitionOptimizerConfig, AcquisitionOptimizerType, AcquisitionType, LbfgsConfig,
    SeedSampling,
};
use bl_types::{config_error, BlResult, Sense};

/// Top-level configuration for an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub name: String,

    /// Acquisition criterion and its exploration parameter.
    pub acquisition: AcquisitionType,

    /// Restart strategy of the acquisition optimizer.
    pub acquisition_optimizer: AcquisitionOptimizerType,

    /// How anchor candidates are spread over the domain.
    pub seed_sampling: SeedSampling,

    /// Candidates screened before choosing restart seeds.
    pub anchor_samples: usize,

    /// Local searches per acquisition maximization.
    pub num_restarts: usize,

    /// Also start a local search from the incumbent.
    pub include_incumbent: bool,

    pub lbfgs: LbfgsConfig,

    /// Refit the surrogate every this many iterations.
    pub model_update_interval: usize,

    /// Points per iteration. Only sequential selection (1) is available.
    pub batch_size: usize,

    /// Threads used for acquisition restarts.
    pub num_cores: usize,

    /// Maximum number of acquisition iterations.
    pub max_iter: usize,

    /// Wall-clock budget in seconds, checked between iterations.
    pub max_time: Option<f64>,

    /// Stop once two consecutive evaluations are closer than this.
    pub eps: f64,

    pub sense: Sense,

    /// Seed of the generator threaded through designs and restarts.
    pub seed: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            name: "bayesloop".to_string(),
            acquisition: AcquisitionType::default(),
            acquisition_optimizer: AcquisitionOptimizerType::Lbfgs,
            seed_sampling: SeedSampling::Uniform,
            anchor_samples: 1000,
            num_restarts: 5,
            include_incumbent: false,
            lbfgs: LbfgsConfig::default(),
            model_update_interval: 1,
            batch_size: 1,
            num_cores: 1,
            max_iter: 15,
            max_time: None,
            eps: 1e-8,
            sense: Sense::Minimize,
            seed: 0,
        }
    }
}

impl LoopConfig {
    pub fn new(name: impl Into<String>, acquisition: AcquisitionType) -> Self {
        Self {
            name: name.into(),
            acquisition,
            ..Self::default()
        }
    }

    /// Parse from JSON; unspecified options keep their defaults.
    pub fn from_json(json: &str) -> BlResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_iter(mut self, n: usize) -> Self {
        self.max_iter = n;
        self
    }

    pub fn with_max_time(mut self, seconds: f64) -> Self {
        self.max_time = Some(seconds);
        self
    }

    pub fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    pub fn with_sense(mut self, sense: Sense) -> Self {
        self.sense = sense;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_restarts(mut self, n: usize) -> Self {
        self.num_restarts = n;
        self
    }

    pub fn with_model_update_interval(mut self, n: usize) -> Self {
        self.model_update_interval = n;
        self
    }

    pub fn with_num_cores(mut self, n: usize) -> Self {
        self.num_cores = n;
        self
    }

    pub fn validate(&self) -> BlResult<()> {
        self.acquisition.validate().map_err(bl_types::BlError::Config)?;
        if self.model_update_interval == 0 {
            return Err(config_error!("model_update_interval must be >= 1"));
        }
        if self.batch_size != 1 {
            return Err(config_error!(
                "batch_size {} requested, but only sequential selection (batch_size = 1) is available",
                self.batch_size
            ));
        }
        if self.num_cores == 0 {
            return Err(config_error!("num_cores must be >= 1"));
        }
        if self.num_restarts == 0 {
            return Err(config_error!("num_restarts must be >= 1"));
        }
        if self.anchor_samples == 0 {
            return Err(config_error!("anchor_samples must be >= 1"));
        }
        if self.lbfgs.memory == 0 {
            return Err(config_error!("lbfgs.memory must be >= 1"));
        }
        if !(self.eps >= 0.0 && self.eps.is_finite()) {
            return Err(config_error!("eps must be finite and >= 0, got {}", self.eps));
        }
        if let Some(t) = self.max_time {
            if !(t >= 0.0) {
                return Err(config_error!("max_time must be >= 0 seconds, got {t}"));
            }
        }
        Ok(())
    }

    pub fn optimizer_config(&self) -> AcquisitionOptimizerConfig {
        AcquisitionOptimizerConfig {
            optimizer_type: self.acquisition_optimizer,
            seed_sampling: self.seed_sampling,
            anchor_samples: self.anchor_samples,
            lbfgs: self.lbfgs.clone(),
            num_cores: self.num_cores,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bl_optimizer::ExplorationSchedule;
    use bl_types::BlError;

    #[test]
    fn defaults_are_valid() {
        let config = LoopConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.model_update_interval, 1);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.sense, Sense::Minimize);
    }

    #[test]
    fn builder_chain() {
        let config = LoopConfig::new("lcb_run", AcquisitionType::confidence_bound())
            .with_max_iter(5)
            .with_max_time(999.0)
            .with_eps(1e-8)
            .with_seed(1)
            .with_restarts(3)
            .with_model_update_interval(2)
            .with_num_cores(2);
        assert_eq!(config.name, "lcb_run");
        assert_eq!(config.max_iter, 5);
        assert_eq!(config.max_time, Some(999.0));
        assert_eq!(config.optimizer_config().num_cores, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_options_are_rejected() {
        let cases = [
            LoopConfig::default().with_model_update_interval(0),
            LoopConfig {
                batch_size: 4,
                ..LoopConfig::default()
            },
            LoopConfig::default().with_num_cores(0),
            LoopConfig::default().with_restarts(0),
            LoopConfig::default().with_eps(-1.0),
            LoopConfig::default().with_max_time(-3.0),
            LoopConfig::new(
                "bad_kappa",
                AcquisitionType::ConfidenceBound {
                    schedule: ExplorationSchedule::Constant { kappa: -1.0 },
                },
            ),
        ];
        for config in cases {
            assert!(matches!(config.validate(), Err(BlError::Config(_))), "{config:?}");
        }
    }

    #[test]
    fn json_fills_defaults() {
        let config = LoopConfig::from_json(
            r#"{"acquisition": {"type": "MPI", "jitter": 0.01}, "max_iter": 5, "max_time": 999.0}"#,
        )
        .unwrap();
        assert_eq!(config.acquisition, AcquisitionType::ProbabilityOfImprovement { jitter: 0.01 });
        assert_eq!(config.max_iter, 5);
        assert_eq!(config.num_restarts, LoopConfig::default().num_restarts);
    }

    #[test]
    fn json_validation_runs() {
        let err = LoopConfig::from_json(r#"{"batch_size": 2}"#).unwrap_err();
        assert!(matches!(err, BlError::Config(_)));
        let err = LoopConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, BlError::Serialization(_)));
    }

    #[test]
    fn json_roundtrip_preserves_config() {
        let config = LoopConfig::new("ei", AcquisitionType::expected_improvement()).with_seed(7);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(LoopConfig::from_json(&json).unwrap(), config);
    }
}
