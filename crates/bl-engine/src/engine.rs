// Sequential optimization loop
// Fits the surrogate, maximizes the acquisition, evaluates and records

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use bl_optimizer::{
    random_design, seeded_rng, Acquisition, AcquisitionOptimizer, Evaluator, SeededRng,
    Sequential,
};
use bl_types::{
    evaluate_checked, validation_error, BlError, BlResult, Dataset, Domain, Objective,
    Observation, SurrogateModel,
};

use crate::config::LoopConfig;
use crate::state::{LoopFailure, LoopState, OptimizationReport, RunId, StoppingState};

/// A surrogate together with how stale its fit is.
#[derive(Debug)]
pub struct ModelState<M> {
    model: M,
    fitted: bool,
    iterations_since_fit: usize,
    fits: usize,
}

impl<M: SurrogateModel> ModelState<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            fitted: false,
            iterations_since_fit: 0,
            fits: 0,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Number of completed fits.
    pub fn fits(&self) -> usize {
        self.fits
    }

    pub fn needs_refit(&self, interval: usize) -> bool {
        !self.fitted || self.iterations_since_fit >= interval
    }

    pub fn refit(&mut self, dataset: &Dataset) -> BlResult<()> {
        self.model.fit(dataset)?;
        self.fitted = true;
        self.iterations_since_fit = 0;
        self.fits += 1;
        Ok(())
    }

    fn record_iteration(&mut self) {
        self.iterations_since_fit += 1;
    }
}

/// Sequential model-based optimization loop.
pub struct OptimizationLoop<M: SurrogateModel, O: Objective> {
    id: RunId,
    config: LoopConfig,
    domain: Domain,
    model: ModelState<M>,
    objective: O,
    evaluator: Box<dyn Evaluator>,
    dataset: Dataset,
    rng: SeededRng,
    state: LoopState,
    iteration: usize,
    clock: Option<Instant>,
    elapsed: Duration,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    failure: Option<LoopFailure>,
}

impl<M: SurrogateModel, O: Objective> OptimizationLoop<M, O> {
    /// Validate the configuration and domain once and assemble the loop.
    pub fn new(config: LoopConfig, domain: Domain, model: M, objective: O) -> BlResult<Self> {
        config.validate()?;
        domain.validate()?;

        let optimizer = AcquisitionOptimizer::new(config.optimizer_config())?;
        let evaluator = Box::new(Sequential::new(optimizer, config.num_restarts));
        let id = Uuid::new_v4();

        info!(
            "Creating optimization loop {} ({}): {} with {} model over {} inputs",
            config.name,
            id,
            config.acquisition.tag(),
            model.name(),
            domain.dimension()
        );

        Ok(Self {
            id,
            dataset: Dataset::new(config.sense),
            rng: seeded_rng(config.seed),
            domain,
            model: ModelState::new(model),
            objective,
            evaluator,
            config,
            state: LoopState::Init,
            iteration: 0,
            clock: None,
            elapsed: Duration::ZERO,
            started_at: None,
            finished_at: None,
            failure: None,
        })
    }

    /// Replace the point-selection strategy.
    pub fn with_evaluator(mut self, evaluator: Box<dyn Evaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn model(&self) -> &ModelState<M> {
        &self.model
    }

    pub fn objective(&self) -> &O {
        &self.objective
    }

    /// Acquisition iterations completed so far.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn failure(&self) -> Option<&LoopFailure> {
        self.failure.as_ref()
    }

    /// The run's generator, for drawing initial designs from the same stream.
    pub fn rng_mut(&mut self) -> &mut SeededRng {
        &mut self.rng
    }

    /// Add already evaluated initial data and fit the model on it.
    pub fn seed(&mut self, points: Vec<Vec<f64>>, values: Vec<f64>) -> BlResult<()> {
        self.ensure_seedable(points.len())?;
        if points.len() != values.len() {
            return Err(validation_error!(
                "{} initial points but {} values",
                points.len(),
                values.len()
            ));
        }
        if let Some(y) = values.iter().find(|y| !y.is_finite()) {
            return Err(validation_error!("initial value {y} is not finite"));
        }
        self.check_initial_points(&points)?;
        let result = self.admit_initial(points.into_iter().zip(values).collect());
        self.guard(result)
    }

    /// Evaluate the objective at `points` and seed the loop with the results.
    pub fn seed_by_evaluating(&mut self, points: Vec<Vec<f64>>) -> BlResult<()> {
        self.ensure_seedable(points.len())?;
        self.check_initial_points(&points)?;
        let result = self.evaluate_initial(points);
        self.guard(result)
    }

    /// Seed with `count` uniform random points drawn from the run's generator.
    pub fn seed_random_design(&mut self, count: usize) -> BlResult<()> {
        let points = random_design(&self.domain, count, &mut self.rng)?;
        self.seed_by_evaluating(points)
    }

    /// Run one acquisition iteration, or stop if a predicate already holds.
    pub fn step(&mut self) -> BlResult<LoopState> {
        if self.state.is_terminal() {
            return Err(validation_error!(
                "loop {} already stopped in state {}",
                self.config.name,
                self.state
            ));
        }
        if self.dataset.is_empty() {
            return Err(validation_error!(
                "loop {} has no initial data; seed it before stepping",
                self.config.name
            ));
        }
        self.start_clock();

        if let Some(stop) = self.stopping_state().check(&self.config) {
            self.finish(stop);
            return Ok(stop);
        }
        self.state = LoopState::Iterating;

        let result = self.iterate();
        self.guard(result)?;

        if let Some(stop) = self.stopping_state().check(&self.config) {
            self.finish(stop);
        }
        Ok(self.state)
    }

    /// Step until a terminal state and report.
    pub fn run(&mut self) -> OptimizationReport {
        info!(
            "Running {} for at most {} iterations",
            self.config.name, self.config.max_iter
        );
        while !self.state.is_terminal() {
            if let Err(e) = self.step() {
                if !self.state.is_terminal() {
                    self.fail(&e);
                }
                break;
            }
        }
        self.report()
    }

    pub fn report(&self) -> OptimizationReport {
        OptimizationReport {
            run_id: self.id,
            name: self.config.name.clone(),
            state: self.state,
            dataset: self.dataset.clone(),
            best: self.dataset.best().cloned(),
            iterations: self.iteration,
            elapsed_seconds: self.elapsed().as_secs_f64(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            failure: self.failure.clone(),
        }
    }

    fn iterate(&mut self) -> BlResult<()> {
        let iteration = self.iteration + 1;

        if self.model.needs_refit(self.config.model_update_interval) {
            debug!("Refitting {} on {} points", self.model.model.name(), self.dataset.len());
            self.model.refit(&self.dataset)?;
        }

        let best_y = self
            .dataset
            .best_y()
            .ok_or_else(|| BlError::Internal("no incumbent in a seeded dataset".into()))?;
        let points = {
            let acquisition = Acquisition::new(
                &self.model.model,
                self.config.acquisition,
                best_y,
                self.config.sense,
            )
            .at_iteration(iteration);
            let incumbent = if self.config.include_incumbent {
                self.dataset.best().map(|o| o.x.as_slice())
            } else {
                None
            };
            self.evaluator
                .select(&acquisition, &self.domain, incumbent, &mut self.rng)?
        };
        if points.is_empty() {
            return Err(BlError::Internal(format!(
                "{} evaluator proposed no points",
                self.evaluator.name()
            )));
        }

        let mut evaluated = Vec::with_capacity(points.len());
        for x in points {
            self.domain.validate_point(&x)?;
            let y = evaluate_checked(&mut self.objective, &x)?;
            debug!("Iteration {}: f({:?}) = {}", iteration, x, y);
            evaluated.push(Observation::new(x, y));
        }

        let previous_best = best_y;
        for observation in evaluated {
            self.dataset.push(observation);
        }
        self.model.record_iteration();
        self.iteration = iteration;

        if let Some(best) = self.dataset.best() {
            if best.y != previous_best {
                info!("Iteration {}: new best {} at {:?}", iteration, best.y, best.x);
            } else {
                info!("Iteration {}: best {}", iteration, best.y);
            }
        }
        Ok(())
    }

    fn ensure_seedable(&self, count: usize) -> BlResult<()> {
        if self.state != LoopState::Init || self.iteration > 0 {
            return Err(validation_error!(
                "initial data can only be added before the first iteration"
            ));
        }
        if count == 0 {
            return Err(validation_error!("initial design must contain at least one point"));
        }
        Ok(())
    }

    /// Out-of-domain points are rejected before anything is evaluated or
    /// fitted; the loop stays in `Init`.
    fn check_initial_points(&self, points: &[Vec<f64>]) -> BlResult<()> {
        for x in points {
            self.domain.validate_point(x)?;
        }
        Ok(())
    }

    fn evaluate_initial(&mut self, points: Vec<Vec<f64>>) -> BlResult<()> {
        let mut pairs = Vec::with_capacity(points.len());
        for x in points {
            let y = evaluate_checked(&mut self.objective, &x)?;
            pairs.push((x, y));
        }
        self.admit_initial(pairs)
    }

    fn admit_initial(&mut self, pairs: Vec<(Vec<f64>, f64)>) -> BlResult<()> {
        let count = pairs.len();
        for (x, y) in pairs {
            self.dataset.push(Observation::new(x, y));
        }
        self.model.refit(&self.dataset)?;
        info!(
            "Seeded {} with {} points, best {:?}",
            self.config.name,
            count,
            self.dataset.best_y()
        );
        Ok(())
    }

    fn guard<T>(&mut self, result: BlResult<T>) -> BlResult<T> {
        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }

    fn start_clock(&mut self) {
        if self.clock.is_none() {
            self.clock = Some(Instant::now());
            self.started_at = Some(Utc::now());
        }
    }

    fn elapsed(&self) -> Duration {
        match (self.clock, self.state.is_terminal()) {
            (Some(clock), false) => clock.elapsed(),
            _ => self.elapsed,
        }
    }

    fn stopping_state(&self) -> StoppingState {
        StoppingState {
            iteration: self.iteration,
            elapsed: self.elapsed(),
            last_step_distance: self.dataset.last_step_distance(),
        }
    }

    fn stop_clock(&mut self) {
        if let Some(clock) = self.clock {
            self.elapsed = clock.elapsed();
        }
        self.finished_at = Some(Utc::now());
    }

    fn finish(&mut self, state: LoopState) {
        self.stop_clock();
        self.state = state;
        info!(
            "Loop {} stopped ({}) after {} iterations, {} evaluations, best {:?}",
            self.config.name,
            state,
            self.iteration,
            self.dataset.len(),
            self.dataset.best_y()
        );
    }

    fn fail(&mut self, error: &BlError) {
        warn!(
            "Loop {} failed after {} iterations: {}",
            self.config.name, self.iteration, error
        );
        self.stop_clock();
        self.failure = Some(LoopFailure::from_error(error, self.iteration));
        self.state = LoopState::Failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectives::Sphere;
    use bl_model::GaussianProcess;
    use bl_optimizer::AcquisitionType;
    use bl_types::Sense;

    use crate::state::FailureKind;

    fn config(acquisition: AcquisitionType) -> LoopConfig {
        let mut config = LoopConfig::new("sphere", acquisition)
            .with_max_iter(4)
            .with_seed(3)
            .with_restarts(3);
        config.anchor_samples = 200;
        config
    }

    fn sphere_loop(config: LoopConfig) -> OptimizationLoop<GaussianProcess, Sphere> {
        let objective = Sphere::new(2);
        let domain = objective.domain();
        OptimizationLoop::new(config, domain, GaussianProcess::default(), objective).unwrap()
    }

    /// Delegates to a GP and counts fits.
    struct CountingModel {
        inner: GaussianProcess,
        fit_sizes: Vec<usize>,
    }

    impl SurrogateModel for CountingModel {
        fn fit(&mut self, data: &Dataset) -> BlResult<()> {
            self.fit_sizes.push(data.len());
            self.inner.fit(data)
        }
        fn predict(&self, x: &[f64]) -> BlResult<(f64, f64)> {
            self.inner.predict(x)
        }
        fn predict_gradients(&self, x: &[f64]) -> BlResult<(Vec<f64>, Vec<f64>)> {
            self.inner.predict_gradients(x)
        }
        fn name(&self) -> &str {
            "counting"
        }
    }

    struct BrokenModel;

    impl SurrogateModel for BrokenModel {
        fn fit(&mut self, _data: &Dataset) -> BlResult<()> {
            Err(BlError::model_fit("covariance not positive definite"))
        }
        fn predict(&self, _x: &[f64]) -> BlResult<(f64, f64)> {
            Err(BlError::ModelNotFitted)
        }
        fn predict_gradients(&self, _x: &[f64]) -> BlResult<(Vec<f64>, Vec<f64>)> {
            Err(BlError::ModelNotFitted)
        }
        fn name(&self) -> &str {
            "broken"
        }
    }

    #[test]
    fn step_requires_initial_data() {
        let mut bo = sphere_loop(config(AcquisitionType::expected_improvement()));
        let err = bo.step().unwrap_err();
        assert!(matches!(err, BlError::Validation(_)));
        assert_eq!(bo.state(), LoopState::Init);
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let objective = Sphere::new(2);
        let domain = objective.domain();
        let bad = config(AcquisitionType::expected_improvement()).with_model_update_interval(0);
        assert!(matches!(
            OptimizationLoop::new(bad, domain, GaussianProcess::default(), objective),
            Err(BlError::Config(_))
        ));
    }

    #[test]
    fn seed_checks_shapes_and_values() {
        let mut bo = sphere_loop(config(AcquisitionType::expected_improvement()));
        assert!(matches!(
            bo.seed(vec![vec![0.1, 0.2]], vec![]),
            Err(BlError::Validation(_))
        ));
        assert!(matches!(
            bo.seed(vec![vec![0.1, 0.2]], vec![f64::NAN]),
            Err(BlError::Validation(_))
        ));
        assert!(matches!(bo.seed(vec![], vec![]), Err(BlError::Validation(_))));
        assert_eq!(bo.state(), LoopState::Init);
        assert!(bo.dataset().is_empty());
    }

    #[test]
    fn seeding_outside_the_domain_is_rejected_without_failing() {
        let mut bo = sphere_loop(config(AcquisitionType::expected_improvement()).with_eps(0.0));
        let err = bo.seed_by_evaluating(vec![vec![0.0, 3.0]]).unwrap_err();
        assert!(matches!(err, BlError::DomainMismatch { .. }));
        let err = bo.seed(vec![vec![0.1, 0.2, 0.3]], vec![1.0]).unwrap_err();
        assert!(matches!(err, BlError::DomainMismatch { .. }));
        assert_eq!(bo.state(), LoopState::Init);
        assert!(bo.failure().is_none());
        assert!(bo.dataset().is_empty());
        assert_eq!(bo.model().fits(), 0);

        bo.seed_by_evaluating(vec![vec![0.0, 0.5], vec![-0.5, 0.25]]).unwrap();
        assert_eq!(bo.state(), LoopState::Init);
        assert_eq!(bo.dataset().len(), 2);
        assert_eq!(bo.step().unwrap(), LoopState::Iterating);
    }

    #[test]
    fn runs_to_max_iter_with_monotone_best() {
        for kind in [
            AcquisitionType::expected_improvement(),
            AcquisitionType::probability_of_improvement(),
            AcquisitionType::confidence_bound(),
        ] {
            let mut bo = sphere_loop(config(kind));
            bo.seed_random_design(4).unwrap();
            assert_eq!(bo.state(), LoopState::Init);

            let mut best = bo.dataset().best_y().unwrap();
            let mut state = LoopState::Init;
            while !state.is_terminal() {
                state = bo.step().unwrap();
                let now = bo.dataset().best_y().unwrap();
                assert!(now <= best, "{}: best went from {best} to {now}", kind.tag());
                best = now;
            }
            let report = bo.report();
            assert!(report.succeeded(), "{}", kind.tag());
            if report.state == LoopState::MaxIter {
                assert_eq!(report.iterations, 4);
                assert_eq!(report.dataset.len(), 8);
            }
            let best = report.best.unwrap();
            let min = report
                .dataset
                .observations()
                .iter()
                .map(|o| o.y)
                .fold(f64::INFINITY, f64::min);
            assert_eq!(best.y, min);
            for o in report.dataset.observations() {
                assert!(bo.domain().validate_point(&o.x).is_ok());
            }
            assert!(report.started_at.is_some() && report.finished_at.is_some());
        }
    }

    #[test]
    fn every_acquisition_completes() {
        for kind in [
            AcquisitionType::expected_improvement(),
            AcquisitionType::probability_of_improvement(),
            AcquisitionType::confidence_bound(),
        ] {
            let mut bo = sphere_loop(config(kind).with_eps(0.0));
            bo.seed_random_design(3).unwrap();
            let report = bo.run();
            assert_eq!(report.state, LoopState::MaxIter, "{}: {:?}", kind.tag(), report.failure);
            assert_eq!(report.dataset.len(), 7);
        }
    }

    #[test]
    fn zero_iterations_evaluates_nothing_more() {
        let mut bo = sphere_loop(config(AcquisitionType::expected_improvement()).with_max_iter(0));
        bo.seed_random_design(2).unwrap();
        let report = bo.run();
        assert_eq!(report.state, LoopState::MaxIter);
        assert_eq!(report.iterations, 0);
        assert_eq!(report.dataset.len(), 2);
    }

    #[test]
    fn zero_time_budget_stops_before_iterating() {
        let mut bo = sphere_loop(config(AcquisitionType::expected_improvement()).with_max_time(0.0));
        bo.seed_random_design(2).unwrap();
        assert_eq!(bo.step().unwrap(), LoopState::MaxTime);
        assert_eq!(bo.dataset().len(), 2);
    }

    #[test]
    fn loose_eps_converges_after_one_iteration() {
        let mut bo = sphere_loop(config(AcquisitionType::expected_improvement()).with_eps(10.0));
        bo.seed_random_design(3).unwrap();
        let report = bo.run();
        assert_eq!(report.state, LoopState::Converged);
        assert_eq!(report.iterations, 1);
    }

    #[test]
    fn stepping_a_stopped_loop_is_an_error() {
        let mut bo = sphere_loop(config(AcquisitionType::expected_improvement()).with_max_iter(1));
        bo.seed_random_design(2).unwrap();
        bo.run();
        assert!(matches!(bo.step(), Err(BlError::Validation(_))));
        assert!(bo.seed(vec![vec![0.0, 0.0]], vec![0.0]).is_err());
    }

    #[test]
    fn same_seed_same_trajectory() {
        let run = || {
            let mut bo = sphere_loop(config(AcquisitionType::confidence_bound()).with_eps(0.0));
            bo.seed_random_design(3).unwrap();
            bo.run().dataset.to_rows()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn parallel_restarts_match_inline() {
        let run = |cores: usize| {
            let mut bo = sphere_loop(
                config(AcquisitionType::expected_improvement())
                    .with_eps(0.0)
                    .with_num_cores(cores),
            );
            bo.seed_random_design(3).unwrap();
            bo.run().dataset.to_rows()
        };
        assert_eq!(run(1), run(3));
    }

    #[test]
    fn model_refits_follow_the_update_interval() {
        let fits = |interval: usize| {
            let objective = Sphere::new(2);
            let domain = objective.domain();
            let model = CountingModel {
                inner: GaussianProcess::default(),
                fit_sizes: Vec::new(),
            };
            let cfg = config(AcquisitionType::expected_improvement())
                .with_eps(0.0)
                .with_model_update_interval(interval);
            let mut bo = OptimizationLoop::new(cfg, domain, model, objective).unwrap();
            bo.seed_random_design(3).unwrap();
            let report = bo.run();
            assert_eq!(report.state, LoopState::MaxIter);
            bo.model().model().fit_sizes.clone()
        };
        // Fit on seeding, then before every iteration that has new data.
        assert_eq!(fits(1), vec![3, 4, 5, 6]);
        assert_eq!(fits(2), vec![3, 5]);
    }

    #[test]
    fn objective_failure_keeps_completed_iterations() {
        let objective = Sphere::new(2);
        let domain = objective.domain();
        let mut calls = 0;
        let flaky = move |x: &[f64]| -> BlResult<f64> {
            calls += 1;
            if calls > 4 {
                return Err(BlError::objective("simulator crashed"));
            }
            Ok(x.iter().map(|v| v * v).sum())
        };
        let mut bo = OptimizationLoop::new(
            config(AcquisitionType::expected_improvement()).with_eps(0.0),
            domain,
            GaussianProcess::default(),
            flaky,
        )
        .unwrap();
        bo.seed_random_design(3).unwrap();
        let report = bo.run();
        assert_eq!(report.state, LoopState::Failed);
        let failure = report.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Objective);
        assert_eq!(failure.iteration, 1);
        assert_eq!(report.dataset.len(), 4);
        assert_eq!(report.iterations, 1);
    }

    #[test]
    fn non_finite_objective_values_fail() {
        let objective = Sphere::new(2);
        let domain = objective.domain();
        let mut bo = OptimizationLoop::new(
            config(AcquisitionType::expected_improvement()),
            domain,
            GaussianProcess::default(),
            |_x: &[f64]| -> BlResult<f64> { Ok(f64::NAN) },
        )
        .unwrap();
        assert!(bo.seed_random_design(2).is_err());
        assert_eq!(bo.failure().unwrap().kind, FailureKind::Objective);
        assert!(bo.dataset().is_empty());
    }

    #[test]
    fn model_fit_failure_is_reported() {
        let objective = Sphere::new(2);
        let domain = objective.domain();
        let mut bo = OptimizationLoop::new(
            config(AcquisitionType::expected_improvement()),
            domain,
            BrokenModel,
            objective,
        )
        .unwrap();
        let err = bo.seed(vec![vec![0.5, 0.5]], vec![0.5]).unwrap_err();
        assert!(matches!(err, BlError::ModelFit { .. }));
        let report = bo.run();
        assert_eq!(report.state, LoopState::Failed);
        assert_eq!(report.failure.unwrap().kind, FailureKind::ModelFit);
    }

    #[test]
    fn maximization_tracks_the_largest_value() {
        let objective = Sphere::new(2);
        let domain = objective.domain();
        let cfg = config(AcquisitionType::expected_improvement())
            .with_sense(Sense::Maximize)
            .with_eps(0.0);
        let mut bo = OptimizationLoop::new(cfg, domain, GaussianProcess::default(), objective).unwrap();
        bo.seed(
            vec![vec![0.0, 0.0], vec![0.5, 0.0], vec![0.0, -0.3]],
            vec![0.0, 0.25, 0.09],
        )
        .unwrap();
        let report = bo.run();
        let max = report
            .dataset
            .observations()
            .iter()
            .map(|o| o.y)
            .fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(report.best.unwrap().y, max);
        assert!(max >= 0.25);
    }

    #[test]
    fn report_serializes() {
        let mut bo = sphere_loop(config(AcquisitionType::expected_improvement()).with_max_iter(1));
        bo.seed_random_design(2).unwrap();
        let json = bo.run().to_json().unwrap();
        let back: OptimizationReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.run_id, bo.id());
        assert_eq!(back.dataset.len(), 3);
    }
}
