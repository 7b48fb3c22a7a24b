use bl_engine::{EvaluationTrace, LoopState, Scenario};
use bl_optimizer::AcquisitionType;

const TOLERANCE: f64 = 1e-1;

#[test]
fn acquisition_traces_are_reproducible() {
    let scenario = Scenario::default();
    let dir = tempfile::tempdir().unwrap();

    for (name, acquisition) in Scenario::acquisitions() {
        let report = scenario.run(name, acquisition).unwrap();
        assert!(
            matches!(report.state, LoopState::MaxIter | LoopState::Converged),
            "{name}: {}",
            report.state
        );

        let trace = EvaluationTrace::from_dataset(&report.dataset);
        let (rows, cols) = trace.shape();
        assert_eq!(cols, scenario.dimension + 1);
        assert_eq!(rows, scenario.initial_points + report.iterations);
        if report.state == LoopState::MaxIter {
            assert_eq!(rows, 10);
        }

        for row in trace.rows() {
            for x in &row[..scenario.dimension] {
                assert!((-5.0..=5.0).contains(x), "{name}: {x} out of bounds");
            }
            assert!(row[scenario.dimension] > 0.0);
        }

        let path = dir.path().join(Scenario::trace_file_name(name));
        trace.write(&path).unwrap();

        let rerun = scenario.run(name, acquisition).unwrap();
        let reference = EvaluationTrace::read(&path).unwrap();
        let again = EvaluationTrace::from_dataset(&rerun.dataset);
        assert!(
            again.within(&reference, TOLERANCE),
            "{name}: max diff {:?}",
            again.max_abs_diff(&reference)
        );
    }
}

#[test]
fn acquisitions_share_the_initial_design() {
    let scenario = Scenario {
        max_iter: 1,
        ..Scenario::default()
    };
    let designs: Vec<Vec<Vec<f64>>> = Scenario::acquisitions()
        .into_iter()
        .map(|(name, acquisition)| {
            let report = scenario.run(name, acquisition).unwrap();
            report.dataset.to_rows()[..scenario.initial_points].to_vec()
        })
        .collect();
    assert_eq!(designs[0], designs[1]);
    assert_eq!(designs[1], designs[2]);
}

#[test]
fn best_is_the_smallest_observation() {
    let report = Scenario::default()
        .run("EI", AcquisitionType::expected_improvement())
        .unwrap();
    let best = report.best.unwrap();
    for o in report.dataset.observations() {
        assert!(best.y <= o.y);
    }
}

