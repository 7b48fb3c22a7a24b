use anyhow::Context;
use tracing_subscriber::EnvFilter;

use bl_engine::{EvaluationTrace, Scenario};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let out_dir = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("BAYESLOOP_TRACE_DIR").ok())
        .unwrap_or_else(|| "traces".to_string());
    std::fs::create_dir_all(&out_dir).with_context(|| format!("creating {out_dir}"))?;

    let scenario = match std::env::var("BAYESLOOP_SCENARIO") {
        Ok(path) => {
            let text = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {path}"))?
        }
        Err(_) => Scenario::default(),
    };

    for (name, acquisition) in Scenario::acquisitions() {
        let report = scenario.run(name, acquisition)?;
        let path = std::path::Path::new(&out_dir).join(Scenario::trace_file_name(name));
        EvaluationTrace::from_dataset(&report.dataset).write(&path)?;
        println!(
            "{name}: {} after {} iterations, best {:?}, trace {}",
            report.state,
            report.iterations,
            report.best.map(|b| b.y),
            path.display()
        );
    }
    Ok(())
}
