//! Scenario playback (`--simulate`).
//!
//! Drives the full profiling stack end-to-end against the scripted
//! runtime host: install the environment, sample a scenario's rotating
//! thread stacks for its duration, then stop and save through the regular
//! per-role artifact policy. Useful as a self-test and for generating
//! sample graphs without embedding a runtime.

use anyhow::{Context, Result};
use pyrope_engine::runtime::sim::Scenario;
use pyrope_engine::topology::env;
use pyrope_engine::SessionConfig;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How often thread stacks rotate during playback.
const ROTATE_STEP: Duration = Duration::from_millis(2);

/// Profile a scripted scenario and write the usual artifacts.
pub fn execute(scenario_path: &Path, session: SessionConfig, debug: bool) -> Result<()> {
    let content = std::fs::read_to_string(scenario_path)
        .with_context(|| format!("reading scenario {}", scenario_path.display()))?;
    let scenario: Scenario = serde_json::from_str(&content)
        .with_context(|| format!("parsing scenario {}", scenario_path.display()))?;

    let (host, rotations) = scenario.instantiate();
    let host = Arc::new(host);

    let sampler = env::install(host.clone(), session)
        .context("installing the profiler environment")?;
    sampler.start().context("starting the sampler")?;

    let deadline = Instant::now() + Duration::from_millis(scenario.duration_ms);
    let mut step = 0usize;
    while Instant::now() < deadline {
        for (thread_id, rotation) in &rotations {
            if rotation.len() > 1 {
                host.set_stack(*thread_id, rotation[step % rotation.len()].clone());
            }
        }
        step += 1;
        std::thread::sleep(ROTATE_STEP);
    }

    let report = env::finalize(true).context("saving the profile")?;
    let metrics = sampler.metrics();

    if let Some(report) = report {
        if report.timed_out {
            crate::output::warning("timed out waiting for child profiles; merged what was available");
        }
        for path in &report.written {
            crate::output::success(&format!("wrote {}", path.display()));
        }
        crate::output::success(&format!(
            "simulated {} thread(s) for {} ms: {} samples",
            rotations.len(),
            scenario.duration_ms,
            report.sample_count
        ));
    }

    if debug {
        let life = metrics.end_us.saturating_sub(metrics.start_us).max(1);
        crate::output::table(
            "Sampler Metrics",
            &[
                ("Sampling Count", metrics.samples.to_string()),
                ("Accumulated Sampling Time (us)", metrics.acc_sampling_us.to_string()),
                ("Sampler Life Time (us)", life.to_string()),
                (
                    "Sampling Time Rate",
                    format!("{:.2}%", metrics.acc_sampling_us as f64 / life as f64 * 100.0),
                ),
            ],
        );
    }
    Ok(())
}
