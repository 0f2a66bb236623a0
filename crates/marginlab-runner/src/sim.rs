//! Simulated-bench wiring for `--simulate` runs.

use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use marginlab_core::clock::ManualClock;
use marginlab_core::config::TestCase;
use marginlab_core::sweep::{dataset, SweepCollector, SweepKey, SweepPlan, SweepReport};
use marginlab_sim::bench::SimBenchConfig;
use marginlab_sim::{ChannelModel, FaultScenario, ScenarioConfig, SimBench};

/// Bench with live conditions offset from the sweep by `live_offset_db`.
/// A seed adds a generated fault scenario covering `horizon` of bench time.
pub fn bench(
    clock: &ManualClock,
    seed: Option<u64>,
    live_offset_db: f64,
    horizon: Duration,
) -> SimBench {
    let scenario = seed.map_or_else(FaultScenario::quiet, |seed| {
        FaultScenario::generate(&ScenarioConfig {
            seed,
            duration: horizon,
            ..ScenarioConfig::default()
        })
    });
    SimBench::new(
        SimBenchConfig {
            model: ChannelModel::default().with_live_offset(live_offset_db),
            scenario,
            seed: seed.unwrap_or_default(),
            margin_jitter_db: 0.0,
        },
        Arc::new(clock.clone()),
    )
}

/// Collect a drift-free sweep for every distinct operating point in `cases`
/// unless `path` already holds data.
pub fn ensure_sweep(path: &Path, cases: &[TestCase], base: &SweepPlan) -> anyhow::Result<()> {
    if std::fs::metadata(path).is_ok_and(|m| m.len() > 0) {
        return Ok(());
    }

    let points: BTreeSet<SweepKey> = cases
        .iter()
        .map(|c| SweepKey::new(c.tx.frequency, c.tx.symbol_rate, c.tx.power))
        .collect();

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("creating sweep file {}", path.display()))?;
    let mut out = BufWriter::new(file);
    dataset::write_header(&mut out)?;

    let clock = ManualClock::new();
    let sweep_bench = bench(&clock, None, 0.0, Duration::ZERO);
    let mut total = SweepReport::default();
    for key in &points {
        let plan = SweepPlan {
            frequencies: vec![key.frequency()],
            symbol_rates: vec![key.symbol_rate()],
            powers: vec![key.power()],
            ..base.clone()
        };
        let report = SweepCollector::new(&clock, &plan).run(
            &mut sweep_bench.modulator(),
            &mut sweep_bench.demodulator(),
            &mut out,
            None,
        )?;
        total.points += report.points;
        total.samples += report.samples;
    }

    tracing::info!(
        path = %path.display(),
        points = total.points,
        samples = total.samples,
        "simulated sweep collected"
    );
    Ok(())
}
