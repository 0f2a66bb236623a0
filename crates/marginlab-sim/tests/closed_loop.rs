//! # Closed-loop tests: sweep → table → calibrate → evaluate on the sim bench
//!
//! An offline sweep is collected on a bench with no drift, indexed, and then
//! used to calibrate a second bench whose live conditions are offset from
//! the sweep. Everything runs on virtual time.

use std::sync::Arc;
use std::time::Duration;

use marginlab_core::calibration::{CalibrationConfig, CalibrationRequest, Calibrator};
use marginlab_core::clock::{Clock, ManualClock};
use marginlab_core::device::TxSettings;
use marginlab_core::streak::{EvaluationPolicy, StreakEvaluator};
use marginlab_core::sweep::{dataset, SweepCollector, SweepPlan, SweepTable};
use marginlab_sim::bench::SimBenchConfig;
use marginlab_sim::{ChannelModel, FaultKind, FaultScenario, FaultWindow, SimBench};

// ─── Helpers ────────────────────────────────────────────────────────────────

const TX: TxSettings = TxSettings {
    frequency: 1050.0,
    symbol_rate: 6.0,
    power: -10.0,
};

fn bench(model: ChannelModel, scenario: FaultScenario) -> (SimBench, ManualClock) {
    let clock = ManualClock::new();
    let bench = SimBench::new(
        SimBenchConfig {
            model,
            scenario,
            seed: 1,
            margin_jitter_db: 0.0,
        },
        Arc::new(clock.clone()),
    );
    (bench, clock)
}

fn collect_sweep() -> SweepTable {
    let (bench, clock) = bench(ChannelModel::default(), FaultScenario::quiet());
    let plan = SweepPlan {
        frequencies: vec![TX.frequency],
        symbol_rates: vec![TX.symbol_rate],
        powers: vec![TX.power],
        ..SweepPlan::default()
    };

    let mut out = Vec::new();
    dataset::write_header(&mut out).unwrap();
    let report = SweepCollector::new(&clock, &plan)
        .run(
            &mut bench.modulator(),
            &mut bench.demodulator(),
            &mut out,
            None,
        )
        .unwrap();
    assert_eq!(report.points, 1);
    assert!(report.samples > 100);

    let samples = dataset::parse_csv(std::str::from_utf8(&out).unwrap()).unwrap();
    assert!(samples.iter().all(|s| s.margin_db >= -2.2));
    SweepTable::build(samples)
}

// ─── Calibration ────────────────────────────────────────────────────────────

#[test]
fn calibration_absorbs_live_drift() {
    let table = collect_sweep();
    let (bench, clock) = bench(
        ChannelModel::default().with_live_offset(0.8),
        FaultScenario::quiet(),
    );
    let mut m = bench.modulator();
    let mut d = bench.demodulator();

    let result = Calibrator::new(&table, &clock, CalibrationConfig::default())
        .calibrate(&mut m, &mut d, &CalibrationRequest::new(TX, 2.5))
        .unwrap();

    assert!(result.converged);
    assert!(result.steps > 0);
    assert!(result.seed_margin >= 2.5);
    assert!(result.achieved_margin <= 2.8);
    assert!(result.achieved_margin > 2.5);
    assert_eq!(bench.noise(), result.noise.dec);
    assert!(clock.now() >= Duration::from_secs(3 + 5 * result.steps as u64));
}

#[test]
fn calibration_without_drift_needs_no_steps() {
    let table = collect_sweep();
    let (bench, clock) = bench(ChannelModel::default(), FaultScenario::quiet());

    let result = Calibrator::new(&table, &clock, CalibrationConfig::default())
        .calibrate(
            &mut bench.modulator(),
            &mut bench.demodulator(),
            &CalibrationRequest::new(TX, 4.0),
        )
        .unwrap();

    assert_eq!(result.steps, 0);
    assert_eq!(result.achieved_margin, result.seed_margin);
}

// ─── Evaluation ─────────────────────────────────────────────────────────────

#[test]
fn clean_link_reaches_goal() {
    let table = collect_sweep();
    let (bench, clock) = bench(
        ChannelModel::default().with_live_offset(0.8),
        FaultScenario::quiet(),
    );
    let mut m = bench.modulator();
    let mut d = bench.demodulator();

    Calibrator::new(&table, &clock, CalibrationConfig::default())
        .calibrate(&mut m, &mut d, &CalibrationRequest::new(TX, 2.5))
        .unwrap();

    let outcome = StreakEvaluator::new(&clock, EvaluationPolicy::default())
        .evaluate(&mut d, Some(Duration::from_secs(30)));
    assert!(outcome.goal_reached);
    assert!(outcome.best_streak_secs >= 30.0);
    assert!(outcome.best_streak_good >= 30 * 600);
    assert_eq!(outcome.unlock_events, 0);
    assert_eq!(outcome.error_events, 0);
}

#[test]
fn unlock_window_splits_streak() {
    let table = collect_sweep();
    let scenario = FaultScenario::new(vec![FaultWindow::new(
        Duration::from_secs(300),
        Duration::from_secs(302),
        FaultKind::Unlock,
    )]);
    let (bench, clock) = bench(ChannelModel::default().with_live_offset(0.8), scenario);
    let mut m = bench.modulator();
    let mut d = bench.demodulator();

    Calibrator::new(&table, &clock, CalibrationConfig::default())
        .calibrate(&mut m, &mut d, &CalibrationRequest::new(TX, 2.5))
        .unwrap();
    let eval_start = clock.now();
    assert!(eval_start < Duration::from_secs(290));

    let outcome = StreakEvaluator::new(&clock, EvaluationPolicy::default()).evaluate(&mut d, None);
    assert!(!outcome.goal_reached);
    assert!(outcome.unlock_events >= 1);
    assert!(outcome.best_streak_secs > 0.0);
    assert!(outcome.best_streak_secs < 190.0);
}
