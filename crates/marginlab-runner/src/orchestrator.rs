//! # Test orchestrator
//!
//! Runs a plan of test cases against one modulator/demodulator pair:
//!
//! 1. resolve the case's target margin from its PLS code
//! 2. tune both ends (noise off), select the test pattern, switch to Rx1
//! 3. wait for lock; no lock is recorded as a `no_lock` row
//! 4. calibrate noise onto the target margin
//! 5. evaluate the zero-error streak, optionally run the throughput test
//! 6. append the result row
//!
//! A failing case is logged to the problematic-tests file, recorded as a
//! `failed` row, and the plan moves on. A failed connectivity probe aborts
//! the plan before any device is touched.

use chrono::Local;
use thiserror::Error;

use marginlab_core::calibration::{CalibrationRequest, CalibrationResult, Calibrator};
use marginlab_core::clock::Clock;
use marginlab_core::config::{BenchConfig, TestCase};
use marginlab_core::device::{Demodulator, Modulator, RxPath};
use marginlab_core::liveness::LivenessNotifier;
use marginlab_core::streak::{wait_for_lock, StreakEvaluator, StreakOutcome};
use marginlab_core::sweep::SweepTable;
use marginlab_core::targets::TargetTable;
use marginlab_core::{CalibrationError, ConfigError, DeviceError};

use crate::probe;
use crate::results::{self, ProblemEntry, ResultRow};

#[derive(Debug, Error)]
pub enum CaseError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("device setup failed: {0}")]
    Device(#[from] DeviceError),
    #[error("calibration failed: {0}")]
    Calibration(#[from] CalibrationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseStatus {
    Completed,
    NoLock,
    Failed,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Completed => "completed",
            CaseStatus::NoLock => "no_lock",
            CaseStatus::Failed => "failed",
        }
    }
}

/// Everything recorded about one case.
#[derive(Debug, Clone)]
pub struct CaseReport {
    pub case: TestCase,
    pub info: Vec<(String, String)>,
    pub status: CaseStatus,
    pub target_margin: Option<f64>,
    pub calibration: Option<CalibrationResult>,
    pub streak: StreakOutcome,
    pub packet_loss: Option<f64>,
}

impl CaseReport {
    pub fn new(case: TestCase, info: Vec<(String, String)>) -> Self {
        Self {
            case,
            info,
            status: CaseStatus::Failed,
            target_margin: None,
            calibration: None,
            streak: StreakOutcome::empty(),
            packet_loss: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub completed: usize,
    pub no_lock: usize,
    pub failed: usize,
}

impl PlanSummary {
    pub fn total(&self) -> usize {
        self.completed + self.no_lock + self.failed
    }
}

pub struct Orchestrator<'a> {
    config: &'a BenchConfig,
    table: &'a SweepTable,
    targets: &'a TargetTable,
    clock: &'a dyn Clock,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a BenchConfig,
        table: &'a SweepTable,
        targets: &'a TargetTable,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            config,
            table,
            targets,
            clock,
        }
    }

    /// Probe connectivity, then run every case in order, persisting each
    /// outcome as it completes.
    pub fn run_plan(
        &self,
        modulator: &mut dyn Modulator,
        demod: &mut dyn Demodulator,
        cases: &[TestCase],
    ) -> anyhow::Result<PlanSummary> {
        let probe_cfg = &self.config.probe;
        if !probe_cfg.hosts.is_empty() {
            let results = probe::probe_all(&probe_cfg.hosts, probe_cfg.timeout);
            let down: Vec<&str> = results
                .iter()
                .filter(|r| !r.reachable)
                .map(|r| r.host.as_str())
                .collect();
            if !down.is_empty() {
                anyhow::bail!("connectivity check failed, unreachable: {}", down.join(", "));
            }
            tracing::info!(hosts = results.len(), "connectivity check passed");
        }

        let mut summary = PlanSummary::default();
        for (idx, case) in cases.iter().enumerate() {
            tracing::info!(
                case = idx + 1,
                of = cases.len(),
                freq = case.tx.frequency,
                symrate = case.tx.symbol_rate,
                power = case.tx.power,
                pls = case.pls,
                goal_s = case.goal.map(|g| g.as_secs_f64()),
                "starting test"
            );
            let report = self.run_case(modulator, demod, case)?;
            match report.status {
                CaseStatus::Completed => summary.completed += 1,
                CaseStatus::NoLock => summary.no_lock += 1,
                CaseStatus::Failed => summary.failed += 1,
            }
        }

        tracing::info!(
            completed = summary.completed,
            no_lock = summary.no_lock,
            failed = summary.failed,
            "test plan finished"
        );
        Ok(summary)
    }

    /// Run one case and persist its outcome. Only persistence failures are
    /// returned as errors; case failures are recorded.
    pub fn run_case(
        &self,
        modulator: &mut dyn Modulator,
        demod: &mut dyn Demodulator,
        case: &TestCase,
    ) -> anyhow::Result<CaseReport> {
        let info = demod.general_info().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "device identity unavailable");
            Vec::new()
        });
        let mut report = CaseReport::new(*case, info);

        if let Err(e) = self.execute(modulator, demod, case, &mut report) {
            tracing::error!(error = %e, pls = case.pls, "test failed");
            report.status = CaseStatus::Failed;
            let entry = ProblemEntry::from_report(&report, &e.to_string(), Local::now());
            results::append_problem(&self.config.paths.problematic, &entry)?;
        }

        let window = self.config.policy.evaluation_window.as_secs_f64();
        let row = ResultRow::from_report(&report, window, Local::now());
        results::append_result(&self.config.paths.results, &row)?;
        Ok(report)
    }

    fn execute(
        &self,
        modulator: &mut dyn Modulator,
        demod: &mut dyn Demodulator,
        case: &TestCase,
        report: &mut CaseReport,
    ) -> Result<(), CaseError> {
        let target = self.targets.minimum_margin(case.pls)?;
        report.target_margin = Some(target);

        modulator.set_all(case.tx, 0)?;
        modulator.set_pls(case.pls)?;
        demod.set_all(case.tx.frequency, case.tx.symbol_rate)?;
        demod.switch_path(RxPath::Rx1)?;

        let label = format!(
            "test f={} s={} p={} pls={}",
            case.tx.frequency, case.tx.symbol_rate, case.tx.power, case.pls
        );
        let liveness = LivenessNotifier::start(label, self.config.liveness_interval);

        if !wait_for_lock(demod, self.clock, self.config.policy.lock_wait) {
            tracing::warn!(
                budget_s = self.config.policy.lock_wait.as_secs_f64(),
                "device did not lock; skipping calibration"
            );
            report.status = CaseStatus::NoLock;
            return Ok(());
        }
        liveness.report();

        let request = CalibrationRequest::new(case.tx, target);
        let calibration = Calibrator::new(self.table, self.clock, self.config.calibration.clone())
            .calibrate(modulator, demod, &request)?;
        report.calibration = Some(calibration);
        liveness.report();

        report.streak = StreakEvaluator::new(self.clock, self.config.policy).evaluate(demod, case.goal);
        report.packet_loss = self.throughput(demod);
        report.status = CaseStatus::Completed;

        tracing::info!(
            best_streak_s = report.streak.best_streak_secs,
            good = report.streak.best_streak_good,
            goal_reached = report.streak.goal_reached,
            "test completed"
        );
        Ok(())
    }

    fn throughput(&self, demod: &mut dyn Demodulator) -> Option<f64> {
        let cfg = &self.config.throughput;
        if !cfg.enabled {
            return None;
        }
        match demod.run_throughput_test(cfg.duration) {
            Ok(loss) => {
                tracing::info!(packet_loss_pct = loss, "throughput test finished");
                Some(loss)
            }
            Err(DeviceError::Unsupported(_)) => {
                tracing::info!("device has no throughput side channel");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "throughput test failed");
                None
            }
        }
    }
}

