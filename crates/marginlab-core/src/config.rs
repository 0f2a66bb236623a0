use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::calibration::CalibrationConfig;
use crate::device::TxSettings;
use crate::error::ConfigError;
use crate::streak::EvaluationPolicy;
use crate::sweep::collector::SweepPlan;

pub const CONFIG_VERSION: u32 = 1;

// ── Raw TOML input ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BenchConfigInput {
    pub version: u32,
    pub paths: PathsConfigInput,
    pub timeouts: TimeoutsConfigInput,
    pub calibration: CalibrationConfigInput,
    pub liveness: LivenessConfigInput,
    pub throughput: ThroughputConfigInput,
    pub probe: ProbeConfigInput,
    pub sweep: SweepConfigInput,
    pub tests: Vec<TestCaseInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfigInput {
    pub sweep: Option<PathBuf>,
    pub targets: Option<PathBuf>,
    pub results: Option<PathBuf>,
    pub problematic: Option<PathBuf>,
    /// Optional JSON test plan, appended after the inline `[[tests]]`.
    pub tests: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfigInput {
    pub lock_wait: Option<f64>,
    pub evaluation_window: Option<f64>,
    pub poll_interval: Option<f64>,
    pub stabilize_after_reset: Option<f64>,
    pub heartbeat_interval: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CalibrationConfigInput {
    pub buffer: Option<f64>,
    pub initial_settle: Option<f64>,
    pub step_settle: Option<f64>,
    pub max_steps: Option<u32>,
    pub max_read_failures: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LivenessConfigInput {
    pub interval: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ThroughputConfigInput {
    pub enabled: Option<bool>,
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProbeConfigInput {
    pub timeout: Option<f64>,
    pub hosts: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SweepConfigInput {
    pub frequencies: Vec<f64>,
    pub symbol_rates: Vec<f64>,
    pub powers: Vec<f64>,
    pub noise_base: Option<u32>,
    pub noise_span: Option<u32>,
    pub noise_step: Option<u32>,
    pub settle: Option<f64>,
    pub tune_settle: Option<f64>,
    pub stop_margin: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TestCaseInput {
    pub frequency: f64,
    pub symbol_rate: f64,
    pub power: f64,
    pub pls: u32,
    pub goal_secs: f64,
}

// ── Resolved config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct PathsConfig {
    pub sweep: PathBuf,
    pub targets: PathBuf,
    pub results: PathBuf,
    pub problematic: PathBuf,
    pub tests: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            sweep: PathBuf::from("sweep_results.csv"),
            targets: PathBuf::from("plscodes.json"),
            results: PathBuf::from("tests_results.csv"),
            problematic: PathBuf::from("problematic_tests.json"),
            tests: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThroughputConfig {
    pub enabled: bool,
    pub duration: Duration,
}

impl Default for ThroughputConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            duration: Duration::from_secs(30),
        }
    }
}

/// Connectivity probe; an empty host list disables it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfig {
    pub timeout: Duration,
    pub hosts: Vec<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            hosts: Vec::new(),
        }
    }
}

/// One entry of the test plan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestCase {
    pub tx: TxSettings,
    pub pls: u32,
    /// Early-exit streak goal; `None` evaluates for the full window.
    pub goal: Option<Duration>,
}

impl TestCase {
    fn from_parts(
        frequency: f64,
        symbol_rate: f64,
        power: f64,
        pls: u32,
        goal_secs: f64,
    ) -> Result<Self, ConfigError> {
        for (name, v) in [
            ("frequency", frequency),
            ("symbol_rate", symbol_rate),
            ("power", power),
            ("goal_secs", goal_secs),
        ] {
            if !v.is_finite() {
                return Err(ConfigError::Invalid(format!("test case {name} is not finite")));
            }
        }
        let goal = if goal_secs > 0.0 {
            Some(Duration::try_from_secs_f64(goal_secs).map_err(|e| {
                ConfigError::Invalid(format!("test case goal_secs {goal_secs}: {e}"))
            })?)
        } else {
            None
        };
        Ok(Self {
            tx: TxSettings {
                frequency,
                symbol_rate,
                power,
            },
            pls,
            goal,
        })
    }
}

#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub version: u32,
    pub paths: PathsConfig,
    pub policy: EvaluationPolicy,
    pub calibration: CalibrationConfig,
    pub liveness_interval: Duration,
    pub throughput: ThroughputConfig,
    pub probe: ProbeConfig,
    pub sweep: SweepPlan,
    pub tests: Vec<TestCase>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            paths: PathsConfig::default(),
            policy: EvaluationPolicy::default(),
            calibration: CalibrationConfig::default(),
            liveness_interval: Duration::from_secs(3),
            throughput: ThroughputConfig::default(),
            probe: ProbeConfig::default(),
            sweep: SweepPlan::default(),
            tests: Vec::new(),
        }
    }
}

fn seconds(field: &str, value: Option<f64>, default: Duration) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => Duration::try_from_secs_f64(v)
            .map_err(|_| ConfigError::Invalid(format!("{field} must be a non-negative duration"))),
    }
}

impl BenchConfigInput {
    pub fn resolve(self) -> Result<BenchConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {version}"
            )));
        }

        let defaults = BenchConfig::default();

        let paths = PathsConfig {
            sweep: self.paths.sweep.unwrap_or(defaults.paths.sweep),
            targets: self.paths.targets.unwrap_or(defaults.paths.targets),
            results: self.paths.results.unwrap_or(defaults.paths.results),
            problematic: self.paths.problematic.unwrap_or(defaults.paths.problematic),
            tests: self.paths.tests,
        };

        let t = &self.timeouts;
        let d = &defaults.policy;
        let policy = EvaluationPolicy {
            lock_wait: seconds("timeouts.lock_wait", t.lock_wait, d.lock_wait)?,
            evaluation_window: seconds(
                "timeouts.evaluation_window",
                t.evaluation_window,
                d.evaluation_window,
            )?,
            poll_interval: seconds("timeouts.poll_interval", t.poll_interval, d.poll_interval)?,
            stabilize_after_reset: seconds(
                "timeouts.stabilize_after_reset",
                t.stabilize_after_reset,
                d.stabilize_after_reset,
            )?,
            heartbeat_interval: seconds(
                "timeouts.heartbeat_interval",
                t.heartbeat_interval,
                d.heartbeat_interval,
            )?,
        };
        if policy.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "timeouts.poll_interval must be positive".into(),
            ));
        }

        let c = &self.calibration;
        let dc = &defaults.calibration;
        let buffer = c.buffer.unwrap_or(dc.buffer);
        if !buffer.is_finite() || buffer < 0.0 {
            return Err(ConfigError::Invalid(
                "calibration.buffer must be a non-negative number".into(),
            ));
        }
        let calibration = CalibrationConfig {
            buffer,
            initial_settle: seconds(
                "calibration.initial_settle",
                c.initial_settle,
                dc.initial_settle,
            )?,
            step_settle: seconds("calibration.step_settle", c.step_settle, dc.step_settle)?,
            max_steps: c.max_steps,
            max_read_failures: c.max_read_failures.unwrap_or(dc.max_read_failures).max(1),
        };

        let liveness_interval = seconds(
            "liveness.interval",
            self.liveness.interval,
            defaults.liveness_interval,
        )?;
        if liveness_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "liveness.interval must be positive".into(),
            ));
        }

        let throughput = ThroughputConfig {
            enabled: self.throughput.enabled.unwrap_or(defaults.throughput.enabled),
            duration: seconds(
                "throughput.duration",
                self.throughput.duration,
                defaults.throughput.duration,
            )?,
        };

        let probe = ProbeConfig {
            timeout: seconds("probe.timeout", self.probe.timeout, defaults.probe.timeout)?,
            hosts: self
                .probe
                .hosts
                .into_iter()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect(),
        };

        let s = self.sweep;
        let ds = defaults.sweep;
        let sweep = SweepPlan {
            frequencies: s.frequencies,
            symbol_rates: s.symbol_rates,
            powers: s.powers,
            noise_base: s.noise_base.unwrap_or(ds.noise_base),
            noise_span: s.noise_span.unwrap_or(ds.noise_span),
            noise_step: s.noise_step.unwrap_or(ds.noise_step),
            settle: seconds("sweep.settle", s.settle, ds.settle)?,
            tune_settle: seconds("sweep.tune_settle", s.tune_settle, ds.tune_settle)?,
            stop_margin: s.stop_margin.unwrap_or(ds.stop_margin),
            max_lock_failures: ds.max_lock_failures,
            max_read_failures: ds.max_read_failures,
        };
        if sweep.noise_step == 0 {
            return Err(ConfigError::Invalid("sweep.noise_step must be positive".into()));
        }

        let tests = self
            .tests
            .into_iter()
            .map(|t| TestCase::from_parts(t.frequency, t.symbol_rate, t.power, t.pls, t.goal_secs))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(BenchConfig {
            version,
            paths,
            policy,
            calibration,
            liveness_interval,
            throughput,
            probe,
            sweep,
            tests,
        })
    }
}

impl BenchConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(BenchConfig::default());
        }
        let parsed: BenchConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }

    /// Load a TOML config. A `paths.tests` plan, if set, is read relative to
    /// the working directory and appended to the inline tests.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let mut cfg = Self::from_toml_str(&text)?;
        if let Some(plan) = cfg.paths.tests.clone() {
            let extra = parse_test_plan_json(&std::fs::read_to_string(&plan)?)?;
            tracing::info!(plan = %plan.display(), cases = extra.len(), "loaded test plan");
            cfg.tests.extend(extra);
        }
        Ok(cfg)
    }
}

/// Parse a JSON test plan: `{"tests": [[freq, symrate, power, pls, goal], ...]}`
/// or a bare array of the same rows.
pub fn parse_test_plan_json(input: &str) -> Result<Vec<TestCase>, ConfigError> {
    type Row = (f64, f64, f64, u32, f64);

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Plan {
        Wrapped { tests: Vec<Row> },
        Bare(Vec<Row>),
    }

    let rows = match serde_json::from_str::<Plan>(input)? {
        Plan::Wrapped { tests } => tests,
        Plan::Bare(rows) => rows,
    };
    rows.into_iter()
        .map(|(f, s, p, pls, goal)| TestCase::from_parts(f, s, p, pls, goal))
        .collect()
}
