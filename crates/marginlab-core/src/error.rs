//! Error taxonomy for the engine.
//!
//! - [`ConfigError`]: the test is not runnable as configured; never defaulted
//! - [`DeviceError`]: a single failed device round-trip; usually transient
//! - [`CalibrationError`]: what the calibration controller can fail with

use thiserror::Error;

// ── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no sweep data for freq={frequency}, symrate={symbol_rate}, power={power}")]
    MissingSweepKey {
        frequency: f64,
        symbol_rate: f64,
        power: f64,
    },
    #[error("no target margin entry for PLS code {0}")]
    UnknownPlsCode(u32),
    #[error("sweep dataset line {line}: {reason}")]
    Dataset { line: usize, reason: String },
    #[error("sweep dataset is missing column `{0}`")]
    MissingColumn(&'static str),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ── Devices ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device unreachable: {0}")]
    Unreachable(String),
    #[error("device rejected request: {0}")]
    Rejected(String),
    #[error("malformed device response: {0}")]
    Malformed(String),
    #[error("operation not supported by this device: {0}")]
    Unsupported(&'static str),
}

// ── Calibration ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("device error during calibration: {0}")]
    Device(#[from] DeviceError),
    #[error("noise register exhausted at {0:#X} with margin still above target")]
    NoiseExhausted(u32),
}
