//! Noise calibration and link-quality evaluation engine.
//!
//! This crate contains:
//! - **Sweep table**: grouped, margin-ordered index over an offline noise sweep
//! - **Calibration**: closed-loop noise injection onto a target margin
//! - **Streak evaluation**: longest locked, error-free interval within a window
//! - **Device contract**: `Modulator` / `Demodulator` traits the engine drives
//! - **Sweep collection**: builds the offline dataset by stepping noise on a bench
//! - **Config**: TOML bench configuration with resolved defaults
//! - **Liveness**: background "still waiting" notifier for long device waits

pub mod calibration;
pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod liveness;
pub mod noise;
pub mod streak;
pub mod sweep;
pub mod targets;

pub use calibration::{CalibrationRequest, CalibrationResult, Calibrator};
pub use error::{CalibrationError, ConfigError, DeviceError};
pub use streak::{EvaluationPolicy, StreakEvaluator, StreakOutcome};
pub use sweep::{SweepCollector, SweepPlan, SweepTable};
