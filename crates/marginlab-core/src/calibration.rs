//! # Calibration Controller
//!
//! Lands live noise injection just above a target margin:
//!
//! 1. seed the noise setting from the [`SweepTable`]
//! 2. tune modulator and demodulator, wait `initial_settle`
//! 3. while the live margin exceeds `target + buffer`, raise noise by one
//!    register step, wait `step_settle`, re-measure
//!
//! The sweep seed absorbs most of the distance; the loop only corrects the
//! drift between the offline sweep and the live bench. The loop has no
//! built-in bound unless [`CalibrationConfig::max_steps`] is set.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::device::{Demodulator, Modulator, TxSettings};
use crate::error::{CalibrationError, DeviceError};
use crate::noise::NoiseSetting;
use crate::sweep::SweepTable;

pub const DEFAULT_BUFFER_DB: f64 = 0.3;

/// Timing and bounds for the refinement loop.
#[derive(Debug, Clone)]
pub struct CalibrationConfig {
    /// Margin tolerance above target, in dB.
    pub buffer: f64,
    /// Wait after the initial tune before the first reading.
    pub initial_settle: Duration,
    /// Wait after each noise step.
    pub step_settle: Duration,
    /// Cap on refinement steps; `None` runs until converged.
    pub max_steps: Option<u32>,
    /// Consecutive failed margin reads tolerated during refinement.
    pub max_read_failures: u32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            buffer: DEFAULT_BUFFER_DB,
            initial_settle: Duration::from_secs(3),
            step_settle: Duration::from_secs(5),
            max_steps: None,
            max_read_failures: 3,
        }
    }
}

/// What to calibrate.
#[derive(Debug, Clone, Copy)]
pub struct CalibrationRequest {
    pub tx: TxSettings,
    pub target_margin: f64,
    /// Overrides [`CalibrationConfig::buffer`] for this request.
    pub buffer: Option<f64>,
}

impl CalibrationRequest {
    pub fn new(tx: TxSettings, target_margin: f64) -> Self {
        Self {
            tx,
            target_margin,
            buffer: None,
        }
    }

    pub fn with_buffer(mut self, buffer: f64) -> Self {
        self.buffer = Some(buffer);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub requested_margin: f64,
    pub achieved_margin: f64,
    /// Margin the sweep table predicted for the seed setting.
    pub seed_margin: f64,
    pub noise: NoiseSetting,
    /// Noise increments applied after the seed.
    pub steps: u32,
    /// False only when `max_steps` stopped the loop early.
    pub converged: bool,
}

/// Closed-loop noise calibrator bound to a sweep table and a clock.
pub struct Calibrator<'a> {
    table: &'a SweepTable,
    clock: &'a dyn Clock,
    config: CalibrationConfig,
}

impl<'a> Calibrator<'a> {
    pub fn new(table: &'a SweepTable, clock: &'a dyn Clock, config: CalibrationConfig) -> Self {
        Self {
            table,
            clock,
            config,
        }
    }

    /// Seed from the table, tune both ends, then walk noise up until the
    /// live margin is within `buffer` of the target.
    ///
    /// Not idempotent: the devices are left at the calibrated setting.
    pub fn calibrate(
        &self,
        modulator: &mut dyn Modulator,
        demod: &mut dyn Demodulator,
        req: &CalibrationRequest,
    ) -> Result<CalibrationResult, CalibrationError> {
        let tx = req.tx;
        let buffer = req.buffer.unwrap_or(self.config.buffer);
        let ceiling = req.target_margin + buffer;
        tracing::info!(
            freq = tx.frequency,
            symrate = tx.symbol_rate,
            power = tx.power,
            target = req.target_margin,
            buffer,
            "calibrating noise"
        );

        let seed = self
            .table
            .lookup(tx.frequency, tx.symbol_rate, tx.power, req.target_margin)?;
        let mut noise = seed.noise.clone();

        modulator.set_all(tx, noise.dec)?;
        demod.set_all(tx.frequency, tx.symbol_rate)?;
        self.clock.sleep(self.config.initial_settle);

        let mut margin = demod.margin()?;
        tracing::info!(
            margin,
            seed_margin = seed.closest_margin,
            noise = %noise.hex,
            "initial margin after seeding"
        );

        let mut steps = 0u32;
        let mut converged = true;
        while margin > ceiling {
            if self.config.max_steps.is_some_and(|cap| steps >= cap) {
                tracing::warn!(
                    steps,
                    margin,
                    ceiling,
                    "calibration step cap reached before convergence"
                );
                converged = false;
                break;
            }

            noise = noise
                .next()
                .ok_or(CalibrationError::NoiseExhausted(noise.dec))?;
            modulator.set_noise(noise.dec)?;
            steps += 1;
            self.clock.sleep(self.config.step_settle);

            margin = self.read_margin_after_step(demod)?;
            tracing::debug!(noise = noise.dec, margin, "noise step");
        }

        tracing::info!(
            achieved = margin,
            target = req.target_margin,
            noise = %noise.hex,
            steps,
            "calibration finished"
        );

        Ok(CalibrationResult {
            requested_margin: req.target_margin,
            achieved_margin: margin,
            seed_margin: seed.closest_margin,
            noise,
            steps,
            converged,
        })
    }

    /// Read the margin, retrying failed reads after another settle delay.
    fn read_margin_after_step(&self, demod: &mut dyn Demodulator) -> Result<f64, DeviceError> {
        let mut failures = 0u32;
        loop {
            match demod.margin() {
                Ok(m) => return Ok(m),
                Err(e) if failures < self.config.max_read_failures => {
                    failures += 1;
                    tracing::warn!(error = %e, failures, "margin read failed, retrying");
                    self.clock.sleep(self.config.step_settle);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
