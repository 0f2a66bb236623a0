//! Sweep collector: builds a dataset by stepping noise on a live bench.
//!
//! For every (frequency, symbol rate, power) point in the plan, noise starts
//! at `noise_base` and climbs by `noise_step` up to `noise_span`. A point's
//! sweep ends early once the margin falls below `stop_margin`, or after
//! `max_lock_failures` unlocked readings or `max_read_failures` unreadable
//! margins in a row. Only locked readings become dataset rows.

use std::io::{self, Write};
use std::time::Duration;

use crate::clock::Clock;
use crate::device::{Demodulator, Modulator, TxSettings};
use crate::noise::{sweep_label, NoiseSetting};

use super::dataset::{self, SweepSample};
use super::table::SweepKey;

pub const DEFAULT_NOISE_BASE: u32 = 0x1C000;
pub const DEFAULT_NOISE_SPAN: u32 = 0x1000;
pub const DEFAULT_STOP_MARGIN_DB: f64 = -2.2;

#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    pub frequencies: Vec<f64>,
    pub symbol_rates: Vec<f64>,
    pub powers: Vec<f64>,
    pub noise_base: u32,
    pub noise_span: u32,
    pub noise_step: u32,
    /// Wait after each noise write before reading the demodulator.
    pub settle: Duration,
    /// Wait after tuning a new operating point.
    pub tune_settle: Duration,
    pub stop_margin: f64,
    pub max_lock_failures: u32,
    pub max_read_failures: u32,
}

impl Default for SweepPlan {
    fn default() -> Self {
        Self {
            frequencies: Vec::new(),
            symbol_rates: Vec::new(),
            powers: Vec::new(),
            noise_base: DEFAULT_NOISE_BASE,
            noise_span: DEFAULT_NOISE_SPAN,
            noise_step: 4,
            settle: Duration::from_secs(5),
            tune_settle: Duration::from_secs(2),
            stop_margin: DEFAULT_STOP_MARGIN_DB,
            max_lock_failures: 3,
            max_read_failures: 3,
        }
    }
}

impl SweepPlan {
    /// Operating points in sweep order: frequency, then symbol rate, then power.
    pub fn points(&self) -> impl Iterator<Item = TxSettings> + '_ {
        self.frequencies.iter().flat_map(move |&frequency| {
            self.symbol_rates.iter().flat_map(move |&symbol_rate| {
                self.powers.iter().map(move |&power| TxSettings {
                    frequency,
                    symbol_rate,
                    power,
                })
            })
        })
    }

    /// Noise register values for one point, saturating at the register top.
    pub fn noise_values(&self) -> impl Iterator<Item = u32> + '_ {
        let step = self.noise_step.max(1) as usize;
        (0..self.noise_span)
            .step_by(step)
            .map_while(move |offset| self.noise_base.checked_add(offset))
    }
}

/// Totals from one collection run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub points: usize,
    pub samples: usize,
    /// Points whose sweep ended on a device error.
    pub device_errors: usize,
}

/// Why a point's noise sweep stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PointEnd {
    Exhausted,
    BelowFloor,
    LockLost,
    Unreadable,
    DeviceError,
}

pub struct SweepCollector<'a> {
    clock: &'a dyn Clock,
    plan: &'a SweepPlan,
}

impl<'a> SweepCollector<'a> {
    pub fn new(clock: &'a dyn Clock, plan: &'a SweepPlan) -> Self {
        Self { clock, plan }
    }

    /// Sweep every point and stream locked samples to `out`.
    ///
    /// `resume_after` is the last row of a previous, interrupted run: points
    /// before it are skipped, and on its own point only higher noise values
    /// are measured. Device failures end the affected point only; write
    /// failures on `out` abort the run.
    pub fn run<W: Write>(
        &self,
        modulator: &mut dyn Modulator,
        demod: &mut dyn Demodulator,
        out: &mut W,
        resume_after: Option<&SweepSample>,
    ) -> io::Result<SweepReport> {
        let mut report = SweepReport::default();
        let mut resume = resume_after.map(|s| {
            (
                SweepKey::new(s.frequency, s.symbol_rate, s.power),
                s.noise.dec,
            )
        });

        for tx in self.plan.points() {
            let key = SweepKey::new(tx.frequency, tx.symbol_rate, tx.power);
            let mut skip_through = None;
            if let Some((resume_key, resume_noise)) = resume {
                if resume_key != key {
                    continue;
                }
                skip_through = Some(resume_noise);
                resume = None;
            }

            report.points += 1;
            let (end, written) = self.sweep_point(modulator, demod, out, tx, skip_through)?;
            report.samples += written;
            if end == PointEnd::DeviceError {
                report.device_errors += 1;
            }
            tracing::info!(
                freq = tx.frequency,
                symrate = tx.symbol_rate,
                power = tx.power,
                samples = written,
                end = ?end,
                "sweep point done"
            );
        }

        if let Some((key, _)) = resume {
            tracing::warn!(
                freq = key.frequency(),
                symrate = key.symbol_rate(),
                power = key.power(),
                "resume point not found in plan; nothing swept"
            );
        }
        Ok(report)
    }

    fn sweep_point<W: Write>(
        &self,
        modulator: &mut dyn Modulator,
        demod: &mut dyn Demodulator,
        out: &mut W,
        tx: TxSettings,
        skip_through: Option<u32>,
    ) -> io::Result<(PointEnd, usize)> {
        let plan = self.plan;
        let tuned = modulator
            .set_all(tx, plan.noise_base)
            .and_then(|()| demod.set_all(tx.frequency, tx.symbol_rate));
        if let Err(e) = tuned {
            tracing::error!(
                freq = tx.frequency,
                symrate = tx.symbol_rate,
                power = tx.power,
                error = %e,
                "failed to tune sweep point"
            );
            return Ok((PointEnd::DeviceError, 0));
        }
        self.clock.sleep(plan.tune_settle);

        let mut lock_failures = 0u32;
        let mut read_failures = 0u32;
        let mut written = 0usize;

        for noise in plan.noise_values() {
            if skip_through.is_some_and(|last| noise <= last) {
                continue;
            }

            if let Err(e) = modulator.set_noise(noise) {
                tracing::error!(noise = %sweep_label(noise), error = %e, "failed to write noise");
                return Ok((PointEnd::DeviceError, written));
            }
            self.clock.sleep(plan.settle);

            let locked = match demod.is_locked() {
                Ok(l) => l,
                Err(e) => {
                    tracing::error!(noise = %sweep_label(noise), error = %e, "demodulator read failed");
                    return Ok((PointEnd::DeviceError, written));
                }
            };

            let margin = if locked {
                match demod.margin() {
                    Ok(m) => Some(m),
                    Err(e) => {
                        tracing::debug!(noise = %sweep_label(noise), error = %e, "margin unreadable");
                        None
                    }
                }
            } else {
                None
            };

            lock_failures = if locked { 0 } else { lock_failures + 1 };
            read_failures = if margin.is_some() { 0 } else { read_failures + 1 };

            if margin.is_some_and(|m| m < plan.stop_margin) {
                return Ok((PointEnd::BelowFloor, written));
            }
            if lock_failures >= plan.max_lock_failures {
                return Ok((PointEnd::LockLost, written));
            }
            if read_failures >= plan.max_read_failures {
                return Ok((PointEnd::Unreadable, written));
            }

            let Some(margin_db) = margin else {
                continue;
            };
            let sample = SweepSample {
                frequency: tx.frequency,
                symbol_rate: tx.symbol_rate,
                power: tx.power,
                noise: NoiseSetting::with_label(sweep_label(noise), noise),
                locked,
                margin_db,
            };
            dataset::write_row(out, &sample)?;
            out.flush()?;
            written += 1;
            tracing::debug!(noise = %sample.noise.hex, margin_db, "sample recorded");
        }

        Ok((PointEnd::Exhausted, written))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::device::{FrameCounters, RxPath};
    use crate::error::DeviceError;

    /// Margin falls 1 dB per noise step of 4 above the base, starting at
    /// `start_margin`.
    struct Bench {
        noise: Rc<Cell<u32>>,
        start_margin: f64,
        unlock_below: f64,
        fail_margin_reads: bool,
        fail_tune_freq: Option<f64>,
    }

    struct Mod {
        noise: Rc<Cell<u32>>,
        fail_tune_freq: Option<f64>,
    }

    impl Modulator for Mod {
        fn set_all(&mut self, tx: TxSettings, noise: u32) -> Result<(), DeviceError> {
            if Some(tx.frequency) == self.fail_tune_freq {
                return Err(DeviceError::Rejected("frequency out of range".into()));
            }
            self.noise.set(noise);
            Ok(())
        }
        fn set_noise(&mut self, noise: u32) -> Result<(), DeviceError> {
            self.noise.set(noise);
            Ok(())
        }
        fn set_pls(&mut self, _pls: u32) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    impl Bench {
        fn new(start_margin: f64) -> Self {
            Self {
                noise: Rc::new(Cell::new(0)),
                start_margin,
                unlock_below: f64::NEG_INFINITY,
                fail_margin_reads: false,
                fail_tune_freq: None,
            }
        }

        fn modulator(&self) -> Mod {
            Mod {
                noise: self.noise.clone(),
                fail_tune_freq: self.fail_tune_freq,
            }
        }

        fn current_margin(&self) -> f64 {
            let steps = (self.noise.get() - DEFAULT_NOISE_BASE) / 4;
            self.start_margin - steps as f64
        }
    }

    impl Demodulator for Bench {
        fn set_all(&mut self, _f: f64, _s: f64) -> Result<(), DeviceError> {
            Ok(())
        }
        fn switch_path(&mut self, _path: RxPath) -> Result<(), DeviceError> {
            Ok(())
        }
        fn is_locked(&mut self) -> Result<bool, DeviceError> {
            Ok(self.current_margin() >= self.unlock_below)
        }
        fn margin(&mut self) -> Result<f64, DeviceError> {
            if self.fail_margin_reads {
                return Err(DeviceError::Malformed("esno".into()));
            }
            Ok(self.current_margin())
        }
        fn frame_counters(&mut self) -> Result<FrameCounters, DeviceError> {
            Ok(FrameCounters::default())
        }
        fn reset_counters(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    fn plan_one_point() -> SweepPlan {
        SweepPlan {
            frequencies: vec![1050.0],
            symbol_rates: vec![6.0],
            powers: vec![-10.0],
            ..SweepPlan::default()
        }
    }

    fn collected(out: Vec<u8>) -> Vec<SweepSample> {
        let mut text = dataset::HEADER.join(",");
        text.push('\n');
        text.push_str(&String::from_utf8(out).unwrap());
        dataset::parse_csv(&text).unwrap()
    }

    #[test]
    fn plan_points_iterate_frequency_major() {
        let plan = SweepPlan {
            frequencies: vec![950.0, 1050.0],
            symbol_rates: vec![1.0],
            powers: vec![-30.0, -25.0],
            ..SweepPlan::default()
        };
        let pts: Vec<(f64, f64)> = plan.points().map(|t| (t.frequency, t.power)).collect();
        assert_eq!(
            pts,
            vec![(950.0, -30.0), (950.0, -25.0), (1050.0, -30.0), (1050.0, -25.0)]
        );
    }

    #[test]
    fn noise_values_cover_span_by_step() {
        let plan = SweepPlan::default();
        let values: Vec<u32> = plan.noise_values().collect();
        assert_eq!(values.len(), 0x1000 / 4);
        assert_eq!(values[0], 0x1C000);
        assert_eq!(values[1], 0x1C004);
        assert_eq!(*values.last().unwrap(), 0x1C000 + 0x1000 - 4);
    }

    #[test]
    fn stops_below_margin_floor() {
        let clock = ManualClock::new();
        let plan = plan_one_point();
        let mut bench = Bench::new(10.0);
        let mut m = bench.modulator();
        let mut out = Vec::new();

        let report = SweepCollector::new(&clock, &plan)
            .run(&mut m, &mut bench, &mut out, None)
            .unwrap();

        // Margins 10, 9, ..., -2 are recorded; -3 ends the point.
        assert_eq!(report.points, 1);
        assert_eq!(report.samples, 13);
        assert_eq!(report.device_errors, 0);
        let rows = collected(out);
        assert_eq!(rows.len(), 13);
        assert_eq!(rows[0].noise.hex, "0X1C000");
        assert_eq!(rows[1].noise.dec, 0x1C004);
        assert_eq!(rows[12].margin_db, -2.0);
        assert!(rows.iter().all(|r| r.locked));
        // 2s tune + 14 noise writes at 5s each.
        assert_eq!(clock.now(), Duration::from_secs(72));
    }

    #[test]
    fn consecutive_unlocks_end_point() {
        let clock = ManualClock::new();
        let plan = plan_one_point();
        let mut bench = Bench::new(3.0);
        bench.unlock_below = 0.5;
        let mut m = bench.modulator();
        let mut out = Vec::new();

        let report = SweepCollector::new(&clock, &plan)
            .run(&mut m, &mut bench, &mut out, None)
            .unwrap();

        // 3, 2, 1 locked; three unlocked readings follow.
        assert_eq!(report.samples, 3);
        assert_eq!(clock.now(), Duration::from_secs(2 + 6 * 5));
    }

    #[test]
    fn unreadable_margins_end_point() {
        let clock = ManualClock::new();
        let plan = plan_one_point();
        let mut bench = Bench::new(10.0);
        bench.fail_margin_reads = true;
        let mut m = bench.modulator();
        let mut out = Vec::new();

        let report = SweepCollector::new(&clock, &plan)
            .run(&mut m, &mut bench, &mut out, None)
            .unwrap();
        assert_eq!(report.samples, 0);
        assert!(out.is_empty());
        assert_eq!(clock.now(), Duration::from_secs(2 + 3 * 5));
    }

    #[test]
    fn tune_failure_skips_point_and_continues() {
        let clock = ManualClock::new();
        let plan = SweepPlan {
            frequencies: vec![950.0, 1050.0],
            ..plan_one_point()
        };
        let mut bench = Bench::new(0.0);
        bench.fail_tune_freq = Some(950.0);
        let mut m = bench.modulator();
        let mut out = Vec::new();

        let report = SweepCollector::new(&clock, &plan)
            .run(&mut m, &mut bench, &mut out, None)
            .unwrap();
        assert_eq!(report.points, 2);
        assert_eq!(report.device_errors, 1);
        // 0, -1, -2 recorded at 1050 MHz.
        assert_eq!(report.samples, 3);
        assert!(collected(out).iter().all(|r| r.frequency == 1050.0));
    }

    #[test]
    fn resume_skips_measured_noise() {
        let clock = ManualClock::new();
        let plan = SweepPlan {
            frequencies: vec![950.0, 1050.0],
            ..plan_one_point()
        };
        let mut bench = Bench::new(10.0);
        let mut m = bench.modulator();
        let mut out = Vec::new();

        let last = SweepSample {
            frequency: 1050.0,
            symbol_rate: 6.0,
            power: -10.0,
            noise: NoiseSetting::from_dec(0x1C000 + 40),
            locked: true,
            margin_db: 0.0,
        };
        let report = SweepCollector::new(&clock, &plan)
            .run(&mut m, &mut bench, &mut out, Some(&last))
            .unwrap();

        assert_eq!(report.points, 1);
        let rows = collected(out);
        assert_eq!(rows[0].noise.dec, 0x1C000 + 44);
        assert_eq!(rows[0].margin_db, -1.0);
        assert_eq!(rows.len(), 2);
    }
}
