//! Device capability contract.
//!
//! The engine drives two roles: the [`Modulator`] (transmit side, owns the
//! noise actuator) and the [`Demodulator`] (receive side / device under
//! test, reports lock, margin and frame counters). Each hardware family
//! implements these traits; the engine never branches on concrete type.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// Transmit parameters applied in one batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TxSettings {
    /// Carrier frequency in MHz.
    pub frequency: f64,
    /// Symbol rate in Msps.
    pub symbol_rate: f64,
    /// Output power in dBm.
    pub power: f64,
}

/// Receiver input path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RxPath {
    Rx1,
    Rx2,
}

/// Test-pattern frame counters since the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameCounters {
    pub good: u64,
    pub bad: u64,
    pub missed: u64,
}

impl FrameCounters {
    /// Bad plus missed frames.
    pub fn errors(&self) -> u64 {
        self.bad.saturating_add(self.missed)
    }

    /// Lost frames as a percentage of all frames, 0.0 when nothing was counted.
    pub fn loss_percent(&self) -> f64 {
        let total = self.good.saturating_add(self.errors());
        if total == 0 {
            return 0.0;
        }
        self.errors() as f64 / total as f64 * 100.0
    }
}

/// Transmit side: tuning and noise injection.
pub trait Modulator {
    /// Apply frequency, symbol rate, power and noise in one batch.
    fn set_all(&mut self, tx: TxSettings, noise: u32) -> Result<(), DeviceError>;

    /// Change only the injected noise.
    fn set_noise(&mut self, noise: u32) -> Result<(), DeviceError>;

    /// Select the test-pattern PLS code.
    fn set_pls(&mut self, pls: u32) -> Result<(), DeviceError>;
}

/// Receive side: the device whose link quality is measured.
pub trait Demodulator {
    /// Tune to frequency (MHz) and symbol rate (Msps).
    fn set_all(&mut self, frequency: f64, symbol_rate: f64) -> Result<(), DeviceError>;

    fn switch_path(&mut self, path: RxPath) -> Result<(), DeviceError>;

    fn is_locked(&mut self) -> Result<bool, DeviceError>;

    /// Current signal margin (Es/N0) in dB.
    fn margin(&mut self) -> Result<f64, DeviceError>;

    fn frame_counters(&mut self) -> Result<FrameCounters, DeviceError>;

    fn reset_counters(&mut self) -> Result<(), DeviceError>;

    /// Run the throughput side channel for `duration` and return the
    /// packet-loss percentage.
    fn run_throughput_test(&mut self, _duration: Duration) -> Result<f64, DeviceError> {
        Err(DeviceError::Unsupported("throughput test"))
    }

    /// Identity fields (name, serial, firmware versions…) in display order.
    fn general_info(&mut self) -> Result<Vec<(String, String)>, DeviceError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_sum_bad_and_missed() {
        let c = FrameCounters {
            good: 10,
            bad: 2,
            missed: 3,
        };
        assert_eq!(c.errors(), 5);
        assert!((c.loss_percent() - 33.333).abs() < 0.01);
    }

    #[test]
    fn loss_percent_of_empty_counters_is_zero() {
        assert_eq!(FrameCounters::default().loss_percent(), 0.0);
    }

    #[test]
    fn errors_saturate() {
        let c = FrameCounters {
            good: 0,
            bad: u64::MAX,
            missed: 1,
        };
        assert_eq!(c.errors(), u64::MAX);
    }
}
