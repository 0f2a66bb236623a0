//! Link budget model: operating point and injected noise → margin.

use marginlab_core::device::TxSettings;

/// Deterministic margin model.
///
/// `margin = clean_margin + power_slope·(power − reference_power)
///           − 10·log10(symbol_rate) − freq_slope·(frequency − 950)/1000
///           − noise_db_per_unit·max(0, noise − noise_base) + live_offset`
///
/// `live_offset` is the drift between the conditions an offline sweep was
/// taken under and the live bench.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelModel {
    pub clean_margin_db: f64,
    pub reference_power: f64,
    pub power_slope: f64,
    pub freq_slope_db_per_ghz: f64,
    /// Register value where injected noise starts to bite.
    pub noise_base: u32,
    pub noise_db_per_unit: f64,
    pub live_offset_db: f64,
    /// Below this margin the receiver loses lock.
    pub lock_threshold_db: f64,
    /// Below this margin error frames start to appear.
    pub error_threshold_db: f64,
    /// Test-pattern frames per second per Msps.
    pub frames_per_msps: f64,
}

impl Default for ChannelModel {
    fn default() -> Self {
        Self {
            clean_margin_db: 20.0,
            reference_power: -30.0,
            power_slope: 0.5,
            freq_slope_db_per_ghz: 1.0,
            noise_base: 0x1C000,
            noise_db_per_unit: 0.0125,
            live_offset_db: 0.0,
            lock_threshold_db: -2.2,
            error_threshold_db: 1.0,
            frames_per_msps: 100.0,
        }
    }
}

impl ChannelModel {
    pub fn with_live_offset(mut self, offset_db: f64) -> Self {
        self.live_offset_db = offset_db;
        self
    }

    pub fn margin(&self, tx: &TxSettings, noise: u32) -> f64 {
        let symrate_penalty = 10.0 * tx.symbol_rate.max(1e-3).log10();
        let freq_penalty = self.freq_slope_db_per_ghz * (tx.frequency - 950.0) / 1000.0;
        let noise_penalty = noise.saturating_sub(self.noise_base) as f64 * self.noise_db_per_unit;
        self.clean_margin_db + self.power_slope * (tx.power - self.reference_power)
            - symrate_penalty
            - freq_penalty
            - noise_penalty
            + self.live_offset_db
    }

    pub fn locks_at(&self, margin: f64) -> bool {
        margin >= self.lock_threshold_db
    }

    /// Chance per second of an error frame at `margin`.
    pub fn error_rate(&self, margin: f64) -> f64 {
        if margin >= self.error_threshold_db {
            return 0.0;
        }
        let span = (self.error_threshold_db - self.lock_threshold_db).max(1e-6);
        ((self.error_threshold_db - margin) / span).clamp(0.0, 1.0)
    }

    pub fn frames_per_second(&self, symbol_rate: f64) -> f64 {
        (symbol_rate * self.frames_per_msps).max(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(power: f64) -> TxSettings {
        TxSettings {
            frequency: 950.0,
            symbol_rate: 1.0,
            power,
        }
    }

    #[test]
    fn reference_point_gives_clean_margin() {
        let m = ChannelModel::default();
        assert_eq!(m.margin(&tx(-30.0), 0), 20.0);
        assert_eq!(m.margin(&tx(-30.0), 0x1C000), 20.0);
    }

    #[test]
    fn noise_above_base_lowers_margin_linearly() {
        let m = ChannelModel::default();
        let a = m.margin(&tx(-30.0), 0x1C000 + 80);
        let b = m.margin(&tx(-30.0), 0x1C000 + 160);
        assert!((a - 19.0).abs() < 1e-9);
        assert!((b - 18.0).abs() < 1e-9);
    }

    #[test]
    fn power_and_symrate_shift_margin() {
        let m = ChannelModel::default();
        let loud = m.margin(&tx(-20.0), 0);
        assert!((loud - 25.0).abs() < 1e-9);
        let wide = m.margin(
            &TxSettings {
                frequency: 950.0,
                symbol_rate: 10.0,
                power: -30.0,
            },
            0,
        );
        assert!((wide - 10.0).abs() < 1e-9);
    }

    #[test]
    fn live_offset_is_additive() {
        let m = ChannelModel::default().with_live_offset(0.8);
        assert!((m.margin(&tx(-30.0), 0) - 20.8).abs() < 1e-9);
    }

    #[test]
    fn error_rate_ramps_between_thresholds() {
        let m = ChannelModel::default();
        assert_eq!(m.error_rate(5.0), 0.0);
        assert_eq!(m.error_rate(1.0), 0.0);
        assert!(m.error_rate(0.0) > 0.0 && m.error_rate(0.0) < 1.0);
        assert_eq!(m.error_rate(-2.2), 1.0);
        assert!(!m.locks_at(-2.3));
        assert!(m.locks_at(-2.2));
    }
}
