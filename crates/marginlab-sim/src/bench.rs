//! Simulated bench: one shared RF state, two device handles.
//!
//! The modulator and demodulator handles share state behind a mutex and read
//! time from the same [`Clock`]. Frame counters are integrated lazily: every
//! device call first advances the state to the current clock time in
//! sub-second steps, so faults and margin changes land on the right frames.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::RngExt as _;
use rand::SeedableRng;
use rand::rngs::StdRng;

use marginlab_core::clock::Clock;
use marginlab_core::device::{Demodulator, FrameCounters, Modulator, RxPath, TxSettings};
use marginlab_core::error::DeviceError;

use crate::channel::ChannelModel;
use crate::scenario::FaultScenario;

const INTEGRATION_STEP: Duration = Duration::from_millis(250);
const TUNE_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Default)]
pub struct SimBenchConfig {
    pub model: ChannelModel,
    pub scenario: FaultScenario,
    pub seed: u64,
    /// Uniform jitter applied to each margin reading, in dB.
    pub margin_jitter_db: f64,
}

struct BenchState {
    model: ChannelModel,
    scenario: FaultScenario,
    rng: StdRng,
    margin_jitter_db: f64,
    serial: String,

    tx: Option<TxSettings>,
    noise: u32,
    pls: Option<u32>,
    rx_tune: Option<(f64, f64)>,
    path: RxPath,

    counters: FrameCounters,
    frame_carry: f64,
    burst_carry: f64,
    integrated_to: Duration,
}

impl BenchState {
    fn tuned_tx(&self) -> Option<TxSettings> {
        let tx = self.tx?;
        let (f, s) = self.rx_tune?;
        let matches = (f - tx.frequency).abs() < TUNE_TOLERANCE
            && (s - tx.symbol_rate).abs() < TUNE_TOLERANCE;
        (matches && self.path == RxPath::Rx1).then_some(tx)
    }

    fn margin(&self) -> Option<f64> {
        self.tuned_tx().map(|tx| self.model.margin(&tx, self.noise))
    }

    fn locked_at(&self, t: Duration) -> bool {
        self.margin().is_some_and(|m| self.model.locks_at(m)) && !self.scenario.unlocked_at(t)
    }

    fn advance_to(&mut self, now: Duration) {
        let mut t = self.integrated_to;
        while t < now {
            let dt = (now - t).min(INTEGRATION_STEP);
            self.integrate(t, dt.as_secs_f64());
            t += dt;
        }
        self.integrated_to = self.integrated_to.max(now);
    }

    fn integrate(&mut self, t: Duration, dt: f64) {
        let Some(tx) = self.tx else {
            return;
        };
        let frames = self.model.frames_per_second(tx.symbol_rate) * dt + self.frame_carry;
        let whole = frames.floor();
        self.frame_carry = frames - whole;
        let whole = whole as u64;

        if !self.locked_at(t) {
            self.counters.missed = self.counters.missed.saturating_add(whole);
            return;
        }

        let burst = self.scenario.burst_rate_at(t) as f64 * dt + self.burst_carry;
        let mut bad = burst.floor();
        self.burst_carry = burst - bad;

        let p = self.margin().map_or(0.0, |m| self.model.error_rate(m)) * dt;
        if p > 0.0 && self.rng.random_bool(p.min(1.0)) {
            bad += 1.0;
        }

        let bad = (bad as u64).min(whole);
        self.counters.bad = self.counters.bad.saturating_add(bad);
        self.counters.good = self.counters.good.saturating_add(whole - bad);
    }
}

/// Shared simulated bench. Clone handles with [`SimBench::modulator`] and
/// [`SimBench::demodulator`].
#[derive(Clone)]
pub struct SimBench {
    state: Arc<Mutex<BenchState>>,
    clock: Arc<dyn Clock>,
}

impl SimBench {
    pub fn new(cfg: SimBenchConfig, clock: Arc<dyn Clock>) -> Self {
        let integrated_to = clock.now();
        let state = BenchState {
            model: cfg.model,
            scenario: cfg.scenario,
            rng: StdRng::seed_from_u64(cfg.seed),
            margin_jitter_db: cfg.margin_jitter_db.abs(),
            serial: format!("SIM-{:08X}", cfg.seed & 0xFFFF_FFFF),
            tx: None,
            noise: 0,
            pls: None,
            rx_tune: None,
            path: RxPath::Rx1,
            counters: FrameCounters::default(),
            frame_carry: 0.0,
            burst_carry: 0.0,
            integrated_to,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BenchState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn modulator(&self) -> SimModulator {
        SimModulator {
            bench: self.clone(),
        }
    }

    pub fn demodulator(&self) -> SimDemodulator {
        SimDemodulator {
            bench: self.clone(),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Noise register as last written.
    pub fn noise(&self) -> u32 {
        self.lock().noise
    }

    pub fn pls(&self) -> Option<u32> {
        self.lock().pls
    }

    /// Noise-free margin the receiver would report right now, if tuned.
    pub fn live_margin(&self) -> Option<f64> {
        self.lock().margin()
    }

    /// Shift the live conditions relative to the sweep.
    pub fn set_live_offset(&self, offset_db: f64) {
        let now = self.clock.now();
        let mut st = self.lock();
        st.advance_to(now);
        st.model.live_offset_db = offset_db;
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut BenchState, Duration) -> T) -> T {
        let now = self.clock.now();
        let mut st = self.lock();
        st.advance_to(now);
        f(&mut st, now)
    }

    fn read<T>(
        &self,
        what: &str,
        f: impl FnOnce(&mut BenchState, Duration) -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        self.with_state(|st, now| {
            if st.scenario.reads_fail_at(now) {
                return Err(DeviceError::Unreachable(format!("{what}: simulated timeout")));
            }
            f(st, now)
        })
    }
}

pub struct SimModulator {
    bench: SimBench,
}

impl Modulator for SimModulator {
    fn set_all(&mut self, tx: TxSettings, noise: u32) -> Result<(), DeviceError> {
        if !(tx.frequency.is_finite() && tx.symbol_rate > 0.0 && tx.power.is_finite()) {
            return Err(DeviceError::Rejected(format!("invalid tx settings {tx:?}")));
        }
        self.bench.with_state(|st, _| {
            st.tx = Some(tx);
            st.noise = noise;
        });
        tracing::debug!(
            freq = tx.frequency,
            symrate = tx.symbol_rate,
            power = tx.power,
            noise,
            "sim modulator tuned"
        );
        Ok(())
    }

    fn set_noise(&mut self, noise: u32) -> Result<(), DeviceError> {
        self.bench.with_state(|st, _| st.noise = noise);
        Ok(())
    }

    fn set_pls(&mut self, pls: u32) -> Result<(), DeviceError> {
        self.bench.with_state(|st, _| st.pls = Some(pls));
        Ok(())
    }
}

pub struct SimDemodulator {
    bench: SimBench,
}

impl Demodulator for SimDemodulator {
    fn set_all(&mut self, frequency: f64, symbol_rate: f64) -> Result<(), DeviceError> {
        self.bench.with_state(|st, _| {
            st.rx_tune = Some((frequency, symbol_rate));
            st.counters = FrameCounters::default();
            st.frame_carry = 0.0;
        });
        Ok(())
    }

    fn switch_path(&mut self, path: RxPath) -> Result<(), DeviceError> {
        self.bench.with_state(|st, _| st.path = path);
        Ok(())
    }

    fn is_locked(&mut self) -> Result<bool, DeviceError> {
        self.bench.read("lock status", |st, now| Ok(st.locked_at(now)))
    }

    fn margin(&mut self) -> Result<f64, DeviceError> {
        self.bench.read("margin", |st, now| {
            if !st.locked_at(now) {
                return Err(DeviceError::Rejected("margin unavailable without lock".into()));
            }
            let m = st.margin().unwrap_or(f64::NEG_INFINITY);
            let jitter = st.margin_jitter_db;
            if jitter > 0.0 {
                Ok(m + st.rng.random_range(-jitter..jitter))
            } else {
                Ok(m)
            }
        })
    }

    fn frame_counters(&mut self) -> Result<FrameCounters, DeviceError> {
        self.bench.read("frame counters", |st, _| Ok(st.counters))
    }

    fn reset_counters(&mut self) -> Result<(), DeviceError> {
        self.bench.read("counter reset", |st, _| {
            st.counters = FrameCounters::default();
            st.frame_carry = 0.0;
            st.burst_carry = 0.0;
            Ok(())
        })
    }

    fn run_throughput_test(&mut self, duration: Duration) -> Result<f64, DeviceError> {
        self.bench.clock.sleep(duration);
        self.bench.read("throughput test", |st, now| {
            let loss = match st.margin() {
                Some(m) if st.locked_at(now) => (st.model.error_rate(m) * 10.0).min(100.0),
                _ => 100.0,
            };
            Ok((loss * 10_000.0).round() / 10_000.0)
        })
    }

    fn general_info(&mut self) -> Result<Vec<(String, String)>, DeviceError> {
        self.bench.read("general info", |st, _| {
            Ok(vec![
                ("device".to_string(), "marginlab-sim".to_string()),
                ("serial".to_string(), st.serial.clone()),
                ("firmware".to_string(), env!("CARGO_PKG_VERSION").to_string()),
            ])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{FaultKind, FaultWindow};
    use marginlab_core::clock::ManualClock;

    const TX: TxSettings = TxSettings {
        frequency: 950.0,
        symbol_rate: 1.0,
        power: -30.0,
    };

    fn bench_with(scenario: FaultScenario) -> (SimBench, ManualClock) {
        let clock = ManualClock::new();
        let bench = SimBench::new(
            SimBenchConfig {
                scenario,
                ..SimBenchConfig::default()
            },
            Arc::new(clock.clone()),
        );
        (bench, clock)
    }

    fn tune(bench: &SimBench, noise: u32) -> (SimModulator, SimDemodulator) {
        let mut m = bench.modulator();
        let mut d = bench.demodulator();
        m.set_all(TX, noise).unwrap();
        d.set_all(TX.frequency, TX.symbol_rate).unwrap();
        (m, d)
    }

    #[test]
    fn untuned_receiver_is_unlocked() {
        let (bench, _clock) = bench_with(FaultScenario::quiet());
        let mut d = bench.demodulator();
        assert!(!d.is_locked().unwrap());
        assert!(d.margin().is_err());
    }

    #[test]
    fn mismatched_tuning_does_not_lock() {
        let (bench, _clock) = bench_with(FaultScenario::quiet());
        let mut m = bench.modulator();
        let mut d = bench.demodulator();
        m.set_all(TX, 0).unwrap();
        d.set_all(1050.0, TX.symbol_rate).unwrap();
        assert!(!d.is_locked().unwrap());
    }

    #[test]
    fn clean_link_counts_good_frames_with_time() {
        let (bench, clock) = bench_with(FaultScenario::quiet());
        let (_m, mut d) = tune(&bench, 0);
        assert!(d.is_locked().unwrap());
        assert_eq!(d.margin().unwrap(), 20.0);

        clock.advance(Duration::from_secs(10));
        let c = d.frame_counters().unwrap();
        assert_eq!(c.good, 1000);
        assert_eq!(c.errors(), 0);

        d.reset_counters().unwrap();
        clock.advance(Duration::from_secs(1));
        assert_eq!(d.frame_counters().unwrap().good, 100);
    }

    #[test]
    fn noise_step_changes_margin() {
        let (bench, _clock) = bench_with(FaultScenario::quiet());
        let (mut m, mut d) = tune(&bench, 0x1C000);
        m.set_noise(0x1C000 + 160).unwrap();
        assert!((d.margin().unwrap() - 18.0).abs() < 1e-9);
        assert_eq!(bench.noise(), 0x1C000 + 160);
    }

    #[test]
    fn heavy_noise_loses_lock_and_misses_frames() {
        let (bench, clock) = bench_with(FaultScenario::quiet());
        let (_m, mut d) = tune(&bench, 0x1C000 + 4000);
        assert!(!d.is_locked().unwrap());
        clock.advance(Duration::from_secs(2));
        let c = d.frame_counters().unwrap();
        assert_eq!(c.good, 0);
        assert_eq!(c.missed, 200);
    }

    #[test]
    fn fault_windows_apply_by_clock_time() {
        let s = FaultScenario::new(vec![
            FaultWindow::new(
                Duration::from_secs(2),
                Duration::from_secs(4),
                FaultKind::Unlock,
            ),
            FaultWindow::new(
                Duration::from_secs(6),
                Duration::from_secs(8),
                FaultKind::ErrorBurst { per_second: 4 },
            ),
            FaultWindow::new(
                Duration::from_secs(10),
                Duration::from_secs(11),
                FaultKind::ReadFailure,
            ),
        ]);
        let (bench, clock) = bench_with(s);
        let (_m, mut d) = tune(&bench, 0);

        clock.advance(Duration::from_secs(3));
        assert!(!d.is_locked().unwrap());
        clock.advance(Duration::from_secs(2));
        assert!(d.is_locked().unwrap());
        let c = d.frame_counters().unwrap();
        assert_eq!(c.missed, 200);
        assert_eq!(c.good, 300);

        clock.advance(Duration::from_secs(4));
        let c = d.frame_counters().unwrap();
        assert_eq!(c.bad, 8);

        clock.advance(Duration::from_millis(1500));
        assert!(matches!(d.is_locked(), Err(DeviceError::Unreachable(_))));
        assert!(d.frame_counters().is_err());
        clock.advance(Duration::from_secs(1));
        assert!(d.is_locked().unwrap());
    }

    #[test]
    fn throughput_test_consumes_clock_time() {
        let (bench, clock) = bench_with(FaultScenario::quiet());
        let (_m, mut d) = tune(&bench, 0);
        let loss = d.run_throughput_test(Duration::from_secs(30)).unwrap();
        assert_eq!(loss, 0.0);
        assert_eq!(clock.now(), Duration::from_secs(30));
    }

    #[test]
    fn general_info_lists_identity() {
        let (bench, _clock) = bench_with(FaultScenario::quiet());
        let info = bench.demodulator().general_info().unwrap();
        assert_eq!(info[0], ("device".to_string(), "marginlab-sim".to_string()));
        assert!(info.iter().any(|(k, _)| k == "serial"));
    }

    #[test]
    fn pls_is_recorded() {
        let (bench, _clock) = bench_with(FaultScenario::quiet());
        bench.modulator().set_pls(101).unwrap();
        assert_eq!(bench.pls(), Some(101));
    }
}
