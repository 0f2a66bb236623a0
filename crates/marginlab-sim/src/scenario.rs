use rand::RngExt as _;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::time::Duration;

/// What goes wrong during a fault window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FaultKind {
    /// Receiver drops lock; frames are missed.
    Unlock,
    /// Locked, but `per_second` bad frames are counted.
    ErrorBurst { per_second: u32 },
    /// Every demodulator read fails.
    ReadFailure,
}

/// A fault active over `[start, end)` of bench time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultWindow {
    pub start: Duration,
    pub end: Duration,
    pub kind: FaultKind,
}

impl FaultWindow {
    pub fn new(start: Duration, end: Duration, kind: FaultKind) -> Self {
        Self { start, end, kind }
    }

    pub fn contains(&self, t: Duration) -> bool {
        t >= self.start && t < self.end
    }
}

/// Bounds for seeded scenario generation.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub seed: u64,
    pub duration: Duration,
    pub min_gap: Duration,
    pub max_gap: Duration,
    pub max_fault_len: Duration,
    pub max_burst_per_second: u32,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            duration: Duration::from_secs(600),
            min_gap: Duration::from_secs(20),
            max_gap: Duration::from_secs(90),
            max_fault_len: Duration::from_secs(4),
            max_burst_per_second: 5,
        }
    }
}

/// Schedule of fault windows over bench time.
#[derive(Debug, Clone, Default)]
pub struct FaultScenario {
    windows: Vec<FaultWindow>,
}

impl FaultScenario {
    /// No faults.
    pub fn quiet() -> Self {
        Self::default()
    }

    pub fn new(mut windows: Vec<FaultWindow>) -> Self {
        windows.sort_by_key(|w| w.start);
        Self { windows }
    }

    /// Reproducible scenario: alternating quiet gaps and fault windows whose
    /// lengths and kinds are drawn from a seeded RNG.
    pub fn generate(cfg: &ScenarioConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let min_gap = cfg.min_gap.as_secs_f64();
        let max_gap = cfg.max_gap.as_secs_f64().max(min_gap + 1e-3);
        let max_len = cfg.max_fault_len.as_secs_f64().max(0.5 + 1e-3);

        let mut windows = Vec::new();
        let mut t = 0.0;
        loop {
            let start = t + rng.random_range(min_gap..max_gap);
            if start >= cfg.duration.as_secs_f64() {
                break;
            }
            let len = rng.random_range(0.5..max_len);
            let kind = match rng.random_range(0..3u8) {
                0 => FaultKind::Unlock,
                1 => FaultKind::ErrorBurst {
                    per_second: rng.random_range(1..=cfg.max_burst_per_second.max(1)),
                },
                _ => FaultKind::ReadFailure,
            };
            windows.push(FaultWindow::new(
                Duration::from_secs_f64(start),
                Duration::from_secs_f64(start + len),
                kind,
            ));
            t = start + len;
        }

        tracing::debug!(seed = cfg.seed, windows = windows.len(), "fault scenario generated");
        Self { windows }
    }

    pub fn windows(&self) -> &[FaultWindow] {
        &self.windows
    }

    fn active(&self, t: Duration) -> impl Iterator<Item = FaultKind> + '_ {
        self.windows
            .iter()
            .take_while(move |w| w.start <= t)
            .filter(move |w| w.contains(t))
            .map(|w| w.kind)
    }

    pub fn unlocked_at(&self, t: Duration) -> bool {
        self.active(t).any(|k| k == FaultKind::Unlock)
    }

    pub fn reads_fail_at(&self, t: Duration) -> bool {
        self.active(t).any(|k| k == FaultKind::ReadFailure)
    }

    /// Forced bad frames per second at `t`.
    pub fn burst_rate_at(&self, t: Duration) -> u32 {
        self.active(t)
            .map(|k| match k {
                FaultKind::ErrorBurst { per_second } => per_second,
                _ => 0,
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn scenario_is_deterministic_for_seed() {
        let cfg = ScenarioConfig {
            seed: 42,
            ..ScenarioConfig::default()
        };
        let a = FaultScenario::generate(&cfg);
        let b = FaultScenario::generate(&cfg);
        assert!(!a.windows().is_empty());
        assert_eq!(a.windows(), b.windows());
    }

    #[test]
    fn generated_windows_are_ordered_and_bounded() {
        let cfg = ScenarioConfig {
            seed: 7,
            ..ScenarioConfig::default()
        };
        let s = FaultScenario::generate(&cfg);
        for pair in s.windows().windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
        for w in s.windows() {
            assert!(w.start < cfg.duration);
            assert!(w.end > w.start);
            assert!(w.end - w.start <= cfg.max_fault_len);
        }
    }

    #[test]
    fn explicit_windows_answer_queries() {
        let s = FaultScenario::new(vec![
            FaultWindow::new(secs(20), secs(22), FaultKind::ReadFailure),
            FaultWindow::new(secs(5), secs(8), FaultKind::Unlock),
            FaultWindow::new(secs(10), secs(12), FaultKind::ErrorBurst { per_second: 3 }),
        ]);
        assert!(!s.unlocked_at(secs(4)));
        assert!(s.unlocked_at(secs(5)));
        assert!(!s.unlocked_at(secs(8)));
        assert_eq!(s.burst_rate_at(secs(11)), 3);
        assert_eq!(s.burst_rate_at(secs(12)), 0);
        assert!(s.reads_fail_at(secs(21)));
        assert!(!s.reads_fail_at(secs(19)));
    }

    #[test]
    fn quiet_scenario_has_no_faults() {
        let s = FaultScenario::quiet();
        assert!(!s.unlocked_at(secs(1)));
        assert_eq!(s.burst_rate_at(secs(1)), 0);
    }
}
