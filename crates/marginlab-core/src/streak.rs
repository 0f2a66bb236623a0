//! # Streak Evaluator
//!
//! Measures the longest continuous interval, inside a bounded window, during
//! which the demodulator stays locked and reports no bad or missed frames.
//!
//! Per poll tick:
//!
//! | observation              | action                                             |
//! |--------------------------|----------------------------------------------------|
//! | past the deadline        | stop                                               |
//! | unlocked                 | end streak, reset counters, stabilize, go idle     |
//! | locked, errors > 0       | end streak, reset counters, stabilize, go idle     |
//! | locked, no errors, idle  | start streak (start time + good-frame baseline)    |
//! | locked, no errors, active| extend streak, record a strictly longer best       |
//! | streak reached goal      | stop early                                         |
//!
//! Device read failures skip the tick; they never end the evaluation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::{sleep_capped, Clock};
use crate::device::Demodulator;

/// Time budget for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationPolicy {
    /// Budget for acquiring lock before evaluation starts.
    pub lock_wait: Duration,
    /// Hard limit on the evaluation loop.
    pub evaluation_window: Duration,
    pub poll_interval: Duration,
    /// Wait after every counter reset before trusting counters again.
    pub stabilize_after_reset: Duration,
    /// Cadence of the status log line.
    pub heartbeat_interval: Duration,
}

impl Default for EvaluationPolicy {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_secs(60),
            evaluation_window: Duration::from_secs(200),
            poll_interval: Duration::from_secs(1),
            stabilize_after_reset: Duration::from_secs(3),
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

/// Mutable state of one evaluation.
#[derive(Debug, Clone, Default)]
pub struct StreakState {
    pub in_streak: bool,
    pub streak_start: Duration,
    pub good_at_streak_start: u64,
    pub best_duration: Duration,
    pub best_good: u64,
}

impl StreakState {
    /// Enter a streak at `now` with the current good-frame count as baseline.
    fn start(&mut self, now: Duration, good: u64) {
        self.in_streak = true;
        self.streak_start = now;
        self.good_at_streak_start = good;
    }

    fn current(&self, now: Duration) -> Duration {
        now.saturating_sub(self.streak_start)
    }

    /// Record the active streak as best if strictly longer. Returns whether
    /// the best advanced.
    fn observe(&mut self, now: Duration, good: u64) -> bool {
        let current = self.current(now);
        if current > self.best_duration {
            self.best_duration = current;
            self.best_good = good.saturating_sub(self.good_at_streak_start);
            return true;
        }
        false
    }
}

/// Result of an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreakOutcome {
    /// Longest locked, error-free streak, rounded to hundredths of a second.
    pub best_streak_secs: f64,
    /// Good frames counted during that streak.
    pub best_streak_good: u64,
    pub goal_reached: bool,
    pub unlock_events: u32,
    pub error_events: u32,
    pub read_failures: u32,
    pub elapsed_secs: f64,
}

impl StreakOutcome {
    /// Outcome for a test that never got to evaluate (e.g. no lock).
    pub fn empty() -> Self {
        Self {
            best_streak_secs: 0.0,
            best_streak_good: 0,
            goal_reached: false,
            unlock_events: 0,
            error_events: 0,
            read_failures: 0,
            elapsed_secs: 0.0,
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Poll `is_locked` every 500ms until locked or `budget` elapses.
///
/// Read failures count as "not locked". Running out of budget is a normal
/// outcome (`false`), not an error.
pub fn wait_for_lock(demod: &mut dyn Demodulator, clock: &dyn Clock, budget: Duration) -> bool {
    const LOCK_POLL: Duration = Duration::from_millis(500);
    let deadline = clock.now() + budget;
    tracing::info!(timeout_s = budget.as_secs_f64(), "waiting for lock");
    loop {
        match demod.is_locked() {
            Ok(true) => {
                tracing::info!("locked");
                return true;
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "lock query failed"),
        }
        if clock.now() >= deadline {
            tracing::warn!(timeout_s = budget.as_secs_f64(), "lock not achieved");
            return false;
        }
        sleep_capped(clock, LOCK_POLL, deadline);
    }
}

/// Streak evaluator bound to a clock and a time budget.
pub struct StreakEvaluator<'a> {
    clock: &'a dyn Clock,
    policy: EvaluationPolicy,
}

impl<'a> StreakEvaluator<'a> {
    pub fn new(clock: &'a dyn Clock, policy: EvaluationPolicy) -> Self {
        Self { clock, policy }
    }

    pub fn policy(&self) -> &EvaluationPolicy {
        &self.policy
    }

    /// Run one evaluation against `demod`.
    ///
    /// With a `goal`, stops as soon as the active streak reaches it.
    /// A zero goal is treated as no goal.
    pub fn evaluate(&self, demod: &mut dyn Demodulator, goal: Option<Duration>) -> StreakOutcome {
        let clock = self.clock;
        let p = self.policy;
        let goal = goal.filter(|g| !g.is_zero());

        // Counters start clean. The first stabilization wait is capped at
        // the window length but does not count toward it.
        self.reset_counters(demod);
        let pre_deadline = clock.now() + p.evaluation_window;
        sleep_capped(clock, p.stabilize_after_reset, pre_deadline);

        let started = clock.now();
        let deadline = started + p.evaluation_window;

        tracing::info!(
            window_s = p.evaluation_window.as_secs_f64(),
            poll_s = p.poll_interval.as_secs_f64(),
            goal_s = goal.map(|g| g.as_secs_f64()),
            "evaluating zero-error window"
        );

        let mut st = StreakState::default();
        let mut outcome = StreakOutcome::empty();
        let mut last_lock: Option<bool> = None;
        let mut last_good = 0u64;
        let mut last_heartbeat: Option<Duration> = None;
        let mut last_best_reported = Duration::ZERO;

        loop {
            let now = clock.now();
            if now >= deadline {
                tracing::info!("evaluation window reached");
                break;
            }

            let locked = match demod.is_locked() {
                Ok(l) => l,
                Err(e) => {
                    outcome.read_failures += 1;
                    tracing::warn!(error = %e, "lock query failed, skipping tick");
                    sleep_capped(clock, p.poll_interval, deadline);
                    continue;
                }
            };
            if last_lock != Some(locked) {
                tracing::info!(locked, "lock state changed");
                last_lock = Some(locked);
            }

            if !locked {
                outcome.unlock_events += 1;
                if st.in_streak {
                    tracing::warn!(
                        streak_s = st.current(clock.now()).as_secs_f64(),
                        "unlock detected, streak broken"
                    );
                }
                self.recover(demod, &mut st, deadline);
                continue;
            }

            let counters = match demod.frame_counters() {
                Ok(c) => c,
                Err(e) => {
                    outcome.read_failures += 1;
                    tracing::warn!(error = %e, "frame counter read failed, skipping tick");
                    sleep_capped(clock, p.poll_interval, deadline);
                    continue;
                }
            };
            last_good = counters.good;

            if last_heartbeat.is_none_or(|t| now.saturating_sub(t) >= p.heartbeat_interval) {
                tracing::info!(
                    locked,
                    in_streak = st.in_streak,
                    good = counters.good,
                    bad = counters.bad,
                    missed = counters.missed,
                    best_s = round2(st.best_duration.as_secs_f64()),
                    remaining_s = deadline.saturating_sub(now).as_secs(),
                    "status"
                );
                last_heartbeat = Some(now);
            }

            if counters.errors() > 0 {
                outcome.error_events += 1;
                tracing::warn!(
                    bad = counters.bad,
                    missed = counters.missed,
                    in_streak = st.in_streak,
                    streak_s = if st.in_streak {
                        st.current(clock.now()).as_secs_f64()
                    } else {
                        0.0
                    },
                    "frame errors detected"
                );
                self.recover(demod, &mut st, deadline);
                continue;
            }

            let tick = clock.now();
            if !st.in_streak {
                st.start(tick, counters.good);
                tracing::info!(good_start = counters.good, "zero-error streak started");
            }

            if st.observe(tick, counters.good)
                && st.best_duration.saturating_sub(last_best_reported) >= Duration::from_secs(1)
            {
                tracing::info!(
                    best_s = round2(st.best_duration.as_secs_f64()),
                    good_delta = st.best_good,
                    "new best streak"
                );
                last_best_reported = st.best_duration;
            }

            if let Some(g) = goal {
                if st.current(tick) >= g {
                    tracing::info!(
                        streak_s = st.current(tick).as_secs_f64(),
                        "streak goal reached, ending evaluation early"
                    );
                    outcome.goal_reached = true;
                    break;
                }
            }

            sleep_capped(clock, p.poll_interval, deadline);
        }

        // Fold an in-progress streak into the result.
        if st.in_streak {
            let now = clock.now();
            if st.current(now) > st.best_duration {
                let good = match demod.frame_counters() {
                    Ok(c) => c.good,
                    Err(e) => {
                        tracing::warn!(error = %e, "final counter read failed, using last observed");
                        last_good
                    }
                };
                st.observe(now, good);
            }
        }

        outcome.best_streak_secs = round2(st.best_duration.as_secs_f64());
        outcome.best_streak_good = st.best_good;
        outcome.elapsed_secs = round2(clock.now().saturating_sub(started).as_secs_f64());
        tracing::info!(
            best_s = outcome.best_streak_secs,
            good = outcome.best_streak_good,
            goal_reached = outcome.goal_reached,
            "evaluation finished"
        );
        outcome
    }

    /// Fault recovery: drop any streak, reset counters, stabilize, then
    /// wait one poll interval. All waits are capped at `deadline`.
    fn recover(&self, demod: &mut dyn Demodulator, st: &mut StreakState, deadline: Duration) {
        st.in_streak = false;
        self.reset_counters(demod);
        tracing::debug!(
            stabilize_s = self.policy.stabilize_after_reset.as_secs_f64(),
            "counters reset, stabilizing"
        );
        sleep_capped(self.clock, self.policy.stabilize_after_reset, deadline);
        sleep_capped(self.clock, self.policy.poll_interval, deadline);
    }

    fn reset_counters(&self, demod: &mut dyn Demodulator) {
        if let Err(e) = demod.reset_counters() {
            tracing::warn!(error = %e, "counter reset failed");
        }
    }
}
