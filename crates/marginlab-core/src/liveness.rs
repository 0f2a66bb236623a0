//! Background "still waiting" notifier.
//!
//! Long waits (lock acquisition, settle delays, multi-minute evaluations)
//! produce no output for a while. The notifier runs on its own thread and
//! logs a liveness line once nothing has been reported for `interval`.
//! Callers mark progress with [`LivenessNotifier::report`]. It only reads its
//! own state; stopping it joins the thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

/// Shared between the owner and the notifier thread.
struct Activity {
    origin: quanta::Instant,
    /// Nanoseconds since `origin` of the last report or liveness line.
    last_nanos: AtomicU64,
    ticks: AtomicU64,
}

impl Activity {
    fn now_nanos(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn mark(&self) {
        self.last_nanos.store(self.now_nanos(), Ordering::Relaxed);
    }

    fn quiet_for(&self) -> Duration {
        let last = self.last_nanos.load(Ordering::Relaxed);
        Duration::from_nanos(self.now_nanos().saturating_sub(last))
    }
}

pub struct LivenessNotifier {
    stop_tx: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
    activity: Arc<Activity>,
}

impl LivenessNotifier {
    /// Spawn the notifier thread.
    pub fn start(label: impl Into<String>, interval: Duration) -> Self {
        let label = label.into();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let activity = Arc::new(Activity {
            origin: quanta::Instant::now(),
            last_nanos: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
        });
        let shared = activity.clone();

        let handle = thread::Builder::new()
            .name("liveness".into())
            .spawn(move || loop {
                let wait = interval.saturating_sub(shared.quiet_for());
                match stop_rx.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => {
                        if shared.quiet_for() < interval {
                            continue;
                        }
                        shared.ticks.fetch_add(1, Ordering::Relaxed);
                        shared.mark();
                        tracing::info!(
                            task = %label,
                            elapsed_s = shared.origin.elapsed().as_secs(),
                            "waiting..."
                        );
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });

        let handle = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                tracing::warn!(error = %e, "failed to spawn liveness notifier");
                None
            }
        };

        Self {
            stop_tx: Some(stop_tx),
            handle,
            activity,
        }
    }

    /// Record that the caller just reported progress itself, deferring the
    /// next liveness line by a full interval.
    pub fn report(&self) {
        self.activity.mark();
    }

    /// Number of liveness lines emitted so far.
    pub fn ticks(&self) -> u64 {
        self.activity.ticks.load(Ordering::Relaxed)
    }

    /// Signal the thread and wait for it to exit. Idempotent.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LivenessNotifier {
    fn drop(&mut self) {
        self.stop();
    }
}
