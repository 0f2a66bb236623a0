//! Simulated RF bench for exercising the engine without hardware.
//!
//! Provides a deterministic channel model, seeded fault scenarios, and a
//! bench whose modulator and demodulator handles implement the device
//! traits from `marginlab-core` on a shared clock.

pub mod bench;
pub mod channel;
pub mod scenario;

pub use bench::{SimBench, SimDemodulator, SimModulator};
pub use channel::ChannelModel;
pub use scenario::{FaultKind, FaultScenario, FaultWindow, ScenarioConfig};
