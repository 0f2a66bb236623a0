//! # Sweep Table
//!
//! An offline noise sweep records, for each (frequency, symbol rate, power)
//! operating point, the margin measured at every injected noise setting.
//! [`SweepTable`] indexes that dataset so the calibrator can pick a noise
//! seed for a target margin without touching hardware.
//!
//! - [`dataset`]: CSV row model and parser/writer
//! - [`table`]: grouped, margin-ordered index with binary-search lookup
//! - [`maintenance`]: offline sort + dedup pass over a dataset file
//! - [`collector`]: builds a dataset by stepping noise on a live bench

pub mod collector;
pub mod dataset;
pub mod maintenance;
pub mod table;

pub use collector::{SweepCollector, SweepPlan, SweepReport};
pub use dataset::SweepSample;
pub use table::{NoiseLookup, SweepKey, SweepTable};
