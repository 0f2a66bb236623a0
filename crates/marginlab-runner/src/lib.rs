//! Test runner for the noise calibration engine.
//!
//! - [`orchestrator`]: sequences calibration and evaluation per test case
//! - [`results`]: results CSV and problematic-tests log
//! - [`probe`]: TCP connectivity pre-check
//! - [`sim`]: wiring for running plans against the simulated bench

pub mod orchestrator;
pub mod probe;
pub mod results;
pub mod sim;

pub use orchestrator::{CaseReport, CaseStatus, Orchestrator, PlanSummary};
