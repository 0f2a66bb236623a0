//! Offline sweep maintenance: sort and dedup a dataset before it is indexed.
//!
//! A row is dropped when either of its keys was already seen:
//! - exact key: (frequency, symbol rate, power, noise_dec)
//! - noise-agnostic key: (frequency, symbol rate, power, margin)
//!
//! Rows are first sorted ascending by (frequency, symbol rate, power,
//! noise_dec), so the first-seen row is the one with the lowest noise.

use std::collections::HashSet;
use std::io::BufWriter;
use std::path::Path;

use super::dataset::{self, SweepSample};
use super::table::SweepKey;
use crate::error::ConfigError;

/// Counts from a dedup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupReport {
    pub input_rows: usize,
    pub kept_rows: usize,
}

impl DedupReport {
    pub fn removed(&self) -> usize {
        self.input_rows - self.kept_rows
    }
}

fn margin_bits(m: f64) -> u64 {
    // Fold -0.0 into 0.0 so both spellings collide.
    (m + 0.0).to_bits()
}

/// Sort `rows` by operating point then noise, and drop duplicates.
pub fn sort_and_dedup(mut rows: Vec<SweepSample>) -> Vec<SweepSample> {
    rows.sort_by(|a, b| {
        SweepKey::new(a.frequency, a.symbol_rate, a.power)
            .cmp(&SweepKey::new(b.frequency, b.symbol_rate, b.power))
            .then(a.noise.dec.cmp(&b.noise.dec))
    });

    let mut seen_exact = HashSet::new();
    let mut seen_noise_agnostic = HashSet::new();
    rows.into_iter()
        .filter(|r| {
            let point = SweepKey::new(r.frequency, r.symbol_rate, r.power);
            let exact = (point, r.noise.dec);
            let agnostic = (point, margin_bits(r.margin_db));
            if seen_exact.contains(&exact) || seen_noise_agnostic.contains(&agnostic) {
                return false;
            }
            seen_exact.insert(exact);
            seen_noise_agnostic.insert(agnostic);
            true
        })
        .collect()
}

/// Sort and dedup the dataset at `input`, writing the result to `output`
/// (which may be the same path).
pub fn sort_and_dedup_file(input: &Path, output: &Path) -> Result<DedupReport, ConfigError> {
    let rows = dataset::read_csv(input)?;
    let input_rows = rows.len();
    let kept = sort_and_dedup(rows);

    let file = std::fs::File::create(output)?;
    let mut out = BufWriter::new(file);
    dataset::write_csv(&mut out, &kept)?;

    let report = DedupReport {
        input_rows,
        kept_rows: kept.len(),
    };
    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        kept = report.kept_rows,
        removed = report.removed(),
        "sweep dataset sorted and deduplicated"
    );
    Ok(report)
}
