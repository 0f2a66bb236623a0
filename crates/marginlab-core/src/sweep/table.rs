use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::dataset::{self, SweepSample};
use crate::error::ConfigError;
use crate::noise::NoiseSetting;

/// Operating point key, quantized to thousandths so that `12`, `12.0`
/// and `12.000` address the same group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SweepKey {
    frequency_milli: i64,
    symbol_rate_milli: i64,
    power_milli: i64,
}

fn milli(v: f64) -> i64 {
    (v * 1000.0).round() as i64
}

impl SweepKey {
    pub fn new(frequency: f64, symbol_rate: f64, power: f64) -> Self {
        Self {
            frequency_milli: milli(frequency),
            symbol_rate_milli: milli(symbol_rate),
            power_milli: milli(power),
        }
    }

    pub fn frequency(&self) -> f64 {
        self.frequency_milli as f64 / 1000.0
    }

    pub fn symbol_rate(&self) -> f64 {
        self.symbol_rate_milli as f64 / 1000.0
    }

    pub fn power(&self) -> f64 {
        self.power_milli as f64 / 1000.0
    }
}

/// All samples of one operating point, ascending by margin.
///
/// `margins[i]` was measured with `noises[i]`.
#[derive(Debug, Clone)]
pub struct SweepGroup {
    margins: Vec<f64>,
    noises: Vec<NoiseSetting>,
}

impl SweepGroup {
    fn from_samples(mut samples: Vec<SweepSample>) -> Self {
        samples.sort_by(|a, b| a.margin_db.total_cmp(&b.margin_db));
        let margins = samples.iter().map(|s| s.margin_db).collect();
        let noises = samples.into_iter().map(|s| s.noise).collect();
        Self { margins, noises }
    }

    pub fn margins(&self) -> &[f64] {
        &self.margins
    }

    pub fn noises(&self) -> &[NoiseSetting] {
        &self.noises
    }

    pub fn len(&self) -> usize {
        self.margins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.margins.is_empty()
    }

    /// Index of the smallest margin ≥ `target`, clamped to the group's range.
    fn select(&self, target: f64) -> usize {
        let i = self.margins.partition_point(|m| *m < target);
        if i >= self.margins.len() {
            self.margins.len() - 1
        } else {
            i
        }
    }
}

/// Result of a table lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseLookup {
    pub requested_margin: f64,
    pub closest_margin: f64,
    pub noise: NoiseSetting,
}

/// Immutable index from operating point to its noise-vs-margin curve.
///
/// Built once from a sweep dataset and shared by reference; nothing mutates
/// it after construction.
#[derive(Debug, Clone, Default)]
pub struct SweepTable {
    groups: BTreeMap<SweepKey, SweepGroup>,
}

impl SweepTable {
    /// Group samples by operating point and order each group by margin.
    ///
    /// Duplicate rows are kept as-is; dedup is an offline step
    /// (see [`super::maintenance`]).
    pub fn build(samples: impl IntoIterator<Item = SweepSample>) -> Self {
        let mut buckets: BTreeMap<SweepKey, Vec<SweepSample>> = BTreeMap::new();
        for s in samples {
            let key = SweepKey::new(s.frequency, s.symbol_rate, s.power);
            buckets.entry(key).or_default().push(s);
        }
        let groups = buckets
            .into_iter()
            .map(|(k, v)| (k, SweepGroup::from_samples(v)))
            .collect();
        Self { groups }
    }

    /// Load a sweep CSV and build the table.
    pub fn from_csv_path(path: &Path) -> Result<Self, ConfigError> {
        let samples = dataset::read_csv(path)?;
        let table = Self::build(samples);
        tracing::info!(
            path = %path.display(),
            groups = table.group_count(),
            samples = table.sample_count(),
            "sweep table loaded"
        );
        Ok(table)
    }

    /// Noise setting whose recorded margin is the smallest one not below
    /// `target_margin`.
    ///
    /// Targets below the group's range select its smallest margin; targets
    /// above it select its largest. An operating point with no sweep data
    /// is a configuration error.
    pub fn lookup(
        &self,
        frequency: f64,
        symbol_rate: f64,
        power: f64,
        target_margin: f64,
    ) -> Result<NoiseLookup, ConfigError> {
        let group = self
            .group(frequency, symbol_rate, power)
            .ok_or(ConfigError::MissingSweepKey {
                frequency,
                symbol_rate,
                power,
            })?;
        let idx = group.select(target_margin);
        Ok(NoiseLookup {
            requested_margin: target_margin,
            closest_margin: group.margins[idx],
            noise: group.noises[idx].clone(),
        })
    }

    pub fn group(&self, frequency: f64, symbol_rate: f64, power: f64) -> Option<&SweepGroup> {
        self.groups
            .get(&SweepKey::new(frequency, symbol_rate, power))
            .filter(|g| !g.is_empty())
    }

    pub fn keys(&self) -> impl Iterator<Item = &SweepKey> {
        self.groups.keys()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn sample_count(&self) -> usize {
        self.groups.values().map(SweepGroup::len).sum()
    }
}
