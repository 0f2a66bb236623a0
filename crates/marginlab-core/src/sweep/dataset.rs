use std::io::Write;
use std::path::Path;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::noise::NoiseSetting;

/// Canonical header written by [`write_csv`].
pub const HEADER: [&str; 7] = [
    "frequency",
    "symbol_rate",
    "power",
    "noise_hex",
    "noise_dec",
    "locked",
    "margin_db",
];

/// Accepted header names per column, canonical name first.
const COLUMN_ALIASES: [(&str, &[&str]); 7] = [
    ("frequency", &["frequency", "frequency_mhz"]),
    ("symbol_rate", &["symbol_rate", "symbol_rate_msps"]),
    ("power", &["power", "power_dbm"]),
    ("noise_hex", &["noise_hex"]),
    ("noise_dec", &["noise_dec"]),
    ("locked", &["locked"]),
    ("margin_db", &["margin_db", "esno_db"]),
];

/// One measured point of an offline sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSample {
    pub frequency: f64,
    pub symbol_rate: f64,
    pub power: f64,
    pub noise: NoiseSetting,
    pub locked: bool,
    pub margin_db: f64,
}

/// Column positions resolved from a header line.
struct Columns([usize; 7]);

impl Columns {
    fn resolve(header: &str) -> Result<Self, ConfigError> {
        let names: Vec<&str> = header.split(',').map(|s| s.trim()).collect();
        let mut idx = [0usize; 7];
        for (slot, &(canonical, aliases)) in COLUMN_ALIASES.iter().enumerate() {
            idx[slot] = names
                .iter()
                .position(|n| aliases.contains(n))
                .ok_or(ConfigError::MissingColumn(canonical))?;
        }
        Ok(Columns(idx))
    }
}

/// Parse a sweep CSV document (header line + data rows).
///
/// Blank lines are skipped; any malformed row is an error, since a table
/// built from a partially-read sweep would silently mis-seed calibration.
pub fn parse_csv(input: &str) -> Result<Vec<SweepSample>, ConfigError> {
    let mut lines = input.lines().enumerate();
    let columns = loop {
        match lines.next() {
            Some((_, l)) if l.trim().is_empty() => continue,
            Some((_, l)) => break Columns::resolve(l)?,
            None => return Ok(Vec::new()),
        }
    };

    let mut samples = Vec::new();
    for (n, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        samples.push(parse_row(line, &columns).map_err(|reason| ConfigError::Dataset {
            line: n + 1,
            reason,
        })?);
    }
    Ok(samples)
}

fn parse_row(line: &str, columns: &Columns) -> Result<SweepSample, String> {
    let fields: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
    let field = |slot: usize| -> Result<&str, String> {
        fields
            .get(columns.0[slot])
            .copied()
            .ok_or_else(|| format!("missing `{}` field", HEADER[slot]))
    };
    let number = |slot: usize| -> Result<f64, String> {
        let raw = field(slot)?;
        let v: f64 = raw
            .parse()
            .map_err(|_| format!("`{}` is not a number: {raw:?}", HEADER[slot]))?;
        if !v.is_finite() {
            return Err(format!("`{}` is not finite: {raw:?}", HEADER[slot]));
        }
        Ok(v)
    };

    let noise_raw = field(4)?;
    let noise_dec: u32 = noise_raw
        .parse()
        .map_err(|_| format!("`noise_dec` is not a register value: {noise_raw:?}"))?;

    Ok(SweepSample {
        frequency: number(0)?,
        symbol_rate: number(1)?,
        power: number(2)?,
        noise: NoiseSetting::with_label(CompactString::from(field(3)?), noise_dec),
        locked: parse_bool(field(5)?)?,
        margin_db: number(6)?,
    })
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(format!("`locked` is not a boolean: {raw:?}")),
    }
}

/// Read and parse a sweep CSV file.
pub fn read_csv(path: &Path) -> Result<Vec<SweepSample>, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    parse_csv(&text)
}

/// Write the canonical header line.
pub fn write_header<W: Write>(out: &mut W) -> std::io::Result<()> {
    writeln!(out, "{}", HEADER.join(","))
}

/// Write one data row in canonical column order.
pub fn write_row<W: Write>(out: &mut W, s: &SweepSample) -> std::io::Result<()> {
    writeln!(
        out,
        "{},{},{},{},{},{},{}",
        s.frequency,
        s.symbol_rate,
        s.power,
        s.noise.hex,
        s.noise.dec,
        if s.locked { "True" } else { "False" },
        s.margin_db
    )
}

/// Write a complete dataset: header plus every sample.
pub fn write_csv<W: Write>(out: &mut W, samples: &[SweepSample]) -> std::io::Result<()> {
    write_header(out)?;
    for s in samples {
        write_row(out, s)?;
    }
    Ok(())
}
