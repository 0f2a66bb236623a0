//! Persisted records: the results CSV and the problematic-tests log.

use std::borrow::Cow;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::orchestrator::{CaseReport, CaseStatus};

/// Columns after the device identity and date/time columns.
pub const RESULT_COLUMNS: [&str; 19] = [
    "freq",
    "symrate",
    "power",
    "pls",
    "status",
    "target_margin",
    "noise_dec",
    "noise_hex",
    "locked",
    "achieved_margin",
    "calibration_steps",
    "waiting_time_sec",
    "interval_sec",
    "good",
    "bad",
    "missed",
    "unlock_events",
    "error_events",
    "packet_loss_percentage",
];

const NONE: &str = "none";

fn csv_field(raw: &str) -> Cow<'_, str> {
    if raw.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", raw.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(raw)
    }
}

fn opt<T: ToString>(v: Option<T>) -> String {
    v.map_or_else(|| NONE.to_string(), |v| v.to_string())
}

/// One line of the results CSV.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub header: Vec<String>,
    pub values: Vec<String>,
}

impl ResultRow {
    /// Flatten a case report. `window_secs` is recorded as the waiting time
    /// when the case has no streak goal.
    pub fn from_report(report: &CaseReport, window_secs: f64, at: DateTime<Local>) -> Self {
        let mut header: Vec<String> = report.info.iter().map(|(k, _)| k.clone()).collect();
        let mut values: Vec<String> = report.info.iter().map(|(_, v)| v.clone()).collect();

        header.extend(["date".to_string(), "time".to_string()]);
        values.push(at.format("%Y-%m-%d").to_string());
        values.push(at.format("%H:%M:%S").to_string());
        header.extend(RESULT_COLUMNS.iter().map(|c| c.to_string()));

        let tx = report.case.tx;
        let cal = report.calibration.as_ref();
        // Bad and missed frames inside the best streak are zero by definition.
        let in_streak_errors = (report.status == CaseStatus::Completed).then_some(0u64);
        let waiting = report
            .case
            .goal
            .map_or(window_secs, |g| g.as_secs_f64());
        values.extend([
            tx.frequency.to_string(),
            tx.symbol_rate.to_string(),
            tx.power.to_string(),
            report.case.pls.to_string(),
            report.status.as_str().to_string(),
            opt(report.target_margin),
            opt(cal.map(|c| c.noise.dec)),
            opt(cal.map(|c| c.noise.hex.clone())),
            (report.status != CaseStatus::NoLock).to_string(),
            opt(cal.map(|c| c.achieved_margin)),
            opt(cal.map(|c| c.steps)),
            waiting.to_string(),
            report.streak.best_streak_secs.to_string(),
            report.streak.best_streak_good.to_string(),
            opt(in_streak_errors),
            opt(in_streak_errors),
            report.streak.unlock_events.to_string(),
            report.streak.error_events.to_string(),
            opt(report.packet_loss),
        ]);

        Self { header, values }
    }
}

fn write_line<W: Write>(out: &mut W, fields: &[String]) -> std::io::Result<()> {
    let line: Vec<Cow<'_, str>> = fields.iter().map(|f| csv_field(f)).collect();
    writeln!(out, "{}", line.join(","))
}

/// Append `row`, writing its header first when the file is new or empty.
pub fn append_result(path: &Path, row: &ResultRow) -> anyhow::Result<()> {
    let needs_header = std::fs::metadata(path).map_or(true, |m| m.len() == 0);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening results file {}", path.display()))?;
    if needs_header {
        write_line(&mut file, &row.header)?;
    }
    write_line(&mut file, &row.values)?;
    file.flush()?;
    tracing::info!(path = %path.display(), "result row written");
    Ok(())
}

/// One entry of the problematic-tests log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemEntry {
    pub freq: f64,
    pub symrate: f64,
    pub power: f64,
    pub pls: u32,
    pub reason: String,
    pub details: String,
    pub timestamp: String,
}

impl ProblemEntry {
    pub fn from_report(report: &CaseReport, details: &str, at: DateTime<Local>) -> Self {
        let tx = report.case.tx;
        Self {
            freq: tx.frequency,
            symrate: tx.symbol_rate,
            power: tx.power,
            pls: report.case.pls,
            reason: match report.status {
                CaseStatus::Failed => "error",
                CaseStatus::NoLock => "no_lock",
                CaseStatus::Completed => "completed",
            }
            .to_string(),
            details: details.to_string(),
            timestamp: at.to_rfc3339(),
        }
    }
}

/// Append to the JSON array at `path`. A missing or corrupt file starts a
/// fresh array.
pub fn append_problem(path: &Path, entry: &ProblemEntry) -> anyhow::Result<()> {
    let mut entries: Vec<ProblemEntry> = match std::fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "problematic log unreadable; starting fresh");
            Vec::new()
        }),
        Err(_) => Vec::new(),
    };
    entries.push(entry.clone());
    let json = serde_json::to_string_pretty(&entries)?;
    std::fs::write(path, json)
        .with_context(|| format!("writing problematic log {}", path.display()))?;
    tracing::warn!(
        path = %path.display(),
        reason = %entry.reason,
        "problematic test recorded"
    );
    Ok(())
}
