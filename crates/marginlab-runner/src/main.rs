//! marginlab command-line runner
//!
//! - `run`: execute the configured test plan (calibrate, evaluate, record)
//! - `sweep`: collect an offline noise sweep dataset
//! - `dedup`: sort and deduplicate a sweep dataset in place
//! - `lookup`: query a sweep dataset for the noise seed of a target margin
//!
//! Bench drivers are supplied by integrators through the library's device
//! traits; this binary drives the simulated bench with `--simulate`.

use std::fs::OpenOptions;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use marginlab_core::clock::{Clock, ManualClock};
use marginlab_core::config::BenchConfig;
use marginlab_core::sweep::{dataset, maintenance, SweepCollector, SweepTable};
use marginlab_core::targets::TargetTable;
use marginlab_runner::{sim, Orchestrator};

/// Noise calibration and link-quality test runner.
#[derive(Parser, Debug)]
#[command(name = "marginlab", about = "Noise calibration and link-quality test runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the test plan from a bench config.
    Run {
        /// Bench configuration (TOML).
        #[arg(long, env = "MARGINLAB_CONFIG")]
        config: PathBuf,

        /// Run against the simulated bench.
        #[arg(long, default_value_t = false)]
        simulate: bool,

        /// Seed for the simulated fault scenario; omit for a fault-free bench.
        #[arg(long)]
        seed: Option<u64>,

        /// Simulated drift of live margin above the sweep, in dB.
        #[arg(long, default_value_t = 0.8, allow_hyphen_values = true)]
        live_offset: f64,
    },

    /// Collect a sweep dataset over the config's `[sweep]` grid.
    Sweep {
        #[arg(long, env = "MARGINLAB_CONFIG")]
        config: PathBuf,

        /// Dataset to append to; an existing dataset is resumed.
        #[arg(long)]
        output: PathBuf,

        #[arg(long, default_value_t = false)]
        simulate: bool,
    },

    /// Sort and deduplicate a sweep dataset.
    Dedup {
        #[arg(long)]
        input: PathBuf,

        /// Defaults to rewriting the input in place.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Look up the noise seed for a target margin.
    Lookup {
        #[arg(long)]
        sweep: PathBuf,
        #[arg(long, allow_hyphen_values = true)]
        frequency: f64,
        #[arg(long, allow_hyphen_values = true)]
        symbol_rate: f64,
        #[arg(long, allow_hyphen_values = true)]
        power: f64,
        #[arg(long, allow_hyphen_values = true)]
        target: f64,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            config,
            simulate,
            seed,
            live_offset,
        } => run(&config, simulate, seed, live_offset),
        Command::Sweep {
            config,
            output,
            simulate,
        } => sweep(&config, &output, simulate),
        Command::Dedup { input, output } => {
            let output = output.unwrap_or_else(|| input.clone());
            let report = maintenance::sort_and_dedup_file(&input, &output)
                .with_context(|| format!("deduplicating {}", input.display()))?;
            println!(
                "kept {} of {} rows ({} removed)",
                report.kept_rows,
                report.input_rows,
                report.removed()
            );
            Ok(())
        }
        Command::Lookup {
            sweep,
            frequency,
            symbol_rate,
            power,
            target,
        } => {
            let table = SweepTable::from_csv_path(&sweep)
                .with_context(|| format!("loading sweep {}", sweep.display()))?;
            let hit = table.lookup(frequency, symbol_rate, power, target)?;
            println!(
                "noise {} ({}) closest margin {} dB for target {} dB",
                hit.noise.hex, hit.noise.dec, hit.closest_margin, hit.requested_margin
            );
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<BenchConfig> {
    BenchConfig::from_path(path).with_context(|| format!("loading config {}", path.display()))
}

fn require_simulate(simulate: bool) -> anyhow::Result<()> {
    if !simulate {
        anyhow::bail!(
            "no hardware driver is linked into this binary; pass --simulate, \
             or drive marginlab-runner with your own Modulator/Demodulator"
        );
    }
    Ok(())
}

fn run(config: &Path, simulate: bool, seed: Option<u64>, live_offset: f64) -> anyhow::Result<()> {
    let cfg = load_config(config)?;
    require_simulate(simulate)?;
    if cfg.tests.is_empty() {
        anyhow::bail!("config {} has no tests", config.display());
    }

    let targets = TargetTable::from_json_path(&cfg.paths.targets)
        .with_context(|| format!("loading targets {}", cfg.paths.targets.display()))?;
    sim::ensure_sweep(&cfg.paths.sweep, &cfg.tests, &cfg.sweep)?;
    let table = SweepTable::from_csv_path(&cfg.paths.sweep)
        .with_context(|| format!("loading sweep {}", cfg.paths.sweep.display()))?;

    let clock = ManualClock::new();
    let horizon = cfg.policy.evaluation_window * (cfg.tests.len() as u32 + 1) * 4;
    let bench = sim::bench(&clock, seed, live_offset, horizon);

    tracing::info!(
        tests = cfg.tests.len(),
        seed = ?seed,
        live_offset,
        "marginlab run starting (simulated bench)"
    );
    let summary = Orchestrator::new(&cfg, &table, &targets, &clock).run_plan(
        &mut bench.modulator(),
        &mut bench.demodulator(),
        &cfg.tests,
    )?;

    println!(
        "{} tests: {} completed, {} no lock, {} failed (bench time {:.0}s)",
        summary.total(),
        summary.completed,
        summary.no_lock,
        summary.failed,
        clock.now().as_secs_f64()
    );
    Ok(())
}

fn sweep(config: &Path, output: &Path, simulate: bool) -> anyhow::Result<()> {
    let cfg = load_config(config)?;
    require_simulate(simulate)?;

    let needs_header = std::fs::metadata(output).map_or(true, |m| m.len() == 0);
    let existing = if !needs_header {
        dataset::read_csv(output)
            .with_context(|| format!("reading existing sweep {}", output.display()))?
    } else {
        Vec::new()
    };
    let resume_after = existing.last();

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(output)
        .with_context(|| format!("opening {}", output.display()))?;
    let mut out = BufWriter::new(file);
    if needs_header {
        dataset::write_header(&mut out)?;
    }

    let clock = ManualClock::new();
    let bench = sim::bench(&clock, None, 0.0, std::time::Duration::ZERO);
    let report = SweepCollector::new(&clock, &cfg.sweep).run(
        &mut bench.modulator(),
        &mut bench.demodulator(),
        &mut out,
        resume_after,
    )?;

    println!(
        "swept {} points, {} samples written to {} ({} device errors)",
        report.points,
        report.samples,
        output.display(),
        report.device_errors
    );
    Ok(())
}
