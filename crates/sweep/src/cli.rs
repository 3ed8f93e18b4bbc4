//! CLI wiring for KernelSweep.

use crate::config::SweepConfig;
use crate::report::analyze;
use crate::session::{optimizer_for, SweepSession, SweepStart};
use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use kernelsweep_autotune::space::SweepCursor;
use kernelsweep_backend::{ProcessRunner, ProcessToolchain};
use kernelsweep_kernels::config::Device;
use kernelsweep_optimizer::space::SearchSpace;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "kernelsweep", about = "Autotuning sweeps for matmul kernel variants")]
pub struct Cli {
    /// Sweep configuration (JSON). Defaults reproduce the reference campaign.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

/// Per-run overrides of configuration fields.
#[derive(Args, Debug, Default)]
pub struct Overrides {
    /// Restrict the run to these variants.
    #[arg(long = "variant", global = true)]
    pub variants: Vec<String>,
    /// Restrict the run to these devices (CPU, GPU, 0 or 1).
    #[arg(long = "device", global = true)]
    pub devices: Vec<Device>,
    #[arg(long, global = true)]
    pub trials: Option<usize>,
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    pub checkpoint: Option<PathBuf>,
    /// Fail on kernel output that does not match the configured metrics.
    #[arg(long, global = true, default_value_t = false)]
    pub strict: bool,
    /// Kill a trial after this many seconds.
    #[arg(long, global = true)]
    pub timeout_secs: Option<f64>,
}

impl Overrides {
    pub fn apply(&self, config: &mut SweepConfig) {
        if !self.devices.is_empty() {
            config.devices = self.devices.clone();
        }
        if let Some(trials) = self.trials {
            config.trials = trials;
            config.tune.trials = trials;
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(path) = &self.checkpoint {
            config.checkpoint = path.clone();
        }
        if self.strict {
            config.strict_parsing = true;
        }
        if self.timeout_secs.is_some() {
            config.timeout_secs = self.timeout_secs;
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build and measure every configuration, resuming from the checkpoint log.
    Sweep {
        /// Ignore the checkpoint log and start from the beginning.
        #[arg(long, default_value_t = false)]
        fresh: bool,
        /// Explicit start position; overrides the checkpoint log.
        #[arg(long)]
        start_device: Option<usize>,
        #[arg(long)]
        start_tile: Option<usize>,
        #[arg(long)]
        start_variant: Option<usize>,
    },
    /// Search each variant's tuning constants with the configured optimizer.
    Tune,
    /// Rebuild each variant with its best tuned constants and measure it.
    Rerun,
    /// Time the vendor-library baselines at every sweep problem size.
    Baseline {
        /// Restrict the run to these baselines.
        #[arg(long = "name")]
        names: Vec<String>,
    },
    /// Rank result tables under a directory.
    Analyze {
        #[arg(long, default_value = "tests")]
        dir: PathBuf,
        #[arg(long)]
        top_k: Option<usize>,
        /// Print the ranking as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print the search space of a variant as JSON.
    Space {
        variant: String,
        #[arg(long, default_value = "GPU")]
        device: Device,
        /// Write to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let Cli {
        config,
        overrides,
        command,
    } = cli;
    let mut config = SweepConfig::load_or_default(config.as_deref())?;
    overrides.apply(&mut config);

    let toolchain = ProcessToolchain::new();
    let runner = ProcessRunner::new().with_timeout(config.timeout());
    let session = SweepSession::new(&config, &toolchain, &runner);

    match command {
        Command::Sweep {
            fresh,
            start_device,
            start_tile,
            start_variant,
        } => {
            let start = if start_device.is_some() || start_tile.is_some() || start_variant.is_some() {
                SweepStart::At(SweepCursor::new(
                    start_device.unwrap_or(0),
                    start_tile.unwrap_or(0),
                    start_variant.unwrap_or(0),
                ))
            } else if fresh {
                SweepStart::Fresh
            } else {
                SweepStart::Resume
            };
            let variants = config.select_variants(&overrides.variants)?;
            let space = config.sweep_space(variants);
            let summary = session.run_sweep(&space, start)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Tune => {
            let variants = config.select_variants(&overrides.variants)?;
            let optimizer = optimizer_for(&config);
            let results = session.tune(&variants, optimizer.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Command::Rerun => {
            let variants = config.select_variants(&overrides.variants)?;
            let records = session.rerun(&variants)?;
            info!(records = records.len(), "re-run finished");
        }
        Command::Baseline { names } => {
            let records = session.run_baselines(&names)?;
            info!(records = records.len(), "baselines finished");
        }
        Command::Analyze { dir, top_k, json } => {
            let mut report_config = config.report.clone();
            if let Some(k) = top_k {
                report_config.top_k = k;
            }
            let report = analyze(&dir, &report_config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render());
            }
        }
        Command::Space {
            variant,
            device,
            output,
        } => {
            let Some(variant) = config.registry().find(&variant).cloned() else {
                bail!("unknown kernel variant `{variant}`");
            };
            let space = SearchSpace::for_variant(&variant, device, &config.tune.space);
            match output {
                Some(path) => space.save_to_file(&path)?,
                None => println!("{}", serde_json::to_string_pretty(&space)?),
            }
        }
    }
    Ok(())
}
