//! CLI argument parsing for refforge

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for the run report
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table (default)
    Text,
    /// JSON for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "refforge")]
#[command(version)]
#[command(
    about = "Build bias and dark reference files for an anneal cycle",
    long_about = None
)]
pub struct Cli {
    /// Reference tree to build, usually named <proposal>_<visit>
    #[arg(value_name = "ROOT", required_unless_present = "list_cycles")]
    pub root: Option<PathBuf>,

    /// Pipeline configuration (TOML): thresholds, split limit, period lengths
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Frame header catalog (JSON) mapping raw frame names to their headers
    #[arg(long = "catalog", value_name = "FILE")]
    pub catalog: Option<PathBuf>,

    /// Anneal table (TOML) used to look up the cycle of ROOT
    #[arg(long = "anneals", value_name = "FILE", conflicts_with = "cycle_begin")]
    pub anneals: Option<PathBuf>,

    /// Print every cycle of the anneal table and exit (requires --anneals)
    #[arg(long = "list-cycles", requires = "anneals")]
    pub list_cycles: bool,

    /// Cycle start (MJD); without a cycle the frames' own time extent is used
    #[arg(long = "cycle-begin", value_name = "MJD", requires = "cycle_end")]
    pub cycle_begin: Option<f64>,

    /// Cycle end (MJD)
    #[arg(long = "cycle-end", value_name = "MJD", requires = "cycle_begin")]
    pub cycle_end: Option<f64>,

    /// Separate raw frames at ROOT into period folders; an empty period aborts
    #[arg(long = "separate")]
    pub separate: bool,

    /// Delete every file below ROOT that is not a raw frame, then rebuild
    #[arg(long = "clean")]
    pub clean: bool,

    /// Base bias from a previous cycle to use as the weekly baseline
    #[arg(long = "base-bias", value_name = "FILE")]
    pub base_bias: Option<PathBuf>,

    /// Base dark from a previous cycle to use as the weekly baseline
    #[arg(long = "base-dark", value_name = "FILE")]
    pub base_dark: Option<PathBuf>,

    /// External combiner program
    #[arg(long = "combiner", value_name = "PROGRAM")]
    pub combiner: Option<PathBuf>,

    /// Argument passed to the combiner before the recipe (repeatable)
    #[arg(
        long = "combiner-arg",
        value_name = "ARG",
        allow_hyphen_values = true,
        requires = "combiner"
    )]
    pub combiner_args: Vec<String>,

    /// Continue with independent nodes after a node fails
    #[arg(short = 'k', long = "keep-going")]
    pub keep_going: bool,

    /// Report what would be built without combining or moving anything
    #[arg(short = 'n', long = "dry-run")]
    pub dry_run: bool,

    /// Report format
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Also write the JSON report to FILE
    #[arg(long = "report", value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}
