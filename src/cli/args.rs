//! Command line argument parsing for the segbase CLI using clap.

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// segbase - segmented record sets with bulk-loaded secondary indexes
#[derive(Parser, Debug, Clone)]
#[command(name = "segbase")]
#[command(about = "Bulk-load JSON records and query their secondary indexes")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct SegbaseArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human")]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl SegbaseArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1,
                n => n,
            }
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Bulk-load a JSON lines file using deferred updates
    Load(LoadArgs),

    /// Print the records filed under a key
    Find(FindArgs),

    /// Show database statistics
    Stats(StatsArgs),
}

/// An index declared on the command line as `NAME=FIELD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexArg {
    pub name: String,
    pub field: String,
}

/// Parse `NAME=FIELD`, or a bare `NAME` meaning the field of the same name.
pub fn parse_index_arg(value: &str) -> Result<IndexArg, String> {
    let (name, field) = match value.split_once('=') {
        Some((name, field)) => (name, field),
        None => (value, value),
    };
    if name.is_empty() || field.is_empty() {
        return Err(format!("expected NAME=FIELD, got {value:?}"));
    }
    Ok(IndexArg {
        name: name.to_string(),
        field: field.to_string(),
    })
}

/// Arguments for bulk loading
#[derive(Parser, Debug, Clone)]
pub struct LoadArgs {
    /// Database directory (created if missing)
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// JSON lines file, one record per line
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Secondary index over a JSON field, as NAME=FIELD
    #[arg(short, long = "index", value_name = "NAME=FIELD", value_parser = parse_index_arg)]
    pub indexes: Vec<IndexArg>,

    /// Database name used when creating a new database
    #[arg(long, default_value = "records")]
    pub name: String,

    /// Bytes per segment bitmap when creating a new database
    #[arg(long, value_name = "BYTES")]
    pub segment_bytes: Option<u32>,

    /// List-to-bitarray conversion limit when creating a new database
    #[arg(long, value_name = "COUNT")]
    pub upper_limit: Option<u32>,
}

/// Arguments for key lookup
#[derive(Parser, Debug, Clone)]
pub struct FindArgs {
    /// Database directory
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Index name
    #[arg(value_name = "INDEX")]
    pub index: String,

    /// Key value
    #[arg(value_name = "VALUE")]
    pub value: String,

    /// Maximum number of record numbers to print
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Print the records as well as their numbers
    #[arg(long)]
    pub records: bool,
}

/// Arguments for statistics
#[derive(Parser, Debug, Clone)]
pub struct StatsArgs {
    /// Database directory
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,
}

/// Output formats
#[derive(ValueEnum, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}
