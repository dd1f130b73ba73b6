use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{DEFAULT_DATASET_TYPE, TableKind};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Clean, validate and reconcile product reference tables",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run every stage: normalize, standardize, check and reconcile
    Run(RunArgs),
    /// Normalize the raw table into the clean table
    Normalize(StoreArgs),
    /// Collapse near-duplicate brand and supplier spellings in the clean table
    Standardize(StandardizeArgs),
    /// Evaluate the dataset type's rules and write the excluded table
    Check(CheckArgs),
    /// Remove the excluded rows from the clean table
    Reconcile(StoreArgs),
    /// Print the first rows of a table
    Show(ShowArgs),
    /// List the supported rules and the configured dataset types
    Rules(RulesArgs),
}

#[derive(Debug, Clone, Args)]
pub struct StoreArgs {
    /// Directory holding the `<table>.csv` files and their schema sidecars
    #[arg(short = 'd', long = "data-dir", default_value = ".")]
    pub data_dir: PathBuf,
    /// Dataset configuration file (YAML); built-in defaults apply when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the table files (defaults to utf-8)
    #[arg(long)]
    pub encoding: Option<String>,
    /// Remove a run lock left behind by a run that crashed before releasing it
    #[arg(long = "break-lock")]
    pub break_lock: bool,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    /// Dataset type selecting the active rules
    #[arg(short = 't', long = "dataset-type", default_value = DEFAULT_DATASET_TYPE)]
    pub dataset_type: String,
    /// Print the run summary as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct StandardizeArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    /// Print every normalization key with the spelling chosen for it
    #[arg(long = "show-mappings")]
    pub show_mappings: bool,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    /// Dataset type selecting the active rules
    #[arg(short = 't', long = "dataset-type", default_value = DEFAULT_DATASET_TYPE)]
    pub dataset_type: String,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    /// Table to print: raw, clean or excluded
    #[arg(long, default_value = "clean", value_parser = parse_table_kind)]
    pub table: TableKind,
    /// Maximum number of rows to print
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Debug, Args)]
pub struct RulesArgs {
    /// Dataset configuration file (YAML); built-in defaults apply when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

fn parse_table_kind(value: &str) -> Result<TableKind, String> {
    value.parse::<TableKind>().map_err(|err| err.to_string())
}
