pub mod canonical;
pub mod cli;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod io_utils;
pub mod normalize;
pub mod pipeline;
pub mod reconcile;
pub mod rules;
pub mod schema;
pub mod store;
pub mod table;

use std::{env, path::Path, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use itertools::Itertools;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands},
    config::DatasetConfig,
    pipeline::{CleaningPipeline, PipelineSummary},
    rules::RuleKind,
    store::{CsvStore, TableStore},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("refclean", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => handle_run(&args),
        Commands::Normalize(args) => handle_normalize(&args),
        Commands::Standardize(args) => handle_standardize(&args),
        Commands::Check(args) => handle_check(&args),
        Commands::Reconcile(args) => handle_reconcile(&args),
        Commands::Show(args) => handle_show(&args),
        Commands::Rules(args) => handle_rules(&args),
    }
}

fn load_config(path: Option<&Path>) -> Result<DatasetConfig> {
    match path {
        Some(path) => {
            let config = DatasetConfig::load(path)?;
            debug!("Loaded dataset configuration from {path:?}");
            Ok(config)
        }
        None => Ok(DatasetConfig::default()),
    }
}

fn open_store(args: &cli::StoreArgs) -> Result<CsvStore> {
    let encoding = io_utils::resolve_encoding(args.encoding.as_deref())?;
    let delimiter = args.delimiter.unwrap_or(io_utils::DEFAULT_DELIMITER);
    info!(
        "Using tables under '{}' with delimiter '{}' and encoding {}",
        args.data_dir.display(),
        printable_delimiter(delimiter),
        encoding.name()
    );
    let store = CsvStore::new(args.data_dir.clone())
        .with_delimiter(delimiter)
        .with_encoding(encoding);
    if args.break_lock && store.break_lock()?.is_none() {
        debug!("No run lock to remove under '{}'", args.data_dir.display());
    }
    Ok(store)
}

fn open_pipeline(args: &cli::StoreArgs) -> Result<CleaningPipeline<CsvStore>> {
    let config = load_config(args.config.as_deref())?;
    Ok(CleaningPipeline::new(open_store(args)?, config))
}

fn handle_run(args: &cli::RunArgs) -> Result<()> {
    let pipeline = open_pipeline(&args.store)?;
    let summary = pipeline
        .run(&args.dataset_type)
        .with_context(|| format!("Running the '{}' pipeline", args.dataset_type))?;
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Serializing run summary")?
        );
    } else {
        print!("{}", render_summary(&summary));
    }
    Ok(())
}

fn handle_normalize(args: &cli::StoreArgs) -> Result<()> {
    let pipeline = open_pipeline(args)?;
    let normalized = pipeline.normalize()?;
    info!(
        "Normalized {} row(s) into '{}'",
        normalized.len(),
        pipeline.config().tables.clean
    );
    Ok(())
}

fn handle_standardize(args: &cli::StandardizeArgs) -> Result<()> {
    let pipeline = open_pipeline(&args.store)?;
    let mappings = pipeline.standardize()?;
    if args.show_mappings {
        let headers = ["column", "key", "canonical"].map(str::to_string);
        let rows = mappings
            .values()
            .flat_map(|mapping| {
                mapping.entries().map(move |(key, canonical)| {
                    vec![mapping.column.clone(), key.to_string(), canonical.to_string()]
                })
            })
            .collect::<Vec<_>>();
        table::print_table(&headers, &rows);
    } else {
        print!(
            "{}",
            table::render_pairs(
                ["column", "collapsed spellings"],
                mappings
                    .iter()
                    .map(|(column, mapping)| (column.as_str(), mapping.collapsed_spellings()))
            )
        );
    }
    Ok(())
}

fn handle_check(args: &cli::CheckArgs) -> Result<()> {
    let pipeline = open_pipeline(&args.store)?;
    let report = pipeline
        .check(&args.dataset_type)
        .with_context(|| format!("Checking the '{}' dataset", args.dataset_type))?;
    let counts = report.reason_counts();
    print!(
        "{}",
        table::render_pairs(
            ["reason", "rows"],
            counts.iter().map(|(reason, count)| (reason.as_str(), *count))
        )
    );
    info!(
        "{} of {} row(s) flagged, {} distinct row(s) written to '{}'",
        report.flagged_rows(),
        report.rows_evaluated,
        report.defects.len(),
        pipeline.config().tables.excluded
    );
    Ok(())
}

fn handle_reconcile(args: &cli::StoreArgs) -> Result<()> {
    let pipeline = open_pipeline(args)?;
    let accepted = pipeline.reconcile()?;
    println!(
        "{} accepted row(s), digest {}",
        accepted.len(),
        crate::pipeline::digest(&accepted)
    );
    Ok(())
}

fn handle_show(args: &cli::ShowArgs) -> Result<()> {
    let config = load_config(args.store.config.as_deref())?;
    let store = open_store(&args.store)?;
    let name = config.table(args.table);
    let records = store
        .scan(name)
        .with_context(|| format!("Reading {} table '{name}'", args.table))?;
    print!("{}", table::render_records(&records, args.limit));
    if records.len() > args.limit {
        println!("({} of {} rows)", args.limit, records.len());
    }
    Ok(())
}

fn handle_rules(args: &cli::RulesArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let headers = ["rule", "reason", "flags"].map(str::to_string);
    let rows = RuleKind::ALL
        .iter()
        .map(|kind| {
            vec![
                kind.name().to_string(),
                kind.reason().to_string(),
                kind.describe().to_string(),
            ]
        })
        .collect::<Vec<_>>();
    table::print_table(&headers, &rows);
    println!();

    let types = config
        .dataset_types
        .dataset_types()
        .map(|dataset_type| {
            let rules = config
                .dataset_types
                .active_rules(dataset_type)
                .map(|rules| rules.iter().join(", "))
                .unwrap_or_default();
            (dataset_type, rules)
        })
        .collect::<Vec<_>>();
    print!("{}", table::render_pairs(["dataset type", "rules"], types));
    Ok(())
}

fn render_summary(summary: &PipelineSummary) -> String {
    let duration = summary.finished_at - summary.started_at;
    let mut pairs = vec![
        ("run id", summary.run_id.to_string()),
        ("dataset type", summary.dataset_type.clone()),
        ("raw rows", summary.raw_rows.to_string()),
        ("accepted rows", summary.accepted_rows.to_string()),
        ("excluded rows", summary.excluded_rows.to_string()),
        ("flagged rows", summary.flagged_rows.to_string()),
        ("elapsed ms", duration.num_milliseconds().to_string()),
        ("accepted digest", summary.accepted_digest.clone()),
    ];
    let reasons = summary
        .reason_counts
        .iter()
        .map(|(reason, count)| format!("{reason}={count}"))
        .join(", ");
    if !reasons.is_empty() {
        pairs.push(("reasons", reasons));
    }
    let collapsed = summary
        .collapsed_spellings
        .iter()
        .map(|(column, count)| format!("{column}={count}"))
        .join(", ");
    if !collapsed.is_empty() {
        pairs.push(("collapsed spellings", collapsed));
    }
    table::render_pairs(["metric", "value"], pairs)
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
