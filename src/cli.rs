use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use crate::{
    ImportConfig, ImportSummary, ManifestLayout, Registry, StudyError, import_array,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Import genotyping arrays and studies into a variant registry", long_about = None)]
struct Cli {
    /// SQLite registry database (created if missing)
    #[arg(long, value_name = "DB", default_value = "registry.sqlite", global = true)]
    database: PathBuf,

    /// Logging verbosity (e.g. error, warn, info, debug)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Import an array and the variants of its manifest.
    Array(ArrayArgs),
    /// Register a study genotyped on an existing array.
    Study(StudyArgs),
}

#[derive(Debug, Args)]
struct ArrayArgs {
    /// The name of the array.
    #[arg(long, value_name = "NAME")]
    name: String,

    /// The annotation (manifest) provided with the array, optionally gzipped.
    #[arg(long, value_name = "FILE")]
    annotation: PathBuf,

    /// The field separator of the annotation file ("\t" or "tab" for tabs).
    #[arg(long, value_name = "SEP", default_value = ",")]
    sep: String,

    /// The field containing the chromosome.
    #[arg(long, value_name = "FIELD", default_value = "chr")]
    chrom: String,

    /// The field containing the position.
    #[arg(long, value_name = "FIELD", default_value = "pos")]
    pos: String,

    /// The field containing the genotype.
    #[arg(long, value_name = "FIELD", default_value = "geno")]
    geno: String,

    /// The human reference FASTA.
    #[arg(long, value_name = "FILE")]
    reference: PathBuf,

    /// Optional explicit FASTA index (.fai) path
    #[arg(long, value_name = "FAI")]
    reference_fai: Option<PathBuf>,

    /// Write a JSON run report to this path
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct StudyArgs {
    /// The name of the study.
    #[arg(long, value_name = "NAME")]
    name: String,

    /// The genotyping array used by the study.
    #[arg(long, value_name = "NAME")]
    array: String,

    /// The parent study, if any.
    #[arg(long, value_name = "NAME")]
    parent: Option<String>,
}

pub fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Command::Array(args) => {
            let config = args.into_config(cli.database);
            let summary = import_array(&config)?;
            print_summary(&config.array_name, &summary);
            Ok(ExitCode::SUCCESS)
        }
        Command::Study(args) => register_study(&cli.database, &args),
    }
}

impl ArrayArgs {
    fn into_config(self, database: PathBuf) -> ImportConfig {
        ImportConfig {
            array_name: self.name,
            manifest: self.annotation,
            layout: ManifestLayout {
                separator: parse_separator(&self.sep),
                chromosome_column: self.chrom,
                position_column: self.pos,
                genotype_column: self.geno,
            },
            reference_fasta: self.reference,
            reference_fai: self.reference_fai,
            database,
            report: self.report,
        }
    }
}

fn register_study(database: &Path, args: &StudyArgs) -> Result<ExitCode> {
    let mut registry = Registry::open(database)
        .with_context(|| format!("failed to open database {}", database.display()))?;

    match registry.register_study(&args.name, args.parent.as_deref(), &args.array) {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(StudyError::Registry(err)) => {
            Err(err).with_context(|| format!("failed to register study {}", args.name))
        }
        Err(err) => {
            tracing::error!("{err}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn parse_separator(raw: &str) -> String {
    match raw {
        "\\t" | "tab" => String::from("\t"),
        other => other.to_string(),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

fn print_summary(array: &str, summary: &ImportSummary) {
    println!(
        "Loaded {loaded} variants for array {array} in {batches} batches.",
        loaded = summary.loaded_records,
        batches = summary.batches,
    );

    if !summary.array_created {
        println!("Array {array} was already registered.");
    }

    if summary.skipped_not_available > 0 || summary.skipped_unplaced > 0 {
        println!(
            "Skipped {na} rows with [N/A] genotypes and {unplaced} unplaced rows.",
            na = summary.skipped_not_available,
            unplaced = summary.skipped_unplaced,
        );
    }

    if summary.unresolved_records > 0 {
        println!(
            "Warning: {count} calls matched neither strand of the reference and have no alternate allele.",
            count = summary.unresolved_records
        );
    }
}
