use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use serde::Serialize;
use thiserror::Error;

use crate::{
    allele::{self, GenotypeCall, ResolutionRule},
    loader::{BatchLoader, VariantCall, VariantStore},
    manifest::{self, ManifestError, ManifestLayout, RowError, RowErrorKind},
    reference::{BaseLookup, ReferenceError, ReferenceGenome},
    registry::{ArrayRegistration, Registry, RegistryError},
    report::RunReportBuilder,
};

/// Everything needed to import one array manifest.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub array_name: String,
    pub manifest: PathBuf,
    pub layout: ManifestLayout,
    pub reference_fasta: PathBuf,
    pub reference_fai: Option<PathBuf>,
    pub database: PathBuf,
    pub report: Option<PathBuf>,
}

/// Counters collected over one import run.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct ImportSummary {
    pub array_created: bool,
    pub loaded_records: usize,
    pub batches: usize,
    pub skipped_not_available: usize,
    pub skipped_unplaced: usize,
    pub indel_records: usize,
    pub complemented_records: usize,
    pub unresolved_records: usize,
}

impl ImportSummary {
    fn record_resolution(&mut self, rule: ResolutionRule) {
        match rule {
            ResolutionRule::Indel => self.indel_records += 1,
            ResolutionRule::Unresolved => self.unresolved_records += 1,
            rule if rule.is_complemented() => self.complemented_records += 1,
            _ => {}
        }
    }
}

/// Fatal errors of the manifest to registry pipeline.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("line {line}: reference lookup failed for {contig}:{position}")]
    Reference {
        line: u64,
        contig: String,
        position: u64,
        #[source]
        source: ReferenceError,
    },
    #[error("failed to store variants")]
    Registry(#[from] RegistryError),
}

/// Import a manifest file into the registry database named by `config`.
pub fn import_array(config: &ImportConfig) -> Result<ImportSummary> {
    tracing::info!(
        array = %config.array_name,
        manifest = %config.manifest.display(),
        reference = %config.reference_fasta.display(),
        database = %config.database.display(),
        "starting array import",
    );

    let reference = ReferenceGenome::open(&config.reference_fasta, config.reference_fai.clone())
        .with_context(|| {
            format!(
                "failed to open reference genome {}",
                config.reference_fasta.display()
            )
        })?;

    let mut registry = Registry::open(&config.database)
        .with_context(|| format!("failed to open database {}", config.database.display()))?;

    let input = open_manifest(&config.manifest)
        .with_context(|| format!("failed to open manifest {}", config.manifest.display()))?;
    let reader = manifest::Reader::new(input, &config.layout)
        .with_context(|| format!("invalid manifest {}", config.manifest.display()))?;

    let registration = registry
        .register_array(&config.array_name)
        .context("failed to register genotyping array")?;

    let mut summary = load_records(reader, &config.array_name, &reference, &mut registry)
        .with_context(|| format!("failed to import {}", config.manifest.display()))?;
    summary.array_created = registration == ArrayRegistration::Created;

    if let Some(report_path) = &config.report {
        RunReportBuilder::from_config(config)
            .build(&summary)
            .write(report_path)
            .with_context(|| format!("failed to write report {}", report_path.display()))?;
    }

    Ok(summary)
}

/// Parse a manifest stream and load it into `store` for `array_name`.
///
/// The array must already be registered. Batches committed before an error
/// stay in the store.
pub fn import_manifest<R, L, S>(
    input: R,
    layout: &ManifestLayout,
    array_name: &str,
    reference: &L,
    store: &mut S,
) -> Result<ImportSummary, ImportError>
where
    R: BufRead,
    L: BaseLookup,
    S: VariantStore,
{
    let reader = manifest::Reader::new(input, layout)?;
    load_records(reader, array_name, reference, store)
}

fn load_records<R, L, S>(
    mut reader: manifest::Reader<R>,
    array_name: &str,
    reference: &L,
    store: &mut S,
) -> Result<ImportSummary, ImportError>
where
    R: BufRead,
    L: BaseLookup,
    S: VariantStore,
{
    let mut summary = ImportSummary::default();
    let mut loader = BatchLoader::new(store, array_name);

    for result in reader.by_ref() {
        let record = result?;
        let call = resolve_record(&record, reference, &mut summary)?;
        loader.push(call)?;
    }

    let stats = loader.finish()?;
    let skipped = reader.skipped();
    summary.loaded_records = stats.records;
    summary.batches = stats.batches;
    summary.skipped_not_available = skipped.not_available;
    summary.skipped_unplaced = skipped.unplaced;

    if summary.unresolved_records > 0 {
        tracing::warn!(
            unresolved = summary.unresolved_records,
            "calls could not be matched to the reference on either strand; stored without an alternate allele",
        );
    }
    tracing::info!(
        array = array_name,
        loaded = summary.loaded_records,
        batches = summary.batches,
        "finished array import",
    );

    Ok(summary)
}

fn resolve_record<L: BaseLookup>(
    record: &manifest::Record,
    reference: &L,
    summary: &mut ImportSummary,
) -> Result<VariantCall, ImportError> {
    let call = GenotypeCall::parse(&record.genotype).map_err(|e| RowError {
        line: record.line,
        raw: record.genotype.clone(),
        kind: RowErrorKind::InvalidGenotype(e),
    })
    .map_err(ManifestError::from)?;

    let contig = allele::reference_contig(&record.chromosome);
    let base = reference
        .base(&contig, record.position)
        .map_err(|source| ImportError::Reference {
            line: record.line,
            contig: contig.clone(),
            position: record.position,
            source,
        })?;

    let resolution = allele::resolve(&call, base);
    summary.record_resolution(resolution.rule);
    if resolution.rule == ResolutionRule::Unresolved {
        tracing::debug!(
            line = record.line,
            reference = %resolution.reference,
            "unresolved call {record}"
        );
    }

    Ok(VariantCall {
        chromosome: record.chromosome.clone(),
        position: record.position,
        reference: resolution.reference,
        alternate: resolution.alternate,
    })
}

/// Open a manifest, decompressing it if it starts with the gzip magic bytes.
pub fn open_manifest(path: &Path) -> io::Result<Box<dyn BufRead>> {
    let mut reader = BufReader::new(File::open(path)?);
    let is_gzip = {
        let buf = reader.fill_buf()?;
        buf.len() >= 2 && buf[0] == 0x1f && buf[1] == 0x8b
    };

    if is_gzip {
        tracing::debug!("reading gzip-compressed manifest");
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}
