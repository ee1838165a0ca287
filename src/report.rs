//! JSON report of an import run for downstream bookkeeping.

use serde::Serialize;
use std::path::Path;

use crate::import::{ImportConfig, ImportSummary};

/// Complete report of an import run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Tool version
    pub version: String,
    /// Timestamp of run (RFC 3339)
    pub timestamp: String,

    pub array: String,
    pub manifest: ManifestInfo,
    pub reference: String,
    pub database: String,

    pub statistics: ImportSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestInfo {
    pub path: String,
    pub separator: String,
    pub chromosome_column: String,
    pub position_column: String,
    pub genotype_column: String,
}

impl RunReport {
    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)?;
        tracing::info!("Wrote run report to {}", path.display());
        Ok(())
    }
}

/// Collects the run metadata known before the import starts.
#[derive(Debug)]
pub struct RunReportBuilder {
    pub array: String,
    pub manifest: ManifestInfo,
    pub reference: String,
    pub database: String,
}

impl RunReportBuilder {
    pub fn from_config(config: &ImportConfig) -> Self {
        Self {
            array: config.array_name.clone(),
            manifest: ManifestInfo {
                path: config.manifest.display().to_string(),
                separator: config.layout.separator.clone(),
                chromosome_column: config.layout.chromosome_column.clone(),
                position_column: config.layout.position_column.clone(),
                genotype_column: config.layout.genotype_column.clone(),
            },
            reference: config.reference_fasta.display().to_string(),
            database: config.database.display().to_string(),
        }
    }

    pub fn build(self, summary: &ImportSummary) -> RunReport {
        let timestamp = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string());

        RunReport {
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp,
            array: self.array,
            manifest: self.manifest,
            reference: self.reference,
            database: self.database,
            statistics: summary.clone(),
        }
    }
}
