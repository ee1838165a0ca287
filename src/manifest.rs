//! Streaming reader for genotyping-array manifests.
//!
//! A manifest has a free-form preamble, an `[Assay]` marker, one header line
//! and the probe rows, optionally followed by a `[Controls]` section that is
//! not read.

use std::{
    collections::HashMap,
    fmt,
    io::{self, BufRead},
    num::ParseIntError,
};

use thiserror::Error;

use crate::{allele::GenotypeError, chromosome};

pub const ASSAY_MARKER: &str = "[Assay]";
pub const CONTROLS_MARKER: &str = "[Controls]";
pub const NOT_AVAILABLE: &str = "[N/A]";

/// Separator and column names used to read a manifest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ManifestLayout {
    pub separator: String,
    pub chromosome_column: String,
    pub position_column: String,
    pub genotype_column: String,
}

impl Default for ManifestLayout {
    fn default() -> Self {
        Self {
            separator: String::from(","),
            chromosome_column: String::from("chr"),
            position_column: String::from("pos"),
            genotype_column: String::from("geno"),
        }
    }
}

/// A probe row with a normalized chromosome.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    pub line: u64,
    pub chromosome: String,
    pub position: u64,
    pub genotype: String,
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} {}",
            self.chromosome, self.position, self.genotype
        )
    }
}

/// Rows dropped without error.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SkipCounts {
    /// Genotype reported as `[N/A]`.
    pub not_available: usize,
    /// Chromosome `0` or position `0`.
    pub unplaced: usize,
}

/// The manifest is structurally unusable.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum FormatError {
    #[error("missing [Assay] section")]
    MissingAssaySection,
    #[error("missing header line after [Assay]")]
    MissingHeader,
    #[error("column '{0}' not found in manifest header")]
    MissingColumn(String),
}

/// A single data row could not be parsed.
#[derive(Debug, Error)]
#[error("line {line}: {kind}")]
pub struct RowError {
    pub line: u64,
    pub raw: String,
    #[source]
    pub kind: RowErrorKind,
}

#[derive(Debug, Error)]
pub enum RowErrorKind {
    #[error("expected at least {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("invalid position '{value}': {source}")]
    InvalidPosition {
        value: String,
        #[source]
        source: ParseIntError,
    },
    #[error(transparent)]
    InvalidGenotype(#[from] GenotypeError),
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("I/O error reading manifest")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Row(#[from] RowError),
}

#[derive(Clone, Copy, Debug)]
struct Columns {
    chromosome: usize,
    position: usize,
    genotype: usize,
}

impl Columns {
    fn resolve(header: &HashMap<String, usize>, layout: &ManifestLayout) -> Result<Self, FormatError> {
        let lookup = |name: &str| {
            header
                .get(name)
                .copied()
                .ok_or_else(|| FormatError::MissingColumn(name.to_string()))
        };
        Ok(Self {
            chromosome: lookup(&layout.chromosome_column)?,
            position: lookup(&layout.position_column)?,
            genotype: lookup(&layout.genotype_column)?,
        })
    }

    fn required_fields(&self) -> usize {
        self.chromosome.max(self.position).max(self.genotype) + 1
    }
}

/// Iterator over the probe rows of a manifest.
///
/// Construction consumes the stream up to and including the header, so a
/// missing section or column fails before the first row is produced.
pub struct Reader<R> {
    inner: R,
    separator: String,
    header: HashMap<String, usize>,
    columns: Columns,
    line: u64,
    buf: String,
    done: bool,
    skipped: SkipCounts,
}

impl<R> Reader<R>
where
    R: BufRead,
{
    pub fn new(mut inner: R, layout: &ManifestLayout) -> Result<Self, ManifestError> {
        let mut buf = String::new();
        let mut line = 0;

        loop {
            if !read_trimmed_line(&mut inner, &mut buf)? {
                return Err(FormatError::MissingAssaySection.into());
            }
            line += 1;
            if buf == ASSAY_MARKER {
                break;
            }
        }

        if !read_trimmed_line(&mut inner, &mut buf)? {
            return Err(FormatError::MissingHeader.into());
        }
        line += 1;

        let mut header = HashMap::new();
        for (idx, name) in buf.split(layout.separator.as_str()).enumerate() {
            header.entry(name.to_string()).or_insert(idx);
        }
        let columns = Columns::resolve(&header, layout)?;

        tracing::debug!(
            header_line = line,
            columns = header.len(),
            "located manifest header"
        );

        Ok(Self {
            inner,
            separator: layout.separator.clone(),
            header,
            columns,
            line,
            buf,
            done: false,
            skipped: SkipCounts::default(),
        })
    }

    /// Column name to zero-based index; the first of duplicated names wins.
    pub fn header(&self) -> &HashMap<String, usize> {
        &self.header
    }

    pub fn skipped(&self) -> SkipCounts {
        self.skipped
    }

    fn parse_row(&mut self) -> Result<Option<Record>, RowErrorKind> {
        let fields: Vec<&str> = self.buf.split(self.separator.as_str()).collect();
        let expected = self.columns.required_fields();
        if fields.len() < expected {
            return Err(RowErrorKind::FieldCount {
                expected,
                found: fields.len(),
            });
        }

        let chromosome = chromosome::normalize(fields[self.columns.chromosome]);
        let raw_position = fields[self.columns.position];
        let position = raw_position
            .trim()
            .parse::<u64>()
            .map_err(|source| RowErrorKind::InvalidPosition {
                value: raw_position.to_string(),
                source,
            })?;
        let genotype = fields[self.columns.genotype];

        if genotype == NOT_AVAILABLE {
            self.skipped.not_available += 1;
            return Ok(None);
        }
        if chromosome::is_unplaced(&chromosome) || position == 0 {
            self.skipped.unplaced += 1;
            return Ok(None);
        }

        Ok(Some(Record {
            line: self.line,
            chromosome,
            position,
            genotype: genotype.to_string(),
        }))
    }
}

impl<R> Iterator for Reader<R>
where
    R: BufRead,
{
    type Item = Result<Record, ManifestError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match read_trimmed_line(&mut self.inner, &mut self.buf) {
                Ok(false) => self.done = true,
                Ok(true) => {
                    self.line += 1;
                    if self.buf == CONTROLS_MARKER {
                        self.done = true;
                        break;
                    }

                    match self.parse_row() {
                        Ok(Some(record)) => return Some(Ok(record)),
                        Ok(None) => continue,
                        Err(kind) => {
                            self.done = true;
                            return Some(Err(RowError {
                                line: self.line,
                                raw: self.buf.clone(),
                                kind,
                            }
                            .into()));
                        }
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
        None
    }
}

// Returns false at end of stream.
fn read_trimmed_line<R: BufRead>(reader: &mut R, buf: &mut String) -> io::Result<bool> {
    buf.clear();
    if reader.read_line(buf)? == 0 {
        return Ok(false);
    }
    let trimmed_len = buf.trim_end_matches(['\n', '\r']).len();
    buf.truncate(trimmed_len);
    Ok(true)
}
