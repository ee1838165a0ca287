use std::{
    collections::HashMap,
    fs, io,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use lru::LruCache;
use noodles::{
    core::{Position, Region},
    fasta::{self, fai},
};
use parking_lot::Mutex;
use std::str::Utf8Error;
use thiserror::Error;

const CACHE_CAPACITY: usize = 64 * 1024;

/// Random access to single reference bases.
pub trait BaseLookup {
    /// Upper-cased base at a 1-based `position` of `contig`.
    fn base(&self, contig: &str, position: u64) -> Result<char, ReferenceError>;
}

#[derive(Debug, Clone)]
pub struct ReferenceContig {
    pub name: String,
    pub length: u64,
}

/// Indexed FASTA reference. Contigs are reachable by their own name or by
/// the same name with or without a `chr` prefix.
pub struct ReferenceGenome {
    path: PathBuf,
    reader: Mutex<fasta::io::IndexedReader<fasta::io::BufReader<fs::File>>>,
    contigs: Vec<ReferenceContig>,
    alias_to_index: HashMap<String, usize>,
    cache: Mutex<LruCache<(usize, u64), u8>>,
}

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid UTF-8 contig name: {0}")]
    InvalidContigName(#[from] Utf8Error),
    #[error("unknown contig: {query}")]
    UnknownContig { query: String },
    #[error("position {position} is outside contig {contig} length {length}")]
    PositionOutOfBounds {
        contig: String,
        position: u64,
        length: u64,
    },
    #[error("invalid genomic position: {0}")]
    InvalidPosition(#[from] noodles::core::position::TryFromIntError),
}

impl ReferenceGenome {
    /// Open a FASTA file, reading its `.fai` index or building one next to it.
    pub fn open<P: AsRef<Path>>(
        path: P,
        fai_path: Option<PathBuf>,
    ) -> Result<Self, ReferenceError> {
        let canonical = fs::canonicalize(path.as_ref())?;

        let index_path = fai_path.unwrap_or_else(|| default_index_path(&canonical));
        let index = if index_path.exists() {
            fai::fs::read(&index_path)?
        } else {
            tracing::info!(index = %index_path.display(), "indexing reference FASTA");
            let index = fasta::fs::index(&canonical)?;
            fai::fs::write(&index_path, &index)?;
            index
        };

        let contigs = index
            .as_ref()
            .iter()
            .map(|record| -> Result<ReferenceContig, ReferenceError> {
                let name = std::str::from_utf8(record.name().as_ref())?.to_string();
                Ok(ReferenceContig {
                    name,
                    length: record.length(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let reader = fasta::io::indexed_reader::Builder::default()
            .set_index(index)
            .build_from_path(&canonical)?;

        let alias_to_index = build_alias_map(&contigs);
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            path: canonical,
            reader: Mutex::new(reader),
            contigs,
            alias_to_index,
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub fn contigs(&self) -> &[ReferenceContig] {
        self.contigs.as_slice()
    }

    fn contig_index(&self, query: &str) -> Option<usize> {
        self.alias_to_index.get(&canonical_key(query)).copied()
    }

    pub fn contig(&self, query: &str) -> Option<&ReferenceContig> {
        self.contig_index(query).map(|idx| &self.contigs[idx])
    }

    pub fn base(&self, query: &str, position: u64) -> Result<char, ReferenceError> {
        let idx = self
            .contig_index(query)
            .ok_or_else(|| ReferenceError::UnknownContig {
                query: query.to_string(),
            })?;
        let contig = &self.contigs[idx];

        if position == 0 || position > contig.length {
            return Err(ReferenceError::PositionOutOfBounds {
                contig: contig.name.clone(),
                position,
                length: contig.length,
            });
        }

        if let Some(base) = self.cache.lock().get(&(idx, position)).copied() {
            return Ok(char::from(base));
        }

        let pos = usize::try_from(position).map_err(|_| ReferenceError::PositionOutOfBounds {
            contig: contig.name.clone(),
            position,
            length: contig.length,
        })?;
        let start = Position::try_from(pos)?;
        let region = Region::new(contig.name.clone(), start..=start);
        let record = self.reader.lock().query(&region)?;
        let base = record
            .sequence()
            .as_ref()
            .first()
            .copied()
            .unwrap_or(b'N')
            .to_ascii_uppercase();

        self.cache.lock().put((idx, position), base);
        Ok(char::from(base))
    }
}

impl BaseLookup for ReferenceGenome {
    fn base(&self, contig: &str, position: u64) -> Result<char, ReferenceError> {
        ReferenceGenome::base(self, contig, position)
    }
}

fn default_index_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".fai");
    PathBuf::from(s)
}

fn canonical_key(raw: &str) -> String {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_prefix("chr")
        .or_else(|| trimmed.strip_prefix("CHR"))
        .unwrap_or(trimmed);
    match stripped.to_ascii_uppercase().as_str() {
        "MT" => String::from("M"),
        upper => upper.to_string(),
    }
}

fn build_alias_map(contigs: &[ReferenceContig]) -> HashMap<String, usize> {
    let mut map = HashMap::new();
    for (idx, contig) in contigs.iter().enumerate() {
        map.entry(canonical_key(&contig.name)).or_insert(idx);
    }
    map
}
