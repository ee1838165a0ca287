//! Bounded, transactional batching of resolved variants.

use crate::registry::RegistryError;

/// Records accumulated before a batch is written and committed.
pub const BATCH_SIZE: usize = 100_000;

/// A resolved manifest probe ready for storage.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VariantCall {
    pub chromosome: String,
    pub position: u64,
    pub reference: String,
    /// `None` when the call could not be placed on either strand.
    pub alternate: Option<String>,
}

/// Borrowed view of one row of a [`VariantBatch`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VariantRow<'a> {
    pub chromosome: &'a str,
    pub position: u64,
    pub reference: &'a str,
    pub alternate: Option<&'a str>,
}

/// Four parallel columns of equal length.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VariantBatch {
    chromosomes: Vec<String>,
    positions: Vec<u64>,
    references: Vec<String>,
    alternatives: Vec<Option<String>>,
}

impl VariantBatch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            chromosomes: Vec::with_capacity(capacity),
            positions: Vec::with_capacity(capacity),
            references: Vec::with_capacity(capacity),
            alternatives: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, call: VariantCall) {
        self.chromosomes.push(call.chromosome);
        self.positions.push(call.position);
        self.references.push(call.reference);
        self.alternatives.push(call.alternate);
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn clear(&mut self) {
        self.chromosomes.clear();
        self.positions.clear();
        self.references.clear();
        self.alternatives.clear();
    }

    pub fn chromosomes(&self) -> &[String] {
        &self.chromosomes
    }

    pub fn positions(&self) -> &[u64] {
        &self.positions
    }

    pub fn references(&self) -> &[String] {
        &self.references
    }

    pub fn alternatives(&self) -> &[Option<String>] {
        &self.alternatives
    }

    pub fn iter(&self) -> impl Iterator<Item = VariantRow<'_>> {
        self.chromosomes
            .iter()
            .zip(&self.positions)
            .zip(&self.references)
            .zip(&self.alternatives)
            .map(|(((chromosome, &position), reference), alternate)| VariantRow {
                chromosome,
                position,
                reference,
                alternate: alternate.as_deref(),
            })
    }
}

/// Storage session able to take whole batches of variants.
pub trait VariantStore {
    /// Insert every row of `batch` for `array_name`. A failure leaves none of
    /// the batch visible.
    fn bulk_insert_variants(
        &mut self,
        batch: &VariantBatch,
        array_name: &str,
    ) -> Result<(), RegistryError>;

    /// Make the rows inserted since the last commit durable.
    fn commit(&mut self) -> Result<(), RegistryError>;
}

/// Totals reported by [`BatchLoader::finish`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LoadStats {
    pub batches: usize,
    pub records: usize,
}

/// Owns the in-flight batch for one array and flushes it every
/// [`BATCH_SIZE`] records.
pub struct BatchLoader<'s, S> {
    store: &'s mut S,
    array_name: String,
    batch: VariantBatch,
    stats: LoadStats,
}

impl<'s, S> BatchLoader<'s, S>
where
    S: VariantStore,
{
    pub fn new(store: &'s mut S, array_name: impl Into<String>) -> Self {
        Self {
            store,
            array_name: array_name.into(),
            batch: VariantBatch::with_capacity(BATCH_SIZE),
            stats: LoadStats::default(),
        }
    }

    pub fn array_name(&self) -> &str {
        &self.array_name
    }

    /// Records waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    pub fn push(&mut self, call: VariantCall) -> Result<(), RegistryError> {
        self.batch.push(call);
        if self.batch.len() >= BATCH_SIZE {
            self.flush()?;
        }
        Ok(())
    }

    /// Flush whatever is left and return the totals.
    pub fn finish(mut self) -> Result<LoadStats, RegistryError> {
        if !self.batch.is_empty() {
            self.flush()?;
        }
        Ok(self.stats)
    }

    fn flush(&mut self) -> Result<(), RegistryError> {
        self.store
            .bulk_insert_variants(&self.batch, &self.array_name)?;
        self.store.commit()?;

        self.stats.batches += 1;
        self.stats.records += self.batch.len();
        tracing::info!(
            array = %self.array_name,
            batch = self.stats.batches,
            "Processed {} markers",
            self.stats.records
        );

        self.batch.clear();
        Ok(())
    }
}
