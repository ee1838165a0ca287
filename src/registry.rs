//! SQLite-backed registry of genotyping arrays, studies and array variants.
//!
//! Constraint violations raised while registering a study are classified by
//! constraint identity: the SQLite extended result code for the study name
//! key, and the foreign key ids reported by `PRAGMA foreign_key_check` for the
//! array and parent references.

use std::path::Path;

use rusqlite::{
    Connection, ErrorCode, OptionalExtension, Transaction, ffi, params, types::Type,
};
use thiserror::Error;

use crate::loader::{VariantBatch, VariantCall, VariantStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS GenotypingArray (
    name TEXT NOT NULL PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS Study (
    name TEXT NOT NULL PRIMARY KEY,
    parent TEXT REFERENCES Study (name) DEFERRABLE INITIALLY DEFERRED,
    genotyping_array TEXT NOT NULL
        REFERENCES GenotypingArray (name) DEFERRABLE INITIALLY DEFERRED
);

CREATE TABLE IF NOT EXISTS ArrayVariant (
    genotyping_array TEXT NOT NULL REFERENCES GenotypingArray (name),
    chromosome TEXT NOT NULL,
    position INTEGER NOT NULL CHECK (position > 0),
    reference TEXT NOT NULL,
    alternative TEXT
);

CREATE INDEX IF NOT EXISTS ArrayVariantLocus
    ON ArrayVariant (genotyping_array, chromosome, position);
";

const INSERT_VARIANT: &str = "INSERT INTO ArrayVariant
    (genotyping_array, chromosome, position, reference, alternative)
    VALUES (?1, ?2, ?3, ?4, ?5)";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("no open batch transaction to commit")]
    NoTransaction,
    #[error("unexpected foreign key violation on {table}.{column}")]
    UnclassifiedForeignKey { table: String, column: String },
}

/// Study registration failures. Every variant except `Registry` is a
/// classified constraint violation.
#[derive(Debug, Error)]
pub enum StudyError {
    #[error("a study named '{0}' already exists")]
    DuplicateStudy(String),
    #[error("genotyping array '{0}' does not exist")]
    UnknownArray(String),
    #[error("parent study '{0}' does not exist")]
    UnknownParentStudy(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl StudyError {
    pub fn is_classified(&self) -> bool {
        !matches!(self, Self::Registry(_))
    }
}

impl From<rusqlite::Error> for StudyError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Registry(err.into())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArrayRegistration {
    Created,
    AlreadyExists,
}

// Constraints on the Study table a registration can violate.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
enum StudyConstraint {
    ArrayReference,
    ParentReference,
}

impl StudyConstraint {
    fn from_column(column: &str) -> Option<Self> {
        match column {
            "genotyping_array" => Some(Self::ArrayReference),
            "parent" => Some(Self::ParentReference),
            _ => None,
        }
    }
}

/// A storage session over one database connection.
pub struct Registry {
    conn: Connection,
}

impl Registry {
    /// Open (or create) a registry database file and make sure the schema exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let conn = Connection::open(path.as_ref())?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, RegistryError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, RegistryError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Register an array unless one with that name is already present.
    ///
    /// The existence check and the insert are not atomic; a concurrent run
    /// inserting the same name makes this call fail with a database error.
    pub fn register_array(&mut self, name: &str) -> Result<ArrayRegistration, RegistryError> {
        if self.array_exists(name)? {
            tracing::info!("Already an array named {name} in the database");
            return Ok(ArrayRegistration::AlreadyExists);
        }

        self.insert_array(name)?;
        tracing::info!(array = name, "registered genotyping array");
        Ok(ArrayRegistration::Created)
    }

    fn insert_array(&mut self, name: &str) -> Result<(), RegistryError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO GenotypingArray (name) VALUES (?1)",
            params![name],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Register a study genotyped on `array_name`, optionally under `parent`.
    pub fn register_study(
        &mut self,
        name: &str,
        parent: Option<&str>,
        array_name: &str,
    ) -> Result<(), StudyError> {
        // A study cannot be its own parent; the deferred key would accept it.
        if parent == Some(name) {
            return Err(StudyError::UnknownParentStudy(name.to_string()));
        }

        let tx = self.conn.transaction()?;

        let inserted = tx.execute(
            "INSERT INTO Study (name, parent, genotyping_array) VALUES (?1, ?2, ?3)",
            params![name, parent, array_name],
        );
        if let Err(err) = inserted {
            // The name is the only key on Study.
            if is_key_violation(&err) {
                return Err(StudyError::DuplicateStudy(name.to_string()));
            }
            return Err(err.into());
        }

        let rowid = tx.last_insert_rowid();
        let violated = violated_study_constraints(&tx, rowid)?;
        match violated.first() {
            Some(StudyConstraint::ArrayReference) => {
                Err(StudyError::UnknownArray(array_name.to_string()))
            }
            Some(StudyConstraint::ParentReference) => Err(StudyError::UnknownParentStudy(
                parent.unwrap_or_default().to_string(),
            )),
            None => {
                tx.commit()?;
                tracing::info!(study = name, array = array_name, "registered study");
                Ok(())
            }
        }
    }

    pub fn array_exists(&self, name: &str) -> Result<bool, RegistryError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(name) FROM GenotypingArray WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn study_exists(&self, name: &str) -> Result<bool, RegistryError> {
        Ok(self.study_parent(name)?.is_some())
    }

    /// `None` if the study does not exist, otherwise its parent (if any).
    pub fn study_parent(&self, name: &str) -> Result<Option<Option<String>>, RegistryError> {
        let parent = self
            .conn
            .query_row(
                "SELECT parent FROM Study WHERE name = ?1",
                params![name],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(parent)
    }

    pub fn variant_count(&self, array_name: &str) -> Result<u64, RegistryError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM ArrayVariant WHERE genotyping_array = ?1",
            params![array_name],
            |row| non_negative(row.get(0)?, 0),
        )?;
        Ok(count)
    }

    /// Stored variants of an array in insertion order.
    pub fn variants(&self, array_name: &str) -> Result<Vec<VariantCall>, RegistryError> {
        let mut stmt = self.conn.prepare(
            "SELECT chromosome, position, reference, alternative
             FROM ArrayVariant
             WHERE genotyping_array = ?1
             ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![array_name], |row| {
            Ok(VariantCall {
                chromosome: row.get(0)?,
                position: non_negative(row.get(1)?, 1)?,
                reference: row.get(2)?,
                alternate: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn insert_variant_rows(
        &self,
        batch: &VariantBatch,
        array_name: &str,
    ) -> Result<(), RegistryError> {
        let mut insert = self.conn.prepare_cached(INSERT_VARIANT)?;
        for row in batch.iter() {
            insert.execute(params![
                array_name,
                row.chromosome,
                row.position,
                row.reference,
                row.alternate
            ])?;
        }
        Ok(())
    }
}

impl VariantStore for Registry {
    fn bulk_insert_variants(
        &mut self,
        batch: &VariantBatch,
        array_name: &str,
    ) -> Result<(), RegistryError> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
        }

        if let Err(err) = self.insert_variant_rows(batch, array_name) {
            if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %rollback, "failed to roll back variant batch");
            }
            return Err(err);
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), RegistryError> {
        if self.conn.is_autocommit() {
            return Err(RegistryError::NoTransaction);
        }
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }
}

fn non_negative(value: i64, column: usize) -> rusqlite::Result<u64> {
    u64::try_from(value).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(column, Type::Integer, Box::new(err))
    })
}

fn is_key_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => {
            failure.code == ErrorCode::ConstraintViolation
                && matches!(
                    failure.extended_code,
                    ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_UNIQUE
                )
        }
        _ => false,
    }
}

// Foreign keys of the freshly inserted Study row that point nowhere, ordered
// array reference first.
fn violated_study_constraints(
    tx: &Transaction<'_>,
    rowid: i64,
) -> Result<Vec<StudyConstraint>, RegistryError> {
    let mut fk_ids = Vec::new();
    {
        let mut check = tx.prepare("PRAGMA foreign_key_check(Study)")?;
        let mut rows = check.query([])?;
        while let Some(row) = rows.next()? {
            let violating_row: Option<i64> = row.get(1)?;
            if violating_row == Some(rowid) {
                fk_ids.push(row.get::<_, i64>(3)?);
            }
        }
    }
    if fk_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut columns = Vec::new();
    {
        let mut list = tx.prepare("PRAGMA foreign_key_list(Study)")?;
        let mut rows = list.query([])?;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            if fk_ids.contains(&id) {
                columns.push(row.get::<_, String>(3)?);
            }
        }
    }

    let mut violated = Vec::with_capacity(columns.len());
    for column in columns {
        // Only reachable if Study gains a foreign key not listed in StudyConstraint.
        match StudyConstraint::from_column(&column) {
            Some(constraint) => violated.push(constraint),
            None => {
                return Err(RegistryError::UnclassifiedForeignKey {
                    table: String::from("Study"),
                    column,
                });
            }
        }
    }
    violated.sort();
    violated.dedup();
    Ok(violated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::open_in_memory().unwrap()
    }

    fn batch(rows: &[(&str, u64, &str, Option<&str>)]) -> VariantBatch {
        let mut batch = VariantBatch::default();
        for &(chromosome, position, reference, alternate) in rows {
            batch.push(VariantCall {
                chromosome: chromosome.to_string(),
                position,
                reference: reference.to_string(),
                alternate: alternate.map(str::to_string),
            });
        }
        batch
    }

    #[test]
    fn array_registration_is_idempotent() {
        let mut registry = registry();
        assert_eq!(
            registry.register_array("GSA").unwrap(),
            ArrayRegistration::Created
        );
        assert_eq!(
            registry.register_array("GSA").unwrap(),
            ArrayRegistration::AlreadyExists
        );
        let count: i64 = registry
            .conn
            .query_row("SELECT COUNT(*) FROM GenotypingArray", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn racing_array_insert_is_unclassified() {
        let mut registry = registry();
        registry.register_array("GSA").unwrap();
        // What a second process would hit after its existence check passed.
        let err = registry.insert_array("GSA").unwrap_err();
        assert!(matches!(err, RegistryError::Database(_)));
    }

    #[test]
    fn study_registration() {
        let mut registry = registry();
        registry.register_array("GSA").unwrap();
        registry.register_study("root", None, "GSA").unwrap();
        registry.register_study("child", Some("root"), "GSA").unwrap();

        assert!(registry.study_exists("root").unwrap());
        assert_eq!(
            registry.study_parent("child").unwrap(),
            Some(Some(String::from("root")))
        );
        assert_eq!(registry.study_parent("root").unwrap(), Some(None));
        assert_eq!(registry.study_parent("missing").unwrap(), None);
    }

    #[test]
    fn duplicate_study() {
        let mut registry = registry();
        registry.register_array("GSA").unwrap();
        registry.register_study("root", None, "GSA").unwrap();
        let err = registry.register_study("root", None, "GSA").unwrap_err();
        assert!(matches!(err, StudyError::DuplicateStudy(ref name) if name == "root"));
        assert!(err.is_classified());
    }

    #[test]
    fn unknown_array() {
        let mut registry = registry();
        let err = registry.register_study("root", None, "nope").unwrap_err();
        assert!(matches!(err, StudyError::UnknownArray(ref name) if name == "nope"));
        assert!(!registry.study_exists("root").unwrap());
    }

    #[test]
    fn unknown_parent_study() {
        let mut registry = registry();
        registry.register_array("GSA").unwrap();
        let err = registry
            .register_study("child", Some("ghost"), "GSA")
            .unwrap_err();
        assert!(matches!(err, StudyError::UnknownParentStudy(ref name) if name == "ghost"));
        assert!(!registry.study_exists("child").unwrap());
    }

    #[test]
    fn unknown_array_reported_before_unknown_parent() {
        let mut registry = registry();
        let err = registry
            .register_study("child", Some("ghost"), "nope")
            .unwrap_err();
        assert!(matches!(err, StudyError::UnknownArray(_)));
    }

    #[test]
    fn study_cannot_be_its_own_parent() {
        let mut registry = registry();
        registry.register_array("GSA").unwrap();
        let err = registry
            .register_study("loop", Some("loop"), "GSA")
            .unwrap_err();
        assert!(matches!(err, StudyError::UnknownParentStudy(ref name) if name == "loop"));
        assert!(!registry.study_exists("loop").unwrap());
    }

    #[test]
    fn unknown_foreign_key_is_not_classified() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE Curator (name TEXT NOT NULL PRIMARY KEY);
             CREATE TABLE Study (
                 name TEXT NOT NULL PRIMARY KEY,
                 parent TEXT REFERENCES Study (name) DEFERRABLE INITIALLY DEFERRED,
                 genotyping_array TEXT NOT NULL
                     REFERENCES GenotypingArray (name) DEFERRABLE INITIALLY DEFERRED,
                 curator TEXT NOT NULL DEFAULT 'nobody'
                     REFERENCES Curator (name) DEFERRABLE INITIALLY DEFERRED
             );",
        )
        .unwrap();
        let mut registry = Registry::from_connection(conn).unwrap();
        registry.register_array("GSA").unwrap();

        let err = registry.register_study("s", None, "GSA").unwrap_err();
        assert!(!err.is_classified());
        assert!(matches!(
            err,
            StudyError::Registry(RegistryError::UnclassifiedForeignKey { ref column, .. })
                if column == "curator"
        ));
        assert!(!registry.study_exists("s").unwrap());
    }

    #[test]
    fn negative_integers_fail_conversion() {
        assert_eq!(non_negative(7, 1).unwrap(), 7);
        assert!(matches!(
            non_negative(-1, 1),
            Err(rusqlite::Error::FromSqlConversionFailure(1, Type::Integer, _))
        ));
    }

    #[test]
    fn failed_study_does_not_block_later_registrations() {
        let mut registry = registry();
        registry.register_array("GSA").unwrap();
        assert!(registry.register_study("a", Some("ghost"), "GSA").is_err());
        registry.register_study("a", None, "GSA").unwrap();
    }

    #[test]
    fn bulk_insert_and_commit() {
        let mut registry = registry();
        registry.register_array("GSA").unwrap();
        let rows = batch(&[("1", 10, "A", Some("G")), ("X", 20, "C", None)]);
        registry.bulk_insert_variants(&rows, "GSA").unwrap();
        registry.commit().unwrap();

        assert_eq!(registry.variant_count("GSA").unwrap(), 2);
        let stored = registry.variants("GSA").unwrap();
        assert_eq!(stored[0].alternate.as_deref(), Some("G"));
        assert_eq!(stored[1].chromosome, "X");
        assert_eq!(stored[1].alternate, None);
    }

    #[test]
    fn bulk_insert_is_atomic() {
        let mut registry = registry();
        registry.register_array("GSA").unwrap();
        // position 0 violates the CHECK constraint on the second row
        let rows = batch(&[("1", 10, "A", Some("G")), ("1", 0, "A", Some("G"))]);
        assert!(registry.bulk_insert_variants(&rows, "GSA").is_err());
        assert!(matches!(
            registry.commit(),
            Err(RegistryError::NoTransaction)
        ));
        assert_eq!(registry.variant_count("GSA").unwrap(), 0);
    }

    #[test]
    fn bulk_insert_for_unknown_array_fails() {
        let mut registry = registry();
        let rows = batch(&[("1", 10, "A", Some("G"))]);
        assert!(registry.bulk_insert_variants(&rows, "nope").is_err());
        assert_eq!(registry.variant_count("nope").unwrap(), 0);
    }

    #[test]
    fn schema_creation_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.sqlite");
        {
            let mut registry = Registry::open(&path).unwrap();
            registry.register_array("GSA").unwrap();
        }
        let reopened = Registry::open(&path).unwrap();
        assert!(reopened.array_exists("GSA").unwrap());
    }
}
