#![doc = include_str!("../README.md")]

pub mod allele;
pub mod chromosome;
pub mod cli;
pub mod import;
pub mod loader;
pub mod manifest;
pub mod reference;
pub mod registry;
pub mod report;

pub use import::{ImportConfig, ImportError, ImportSummary, import_array, import_manifest};
pub use loader::{BATCH_SIZE, BatchLoader, VariantBatch, VariantCall, VariantStore};
pub use manifest::ManifestLayout;
pub use reference::{BaseLookup, ReferenceGenome};
pub use registry::{ArrayRegistration, Registry, RegistryError, StudyError};
