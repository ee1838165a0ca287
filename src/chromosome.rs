//! Chromosome label normalization for array manifests.

/// Canonical label used by manifests for probes without a genomic placement.
pub const UNPLACED: &str = "0";

/// Map a raw manifest chromosome token to its canonical label.
///
/// Numeric aliases (`23` to `26`) only match exactly, while `MT` and `YX` are
/// matched case-insensitively. Anything else is upper-cased.
pub fn normalize(raw: &str) -> String {
    if raw.eq_ignore_ascii_case("MT") || raw == "26" {
        return String::from("M");
    }
    if raw == "23" {
        return String::from("X");
    }
    if raw == "24" {
        return String::from("Y");
    }
    if raw.eq_ignore_ascii_case("YX") || raw == "25" {
        return String::from("XY");
    }
    raw.to_uppercase()
}

/// Whether a canonical label marks an unusable row.
pub fn is_unplaced(canonical: &str) -> bool {
    canonical == UNPLACED
}
