//! Strand-aware resolution of manifest genotype calls.
//!
//! Array manifests report each probe as a pair of allele codes (e.g. `[A/G]`)
//! on whichever strand the probe was designed against. Resolution compares the
//! codes, and their complements, against the reference base to decide which
//! code is the alternate allele on the forward strand.

use thiserror::Error;

/// Allele code used by manifests for a deletion.
pub const DELETION: &str = "D";

/// Alternate allele stored for insertion/deletion probes.
pub const INDEL: &str = "-";

/// Complement of a single forward-strand base.
pub fn complement(base: char) -> Option<char> {
    match base {
        'A' => Some('T'),
        'T' => Some('A'),
        'C' => Some('G'),
        'G' => Some('C'),
        _ => None,
    }
}

/// Complement of a one-base allele code. Longer codes have none.
pub fn complement_allele(allele: &str) -> Option<String> {
    let mut chars = allele.chars();
    match (chars.next(), chars.next()) {
        (Some(base), None) => complement(base).map(String::from),
        _ => None,
    }
}

/// The two allele codes of a manifest call with their framing removed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GenotypeCall {
    pub first: String,
    pub second: String,
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum GenotypeError {
    #[error("expected two '/'-separated allele codes in '{0}'")]
    AlleleCount(String),
}

impl GenotypeCall {
    /// Split a call such as `[A/G]` into its allele codes.
    ///
    /// One character is dropped from the start of the first token and one
    /// from the end of the second, whatever they are.
    pub fn parse(raw: &str) -> Result<Self, GenotypeError> {
        let mut tokens = raw.split('/');
        let (Some(first), Some(second), None) = (tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(GenotypeError::AlleleCount(raw.to_string()));
        };

        let first = {
            let mut chars = first.chars();
            chars.next();
            chars.as_str().to_string()
        };
        let second = {
            let mut chars = second.chars();
            chars.next_back();
            chars.as_str().to_string()
        };

        Ok(Self { first, second })
    }

    pub fn is_indel(&self) -> bool {
        self.first == DELETION || self.second == DELETION
    }
}

/// Which resolution rule produced the alternate allele.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResolutionRule {
    Indel,
    FirstIsReference,
    FirstComplementIsReference,
    SecondIsReference,
    SecondComplementIsReference,
    Unresolved,
}

impl ResolutionRule {
    pub fn is_complemented(self) -> bool {
        matches!(
            self,
            Self::FirstComplementIsReference | Self::SecondComplementIsReference
        )
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Resolution {
    pub reference: String,
    pub alternate: Option<String>,
    pub rule: ResolutionRule,
}

/// Resolve a call to a REF/ALT pair given the reference base at its position.
///
/// The first matching rule wins: deletion code, first allele on the forward
/// strand, first allele on the reverse strand, then the same two checks for
/// the second allele. A call matching none of them keeps a `None` alternate.
pub fn resolve(call: &GenotypeCall, reference_base: char) -> Resolution {
    let reference = reference_base.to_ascii_uppercase().to_string();

    let (alternate, rule) = if call.is_indel() {
        (Some(INDEL.to_string()), ResolutionRule::Indel)
    } else if call.first == reference {
        (Some(call.second.clone()), ResolutionRule::FirstIsReference)
    } else if let Some(alternate) = complemented_match(&call.first, &call.second, &reference) {
        (Some(alternate), ResolutionRule::FirstComplementIsReference)
    } else if call.second == reference {
        (Some(call.first.clone()), ResolutionRule::SecondIsReference)
    } else if let Some(alternate) = complemented_match(&call.second, &call.first, &reference) {
        (Some(alternate), ResolutionRule::SecondComplementIsReference)
    } else {
        (None, ResolutionRule::Unresolved)
    };

    Resolution {
        reference,
        alternate,
        rule,
    }
}

// Both codes need a complement for the reverse-strand rule to apply.
fn complemented_match(candidate: &str, other: &str, reference: &str) -> Option<String> {
    let flipped = complement_allele(candidate)?;
    if flipped != reference {
        return None;
    }
    complement_allele(other)
}

/// Reference contig queried for a canonical chromosome label.
pub fn reference_contig(chromosome: &str) -> String {
    match chromosome {
        "XY" => String::from("chrX"),
        other => format!("chr{other}"),
    }
}
