//! Decoder error kinds. Everything else that "fails" during chart expansion
//! (a rule that doesn't match, a pruned node) is normal operation and only
//! moves counters.

use std::fmt;

#[derive(Debug)]
pub enum DecodeError {
    /// The top cell holds no goal item: either no grammar derivation covers
    /// the lattice, or pruning was aggressive enough to remove them all.
    NoDerivation(String),
    /// A constraint span carried a rule the chart cannot seed.
    MalformedConstraint(String),
    /// The input lattice is cyclic, non-monotone, or otherwise unusable.
    LatticeInconsistency(String),
    /// The cancel flag was raised; no partial hypergraph is returned.
    Cancelled,
}

impl DecodeError {
    pub fn no_derivation(msg: &str) -> Self {
        Self::NoDerivation(msg.to_string())
    }
    pub fn constraint(msg: &str) -> Self {
        Self::MalformedConstraint(msg.to_string())
    }
    pub fn lattice(msg: &str) -> Self {
        Self::LatticeInconsistency(msg.to_string())
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDerivation(e) => write!(f, "NoDerivation: {e}"),
            Self::MalformedConstraint(e) => write!(f, "MalformedConstraint: {e}"),
            Self::LatticeInconsistency(e) => write!(f, "LatticeInconsistency: {e}"),
            Self::Cancelled => write!(f, "Cancelled: decode abandoned between cells"),
        }
    }
}

impl std::error::Error for DecodeError {}
