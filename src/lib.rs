//! chartbird: the chart-parsing core of a synchronous-CFG decoder.
//!
//! Given a source word lattice, weighted SCFG grammars indexed as tries, a
//! bank of feature functions, and optional per-span constraints, the chart
//! builds a packed hypergraph of every derivation whose source projection
//! covers the lattice, scored under the features and subject to pruning.
//!
//! The pieces, bottom up: a `SymbolTable` interning words and categories;
//! the `Lattice`; `Grammar` tries with pre-sorted `RuleCollection`s;
//! `FeatureFunction`s producing costs and equivalence states; per-span
//! `Bin`s hosting `HGNode`s in a shared arena; per-grammar `DotChart`s
//! advancing partial rule matches; and the `Chart` driver tying it together
//! with a CKY outer loop and a goal transition. See `chart::parse` for the
//! one-call entry point.

pub mod builtin_grammars;
pub mod cell;
pub mod chart;
pub mod config;
pub mod constraint;
pub mod dotchart;
pub mod error;
pub mod grammar;
pub mod hypergraph;
pub mod lattice;
pub mod models;
pub mod symbol;
