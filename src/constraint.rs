//! Per-span decoding constraints.
//!
//! A `ConstraintSpan` pins down what the chart may build over one source
//! span. RULE entries become manual axioms; LHS/RHS entries act as filters
//! on every grammar rule instantiated over exactly that span; a *hard* span
//! additionally suppresses all non-manual additions in every enclosed cell
//! and zeroes the feature values of its own manual rules.
//!
//! Constraints arrive as plain strings and are interned once, at seeding,
//! into the id-level `ConstraintTable` the hot loop consults.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::error::DecodeError;
use crate::grammar::{Grammar, Rule, TargetTok};
use crate::symbol::{Sym, SymbolTable};

#[derive(Debug, Clone)]
pub enum ConstraintRule {
    /// A complete manual translation for the span. Must have arity 0.
    Rule {
        lhs: String,
        source: Vec<String>,
        target: Vec<String>,
        features: Vec<f64>,
        arity: usize,
    },
    /// Keep only grammar rules with this LHS.
    Lhs { lhs: String },
    /// Keep only grammar rules with exactly this target side.
    Rhs { target: Vec<String> },
}

impl ConstraintRule {
    pub fn manual(
        lhs: &str,
        source: &[&str],
        target: &[&str],
        features: Vec<f64>,
        arity: usize,
    ) -> Self {
        Self::Rule {
            lhs: lhs.to_string(),
            source: source.iter().map(|s| s.to_string()).collect(),
            target: target.iter().map(|s| s.to_string()).collect(),
            features,
            arity,
        }
    }

    pub fn lhs(lhs: &str) -> Self {
        Self::Lhs { lhs: lhs.to_string() }
    }

    pub fn rhs(target: &[&str]) -> Self {
        Self::Rhs { target: target.iter().map(|s| s.to_string()).collect() }
    }
}

#[derive(Debug, Clone)]
pub struct ConstraintSpan {
    pub start: usize,
    pub end: usize,
    pub hard: bool,
    pub rules: Vec<ConstraintRule>,
}

impl ConstraintSpan {
    pub fn new(start: usize, end: usize, hard: bool, rules: Vec<ConstraintRule>) -> Self {
        Self { start, end, hard, rules }
    }
}

/// A manual axiom ready to seed: the span it covers plus the synthesized
/// arity-0 rule.
#[derive(Debug)]
pub(crate) struct ManualAxiom {
    pub start: usize,
    pub end: usize,
    pub rule: Rule,
}

/// Interned LHS/RHS acceptance sets for one exact span.
#[derive(Debug, Default)]
struct SpanFilter {
    lhs_accept: HashSet<Sym>,
    rhs_accept: Vec<Vec<Sym>>,
}

impl SpanFilter {
    fn accepts(&self, rule: &Rule) -> bool {
        if self.lhs_accept.contains(&rule.lhs) {
            return true;
        }
        self.rhs_accept.iter().any(|want| {
            want.len() == rule.target.len()
                && want
                    .iter()
                    .zip(&rule.target)
                    .all(|(w, t)| matches!(t, TargetTok::Word(sym) if sym == w))
        })
    }
}

/// Everything the hot loop needs to know about constraints, keyed by exact
/// span. Built once at seeding.
#[derive(Debug, Default)]
pub(crate) struct ConstraintTable {
    filters: HashMap<(usize, usize), SpanFilter>,
    hard_spans: Vec<(usize, usize)>,
}

impl ConstraintTable {
    /// Validate and intern the constraint spans. Returns the table plus the
    /// manual axioms to seed (features zeroed for hard spans).
    pub fn build(
        constraints: &[ConstraintSpan],
        symbols: &mut SymbolTable,
        synthetic: &Grammar,
        num_features: usize,
        sent_len: usize,
    ) -> Result<(Self, Vec<ManualAxiom>), DecodeError> {
        let mut table = Self::default();
        let mut axioms = Vec::new();
        for span in constraints {
            if span.start >= span.end || span.end > sent_len {
                return Err(DecodeError::constraint(&format!(
                    "span [{}, {}] does not fit a {}-word input",
                    span.start, span.end, sent_len
                )));
            }
            let mut filter = SpanFilter::default();
            let mut has_filter = false;
            let mut has_manual = false;
            for crule in &span.rules {
                match crule {
                    ConstraintRule::Rule { lhs, source, target, features, arity } => {
                        if *arity != 0 {
                            return Err(DecodeError::constraint(&format!(
                                "manual rule over [{}, {}] has arity {arity}; only arity 0 is supported",
                                span.start, span.end
                            )));
                        }
                        if features.len() != num_features {
                            return Err(DecodeError::constraint(&format!(
                                "manual rule over [{}, {}] carries {} feature values, expected {num_features}",
                                span.start, span.end, features.len()
                            )));
                        }
                        let features = if span.hard {
                            // hard spans are obeyed verbatim, at no cost
                            vec![0.0; num_features]
                        } else {
                            features.clone()
                        };
                        let lhs = symbols.add_nonterminal(lhs);
                        let src: Vec<&str> = source.iter().map(String::as_str).collect();
                        let tgt: Vec<&str> = target.iter().map(String::as_str).collect();
                        let source = symbols.add_terminals(&src);
                        let target = symbols
                            .add_terminals(&tgt)
                            .into_iter()
                            .map(TargetTok::Word)
                            .collect();
                        let rule =
                            synthetic.construct_manual_rule(lhs, source, target, features, 0);
                        axioms.push(ManualAxiom { start: span.start, end: span.end, rule });
                        has_manual = true;
                    }
                    ConstraintRule::Lhs { lhs } => {
                        filter.lhs_accept.insert(symbols.add_nonterminal(lhs));
                        has_filter = true;
                    }
                    ConstraintRule::Rhs { target } => {
                        let tgt: Vec<&str> = target.iter().map(String::as_str).collect();
                        filter.rhs_accept.push(symbols.add_terminals(&tgt));
                        has_filter = true;
                    }
                }
            }
            if has_filter {
                debug!(
                    "constraint filter over ({}, {}): {} lhs / {} rhs entries",
                    span.start,
                    span.end,
                    filter.lhs_accept.len(),
                    filter.rhs_accept.len()
                );
                table.filters.insert((span.start, span.end), filter);
            }
            if span.hard && has_manual {
                table.hard_spans.push((span.start, span.end));
            }
        }
        Ok((table, axioms))
    }

    /// True if `(i, j)` lies inside some hard-rule span; such cells accept
    /// only the span's own manual axioms.
    pub fn contained_in_hard(&self, i: usize, j: usize) -> bool {
        self.hard_spans.iter().any(|&(s, e)| s <= i && j <= e)
    }

    /// Single-rule form of the span filter, for axioms and unary closure.
    pub fn accepts(&self, i: usize, j: usize, rule: &Rule) -> bool {
        match self.filters.get(&(i, j)) {
            Some(filter) => filter.accepts(rule),
            None => true,
        }
    }

    /// Keep the rules at least one LHS/RHS entry over exactly `(i, j)`
    /// accepts; pass everything through when the span is unconstrained.
    pub fn filter<'r>(&self, i: usize, j: usize, rules: &'r [Rule]) -> Vec<&'r Rule> {
        match self.filters.get(&(i, j)) {
            Some(filter) => rules.iter().filter(|r| filter.accepts(r)).collect(),
            None => rules.iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (SymbolTable, Grammar) {
        let mut tab = SymbolTable::new();
        let synthetic = Grammar::synthetic(&mut tab, "X");
        (tab, synthetic)
    }

    #[test]
    fn manual_rules_become_axioms_and_hard_spans_zero_features() {
        let (mut tab, synthetic) = setup();
        let spans = vec![ConstraintSpan::new(
            0,
            2,
            true,
            vec![ConstraintRule::manual("S", &["a", "b"], &["ab"], vec![5.0], 0)],
        )];
        let (table, axioms) = ConstraintTable::build(&spans, &mut tab, &synthetic, 1, 3).unwrap();
        assert_eq!(axioms.len(), 1);
        assert_eq!(axioms[0].rule.features, vec![0.0]);
        assert!(table.contained_in_hard(0, 1));
        assert!(table.contained_in_hard(1, 2));
        assert!(!table.contained_in_hard(0, 3));
    }

    #[test]
    fn arity_and_feature_length_are_validated() {
        let (mut tab, synthetic) = setup();
        let bad_arity = vec![ConstraintSpan::new(
            0,
            1,
            false,
            vec![ConstraintRule::manual("S", &["a"], &["a"], vec![0.0], 1)],
        )];
        assert!(matches!(
            ConstraintTable::build(&bad_arity, &mut tab, &synthetic, 1, 2),
            Err(DecodeError::MalformedConstraint(_))
        ));
        let bad_feats = vec![ConstraintSpan::new(
            0,
            1,
            false,
            vec![ConstraintRule::manual("S", &["a"], &["a"], vec![0.0, 0.0], 0)],
        )];
        assert!(matches!(
            ConstraintTable::build(&bad_feats, &mut tab, &synthetic, 1, 2),
            Err(DecodeError::MalformedConstraint(_))
        ));
    }

    #[test]
    fn lhs_and_rhs_entries_filter_rules() {
        let (mut tab, synthetic) = setup();
        let spans = vec![ConstraintSpan::new(
            0,
            1,
            false,
            vec![ConstraintRule::lhs("NP"), ConstraintRule::rhs(&["the", "cat"])],
        )];
        let (table, _) = ConstraintTable::build(&spans, &mut tab, &synthetic, 0, 2).unwrap();

        let np = tab.add_nonterminal("NP");
        let vp = tab.add_nonterminal("VP");
        let the = tab.add_terminal("the");
        let cat = tab.add_terminal("cat");

        let by_lhs = synthetic.construct_manual_rule(np, vec![the], vec![TargetTok::Word(the)], vec![], 0);
        let by_rhs = synthetic.construct_manual_rule(
            vp,
            vec![the],
            vec![TargetTok::Word(the), TargetTok::Word(cat)],
            vec![],
            0,
        );
        let neither =
            synthetic.construct_manual_rule(vp, vec![the], vec![TargetTok::Word(cat)], vec![], 0);

        assert!(table.accepts(0, 1, &by_lhs));
        assert!(table.accepts(0, 1, &by_rhs));
        assert!(!table.accepts(0, 1, &neither));
        // a different span is unconstrained
        assert!(table.accepts(1, 2, &neither));
    }
}
