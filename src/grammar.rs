//! SCFG grammars and their source-side tries.
//!
//! A `Rule` pairs a source RHS (terminals and nonterminal slots, as plain
//! `Sym`s) with a target RHS (`TargetTok::Word` or `TargetTok::Slot`, slots
//! numbered in source order). Rules sharing a source RHS prefix share a path
//! in the grammar trie; the `RuleCollection` at a trie node holds every rule
//! whose source side ends there, pre-sorted by intrinsic score so cube
//! pruning can treat it as a sorted axis.
//!
//! Grammars are built through the chained `GrammarBuilder`, which interns
//! all names through the shared `SymbolTable`:
//!
//! ```ignore
//! let grammar = GrammarBuilder::new(&mut symbols, "toy")
//!     .rule("X", &[T("gato")], &[W("cat")], vec![0.5])
//!     .rule("S", &[Nt("X"), Nt("X")], &[Sl(0), Sl(1)], vec![0.0])
//!     .into_grammar(&models);
//! ```

use std::collections::HashMap;
use smol_str::SmolStr;

use crate::models::FeatureFunction;
use crate::symbol::{Sym, SymbolTable};

/// One token of a rule's target side. Slots are indexed by the order the
/// matching nonterminals appear on the source side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetTok {
    Word(Sym),
    Slot(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub lhs: Sym,
    pub source: Vec<Sym>,
    pub target: Vec<TargetTok>,
    /// Number of nonterminal slots on the source side.
    pub arity: usize,
    /// Fixed-length feature values, one column per configured feature function.
    pub features: Vec<f64>,
    /// Rule-intrinsic cost used only for sort order inside a collection.
    pub score: f64,
    /// Set only on rules synthesized for uncovered lattice terminals, so
    /// features can charge them without inspecting the target side.
    pub is_oov: bool,
}

impl Rule {
    /// Human-readable form for logs and the demo driver.
    pub fn render(&self, symbols: &SymbolTable) -> String {
        let mut b = string_builder::Builder::default();
        b.append(symbols.word(self.lhs));
        b.append(" ->");
        for &s in &self.source {
            b.append(" ");
            b.append(symbols.word(s));
        }
        b.append(" /");
        for t in &self.target {
            b.append(" ");
            match t {
                TargetTok::Word(w) => b.append(symbols.word(*w)),
                TargetTok::Slot(k) => b.append(format!("~{k}")),
            }
        }
        b.string().unwrap_or_default()
    }
}

/// All rules sitting at one trie node. They share a source RHS, hence an
/// arity; `sorted_rules` is ascending by intrinsic score.
#[derive(Debug, Clone, Default)]
pub struct RuleCollection {
    arity: usize,
    rules: Vec<Rule>,
}

impl RuleCollection {
    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn sorted_rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn sort(&mut self) {
        self.rules
            .sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
    }
}

/// Trie over source RHS symbols, rooted per grammar.
#[derive(Debug, Default)]
pub struct TrieNode {
    children: HashMap<Sym, TrieNode>,
    rules: Option<RuleCollection>,
}

impl TrieNode {
    /// Follow one source symbol (terminal or nonterminal) down the trie.
    pub fn match_one(&self, sym: Sym) -> Option<&TrieNode> {
        self.children.get(&sym)
    }

    pub fn rules(&self) -> Option<&RuleCollection> {
        self.rules.as_ref()
    }

    fn insert(&mut self, rule: Rule) {
        let mut node = self;
        for &sym in &rule.source {
            node = node.children.entry(sym).or_default();
        }
        let rc = node.rules.get_or_insert_with(|| RuleCollection {
            arity: rule.arity,
            rules: Vec::new(),
        });
        debug_assert_eq!(rc.arity, rule.arity);
        rc.rules.push(rule);
    }

    fn sort_all(&mut self) {
        if let Some(rc) = self.rules.as_mut() {
            rc.sort();
        }
        for child in self.children.values_mut() {
            child.sort_all();
        }
    }
}

#[derive(Debug)]
pub struct Grammar {
    name: SmolStr,
    root: TrieNode,
    /// Widest span this grammar may apply to; 0 means unlimited.
    span_limit: usize,
    /// LHS used for synthesized OOV rules.
    oov_lhs: Sym,
    num_rules: usize,
}

impl Grammar {
    /// An empty grammar used only to synthesize OOV and manual rules, so
    /// synthesized rules are never coupled to whichever real grammar happens
    /// to be configured first.
    pub fn synthetic(symbols: &mut SymbolTable, oov_lhs: &str) -> Self {
        let oov_lhs = symbols.add_nonterminal(oov_lhs);
        Self {
            name: SmolStr::new("synthetic"),
            root: TrieNode::default(),
            span_limit: 0,
            oov_lhs,
            num_rules: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trie_root(&self) -> &TrieNode {
        &self.root
    }

    pub fn num_rules(&self) -> usize {
        self.num_rules
    }

    /// Whether this grammar is allowed to instantiate rules over `(i, j)`.
    pub fn has_rule_for_span(&self, i: usize, j: usize, _n: usize) -> bool {
        self.span_limit == 0 || j - i <= self.span_limit
    }

    /// Synthesize the pass-through rule for a lattice terminal the grammars
    /// don't cover. Feature transition values are all zero.
    pub fn construct_oov_rule(&self, num_features: usize, source: Sym, target: Sym) -> Rule {
        Rule {
            lhs: self.oov_lhs,
            source: vec![source],
            target: vec![TargetTok::Word(target)],
            arity: 0,
            features: vec![0.0; num_features],
            score: 0.0,
            is_oov: true,
        }
    }

    /// Synthesize an axiom rule supplied by a constraint span.
    pub fn construct_manual_rule(
        &self,
        lhs: Sym,
        source: Vec<Sym>,
        target: Vec<TargetTok>,
        features: Vec<f64>,
        arity: usize,
    ) -> Rule {
        Rule { lhs, source, target, arity, features, score: 0.0, is_oov: false }
    }
}

/// Source-side builder tokens.
#[derive(Debug, Clone, Copy)]
pub enum SrcTok<'a> {
    /// terminal word
    T(&'a str),
    /// nonterminal slot
    Nt(&'a str),
}

/// Target-side builder tokens.
#[derive(Debug, Clone, Copy)]
pub enum TgtTok<'a> {
    /// target word
    W(&'a str),
    /// reference to source slot k
    Sl(usize),
}

/// Chained grammar construction; interns every name through the shared
/// symbol table as it goes.
pub struct GrammarBuilder<'s> {
    symbols: &'s mut SymbolTable,
    name: SmolStr,
    span_limit: usize,
    oov_lhs: SmolStr,
    rules: Vec<Rule>,
}

impl<'s> GrammarBuilder<'s> {
    pub fn new(symbols: &'s mut SymbolTable, name: &str) -> Self {
        Self {
            symbols,
            name: SmolStr::new(name),
            span_limit: 0,
            oov_lhs: SmolStr::new("X"),
            rules: Vec::new(),
        }
    }

    pub fn span_limit(mut self, limit: usize) -> Self {
        self.span_limit = limit;
        self
    }

    pub fn oov_lhs(mut self, name: &str) -> Self {
        self.oov_lhs = SmolStr::new(name);
        self
    }

    pub fn rule(mut self, lhs: &str, src: &[SrcTok], tgt: &[TgtTok], features: Vec<f64>) -> Self {
        let lhs = self.symbols.add_nonterminal(lhs);
        let mut source = Vec::with_capacity(src.len());
        let mut arity = 0;
        for tok in src {
            source.push(match tok {
                SrcTok::T(w) => self.symbols.add_terminal(w),
                SrcTok::Nt(n) => {
                    arity += 1;
                    self.symbols.add_nonterminal(n)
                }
            });
        }
        let target = tgt
            .iter()
            .map(|tok| match tok {
                TgtTok::W(w) => TargetTok::Word(self.symbols.add_terminal(w)),
                TgtTok::Sl(k) => TargetTok::Slot(*k),
            })
            .collect();
        self.rules.push(Rule { lhs, source, target, arity, features, score: 0.0, is_oov: false });
        self
    }

    /// Score every rule with the model bank, build the trie, and sort each
    /// collection ascending by score.
    pub fn into_grammar(self, models: &[Box<dyn FeatureFunction>]) -> Grammar {
        let oov_lhs = self.symbols.add_nonterminal(&self.oov_lhs);
        let num_rules = self.rules.len();
        let mut root = TrieNode::default();
        for mut rule in self.rules {
            rule.score = models.iter().map(|m| m.rule_estimate(&rule)).sum();
            root.insert(rule);
        }
        root.sort_all();
        Grammar { name: self.name, root, span_limit: self.span_limit, oov_lhs, num_rules }
    }
}

#[cfg(test)]
mod tests {
    use super::SrcTok::{Nt, T};
    use super::TgtTok::{Sl, W};
    use super::*;
    use crate::models::RuleFeature;

    fn models() -> Vec<Box<dyn FeatureFunction>> {
        vec![Box::new(RuleFeature::new(0, 1.0))]
    }

    #[test]
    fn trie_paths_follow_source_sides() {
        let mut tab = SymbolTable::new();
        let g = GrammarBuilder::new(&mut tab, "g")
            .rule("X", &[T("a")], &[W("a")], vec![1.0])
            .rule("X", &[T("a"), T("b")], &[W("ab")], vec![2.0])
            .rule("S", &[T("a"), Nt("X")], &[Sl(0)], vec![0.0])
            .into_grammar(&models());
        let a = tab.add_terminal("a");
        let b = tab.add_terminal("b");
        let x = tab.add_nonterminal("X");

        let after_a = g.trie_root().match_one(a).unwrap();
        assert_eq!(after_a.rules().unwrap().len(), 1);
        assert_eq!(after_a.rules().unwrap().arity(), 0);

        let after_ab = after_a.match_one(b).unwrap();
        assert_eq!(after_ab.rules().unwrap().len(), 1);

        let after_ax = after_a.match_one(x).unwrap();
        assert_eq!(after_ax.rules().unwrap().arity(), 1);

        assert!(g.trie_root().match_one(b).is_none());
    }

    #[test]
    fn collections_sort_by_model_score() {
        let mut tab = SymbolTable::new();
        let g = GrammarBuilder::new(&mut tab, "g")
            .rule("X", &[T("a")], &[W("uno")], vec![3.0])
            .rule("X", &[T("a")], &[W("dos")], vec![1.0])
            .rule("X", &[T("a")], &[W("tres")], vec![2.0])
            .into_grammar(&models());
        let a = tab.add_terminal("a");
        let rc = g.trie_root().match_one(a).unwrap().rules().unwrap();
        let scores: Vec<f64> = rc.sorted_rules().iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn span_limit_gates_wide_cells() {
        let mut tab = SymbolTable::new();
        let g = GrammarBuilder::new(&mut tab, "g")
            .span_limit(2)
            .rule("X", &[T("a")], &[W("a")], vec![0.0])
            .into_grammar(&models());
        assert!(g.has_rule_for_span(0, 2, 5));
        assert!(!g.has_rule_for_span(0, 3, 5));
        let unlimited = GrammarBuilder::new(&mut tab, "glue")
            .rule("S", &[Nt("X")], &[Sl(0)], vec![0.0])
            .into_grammar(&models());
        assert!(unlimited.has_rule_for_span(0, 5, 5));
    }
}
