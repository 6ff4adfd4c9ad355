//! Feature functions: the pluggable scorers consulted every time a rule is
//! instantiated against antecedent nodes.
//!
//! Each feature yields a transition cost, an optional outside estimate, and
//! an optional `FeatState` carried on the resulting node. States are what
//! keep two otherwise-equal nodes apart: the bin's equivalence signature is
//! the LHS plus every stateful feature's fingerprint. A real n-gram language
//! model is an external implementation of this same trait; the bundled
//! `TargetBoundary` feature reproduces its state-splitting behavior (boundary
//! words of the realized target) at zero cost so the core can be exercised
//! without one.

use crate::grammar::{Rule, TargetTok};
use crate::symbol::Sym;

/// Opaque per-feature dynamic state, fingerprinted into node signatures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FeatState(pub Vec<Sym>);

impl FeatState {
    /// Stable textual fingerprint used in node signatures.
    pub fn fingerprint(&self) -> String {
        let mut b = string_builder::Builder::default();
        for sym in &self.0 {
            b.append(format!("{}.", sym.id()));
        }
        b.string().unwrap_or_default()
    }
}

/// What one feature contributes to one rule application.
#[derive(Debug, Clone)]
pub struct Transition {
    pub cost: f64,
    /// Outside heuristic for the produced state (0 for stateless features).
    pub estimate: f64,
    pub state: Option<FeatState>,
}

impl Transition {
    pub fn stateless(cost: f64) -> Self {
        Self { cost, estimate: 0.0, state: None }
    }
}

pub trait FeatureFunction {
    fn name(&self) -> &'static str;

    fn stateful(&self) -> bool {
        false
    }

    /// Score one rule application. `ant_states` holds, per source slot, this
    /// feature's own state on the corresponding antecedent node.
    fn transition(&self, rule: &Rule, ant_states: &[Option<&FeatState>]) -> Transition;

    /// Cost applied once, when a node transits into the goal bin.
    fn final_cost(&self, _state: Option<&FeatState>) -> f64 {
        0.0
    }

    /// Antecedent-free estimate used to pre-sort rule collections.
    fn rule_estimate(&self, _rule: &Rule) -> f64 {
        0.0
    }
}

pub type Models = Vec<Box<dyn FeatureFunction>>;

/// Weighted read of one column of the rule's feature vector (the usual
/// translation-model feature).
#[derive(Debug, Clone)]
pub struct RuleFeature {
    column: usize,
    weight: f64,
}

impl RuleFeature {
    pub fn new(column: usize, weight: f64) -> Self {
        Self { column, weight }
    }
}

impl FeatureFunction for RuleFeature {
    fn name(&self) -> &'static str {
        "rule-feature"
    }

    fn transition(&self, rule: &Rule, _ant_states: &[Option<&FeatState>]) -> Transition {
        Transition::stateless(self.weight * rule.features.get(self.column).copied().unwrap_or(0.0))
    }

    fn rule_estimate(&self, rule: &Rule) -> f64 {
        self.weight * rule.features.get(self.column).copied().unwrap_or(0.0)
    }
}

/// Per-target-word penalty, counting only the words a rule itself emits.
#[derive(Debug, Clone)]
pub struct WordPenalty {
    weight: f64,
}

impl WordPenalty {
    pub fn new(weight: f64) -> Self {
        Self { weight }
    }

    fn own_words(rule: &Rule) -> usize {
        rule.target.iter().filter(|t| matches!(t, TargetTok::Word(_))).count()
    }
}

impl FeatureFunction for WordPenalty {
    fn name(&self) -> &'static str {
        "word-penalty"
    }

    fn transition(&self, rule: &Rule, _ant_states: &[Option<&FeatState>]) -> Transition {
        Transition::stateless(self.weight * Self::own_words(rule) as f64)
    }

    fn rule_estimate(&self, rule: &Rule) -> f64 {
        self.weight * Self::own_words(rule) as f64
    }
}

/// Flat charge for synthesized OOV rules, so an uncovered word never
/// outranks a real translation just because its rule carries no features.
/// Keys on the `is_oov` tag rather than the rule's content, so it applies
/// whether the word passes through verbatim or is rewritten to the
/// `<untranslated>` marker.
#[derive(Debug, Clone)]
pub struct OovPenalty {
    weight: f64,
}

impl OovPenalty {
    pub fn new(weight: f64) -> Self {
        Self { weight }
    }
}

impl FeatureFunction for OovPenalty {
    fn name(&self) -> &'static str {
        "oov-penalty"
    }

    fn transition(&self, rule: &Rule, _ant_states: &[Option<&FeatState>]) -> Transition {
        if rule.is_oov {
            Transition::stateless(self.weight)
        } else {
            Transition::stateless(0.0)
        }
    }
}

/// Stateful, zero-cost feature carrying the boundary words of the realized
/// target string. Splits node signatures exactly where an n-gram LM would.
#[derive(Debug, Clone, Default)]
pub struct TargetBoundary;

impl TargetBoundary {
    pub fn new() -> Self {
        Self
    }
}

impl FeatureFunction for TargetBoundary {
    fn name(&self) -> &'static str {
        "target-boundary"
    }

    fn stateful(&self) -> bool {
        true
    }

    fn transition(&self, rule: &Rule, ant_states: &[Option<&FeatState>]) -> Transition {
        // Boundary of a concatenation only needs each unit's own boundary.
        let mut first: Option<Sym> = None;
        let mut last: Option<Sym> = None;
        let mut take = |sym: Sym| {
            if first.is_none() {
                first = Some(sym);
            }
            last = Some(sym);
        };
        for tok in &rule.target {
            match tok {
                TargetTok::Word(w) => take(*w),
                TargetTok::Slot(k) => {
                    if let Some(Some(state)) = ant_states.get(*k) {
                        for &sym in &state.0 {
                            take(sym);
                        }
                    }
                }
            }
        }
        let boundary = match (first, last) {
            (Some(f), Some(l)) if f != l => vec![f, l],
            (Some(f), _) => vec![f],
            _ => Vec::new(),
        };
        Transition { cost: 0.0, estimate: 0.0, state: Some(FeatState(boundary)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{SrcTok, TgtTok, GrammarBuilder};
    use crate::symbol::SymbolTable;

    fn one_rule(tab: &mut SymbolTable) -> Rule {
        // built through the builder so interning matches production paths
        let models: Models = vec![];
        let g = GrammarBuilder::new(tab, "t")
            .rule(
                "S",
                &[SrcTok::Nt("X"), SrcTok::T("de")],
                &[TgtTok::W("of"), TgtTok::Sl(0), TgtTok::W("all")],
                vec![2.0],
            )
            .into_grammar(&models);
        let x = tab.add_nonterminal("X");
        let de = tab.add_terminal("de");
        g.trie_root()
            .match_one(x)
            .and_then(|t| t.match_one(de))
            .and_then(|t| t.rules())
            .map(|rc| rc.sorted_rules()[0].clone())
            .unwrap()
    }

    #[test]
    fn rule_feature_reads_its_column() {
        let mut tab = SymbolTable::new();
        let rule = one_rule(&mut tab);
        let ff = RuleFeature::new(0, 0.5);
        let t = ff.transition(&rule, &[None]);
        assert_eq!(t.cost, 1.0);
        assert!(t.state.is_none());
    }

    #[test]
    fn word_penalty_counts_own_words_only() {
        let mut tab = SymbolTable::new();
        let rule = one_rule(&mut tab);
        let ff = WordPenalty::new(1.0);
        assert_eq!(ff.transition(&rule, &[None]).cost, 2.0);
    }

    #[test]
    fn oov_penalty_keys_on_the_rule_tag() {
        let mut tab = SymbolTable::new();
        let synthetic = crate::grammar::Grammar::synthetic(&mut tab, "X");
        let word = tab.add_terminal("zzz");
        let marker = tab.untranslated();
        let ff = OovPenalty::new(2.5);

        // charged whether the OOV passes through or is rewritten to the marker
        let pass_through = synthetic.construct_oov_rule(0, word, word);
        assert_eq!(ff.transition(&pass_through, &[]).cost, 2.5);
        let marked = synthetic.construct_oov_rule(0, word, marker);
        assert_eq!(ff.transition(&marked, &[]).cost, 2.5);

        // a grammar rule that happens to copy its word through is not an OOV
        let copyish = Rule { is_oov: false, ..pass_through.clone() };
        assert_eq!(ff.transition(&copyish, &[]).cost, 0.0);
    }

    #[test]
    fn target_boundary_splices_antecedent_boundaries() {
        let mut tab = SymbolTable::new();
        let rule = one_rule(&mut tab);
        let of = tab.add_terminal("of");
        let all = tab.add_terminal("all");
        let cat = tab.add_terminal("cat");
        let hat = tab.add_terminal("hat");

        let ff = TargetBoundary::new();
        let ant = FeatState(vec![cat, hat]);
        let t = ff.transition(&rule, &[Some(&ant)]);
        // realized: of <cat .. hat> all
        assert_eq!(t.state.unwrap().0, vec![of, all]);
        assert_eq!(t.cost, 0.0);

        // fingerprints of different boundaries must differ
        assert_ne!(FeatState(vec![of, all]).fingerprint(), FeatState(vec![of, hat]).fingerprint());
    }
}
