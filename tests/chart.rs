//! End-to-end decoding scenarios driving the public library surface.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chartbird::builtin_grammars::toy_translation;
use chartbird::chart::parse;
use chartbird::config::DecoderConfig;
use chartbird::constraint::{ConstraintRule, ConstraintSpan};
use chartbird::error::DecodeError;
use chartbird::grammar::GrammarBuilder;
use chartbird::grammar::SrcTok::{Nt, T};
use chartbird::grammar::TgtTok::{Sl, W};
use chartbird::hypergraph::HyperGraph;
use chartbird::lattice::Lattice;
use chartbird::models::{Models, OovPenalty, RuleFeature};
use chartbird::symbol::{SymbolTable, UNTRANSLATED};

fn rf_models() -> Models {
    vec![Box::new(RuleFeature::new(0, 1.0))]
}

fn no_oov_unpruned() -> DecoderConfig {
    DecoderConfig { allow_oov: false, ..DecoderConfig::unpruned() }
}

fn linear(symbols: &mut SymbolTable, sentence: &str) -> Lattice {
    let words: Vec<_> = sentence.split_whitespace().map(|w| symbols.add_terminal(w)).collect();
    Lattice::linear(&words)
}

/// All surviving nodes as `(i, j, lhs, signature)`, for parity checks.
fn inventory(hg: &HyperGraph) -> BTreeSet<(usize, usize, u32, String)> {
    hg.arena
        .iter_nodes()
        .map(|n| (n.i, n.j, n.lhs.id(), n.signature.clone()))
        .collect()
}

#[test]
fn single_terminal_single_rule() {
    let mut symbols = SymbolTable::new();
    let models = rf_models();
    let grammar = GrammarBuilder::new(&mut symbols, "g")
        .rule("S", &[T("a")], &[W("a")], vec![1.0])
        .into_grammar(&models);
    let lattice = linear(&mut symbols, "a");

    let hg = parse(
        &lattice, &models, &[grammar], "S", &[], &no_oov_unpruned(), &mut symbols, 0, false,
    )
    .unwrap();
    assert_eq!(hg.sent_len, 1);
    assert_eq!(hg.best_cost(), 1.0);
    assert_eq!(hg.best_target(&symbols), "a");
}

#[test]
fn unary_closure_builds_the_whole_chain() {
    let mut symbols = SymbolTable::new();
    let models = rf_models();
    let grammar = GrammarBuilder::new(&mut symbols, "g")
        .rule("X", &[T("a")], &[W("a")], vec![1.0])
        .rule("S", &[Nt("X")], &[Sl(0)], vec![0.5])
        .into_grammar(&models);
    let lattice = linear(&mut symbols, "a");

    let hg = parse(
        &lattice, &models, &[grammar], "S", &[], &no_oov_unpruned(), &mut symbols, 0, false,
    )
    .unwrap();
    assert_eq!(hg.best_cost(), 1.5);

    let x = symbols.add_nonterminal("X");
    let s = symbols.add_nonterminal("S");
    let spans: Vec<_> = hg
        .arena
        .iter_nodes()
        .filter(|n| n.i == 0 && n.j == 1)
        .map(|n| n.lhs)
        .collect();
    assert!(spans.contains(&x), "unary closure must keep the X node");
    assert!(spans.contains(&s), "unary closure must add the S node");
}

#[test]
fn unary_cycle_terminates() {
    // S -> X and X -> S form a cycle; closure must stop at the merge.
    let mut symbols = SymbolTable::new();
    let models = rf_models();
    let grammar = GrammarBuilder::new(&mut symbols, "g")
        .rule("X", &[T("a")], &[W("a")], vec![1.0])
        .rule("S", &[Nt("X")], &[Sl(0)], vec![0.5])
        .rule("X", &[Nt("S")], &[Sl(0)], vec![0.5])
        .into_grammar(&models);
    let lattice = linear(&mut symbols, "a");

    let hg = parse(
        &lattice, &models, &[grammar], "S", &[], &no_oov_unpruned(), &mut symbols, 0, false,
    )
    .unwrap();
    assert_eq!(hg.best_cost(), 1.5);
}

#[test]
fn oov_fallback_bridges_uncovered_words() {
    let mut symbols = SymbolTable::new();
    let models = rf_models();
    let grammar = GrammarBuilder::new(&mut symbols, "g")
        .rule("S", &[T("a")], &[W("a")], vec![1.0])
        .into_grammar(&models);
    let lattice = linear(&mut symbols, "b");

    let config = DecoderConfig {
        allow_oov: true,
        oov_nonterminal: "S".to_string(),
        ..DecoderConfig::unpruned()
    };
    let hg =
        parse(&lattice, &models, &[grammar], "S", &[], &config, &mut symbols, 0, false).unwrap();
    assert_eq!(hg.best_cost(), 0.0);
    assert_eq!(hg.best_target(&symbols), "b");
}

#[test]
fn marked_oovs_translate_to_the_untranslated_marker() {
    let mut symbols = SymbolTable::new();
    let models = rf_models();
    let grammar = GrammarBuilder::new(&mut symbols, "g")
        .rule("S", &[T("a")], &[W("a")], vec![1.0])
        .into_grammar(&models);
    let lattice = linear(&mut symbols, "zzz");

    let config = DecoderConfig {
        allow_oov: true,
        mark_oovs: true,
        oov_nonterminal: "S".to_string(),
        ..DecoderConfig::unpruned()
    };
    let hg =
        parse(&lattice, &models, &[grammar], "S", &[], &config, &mut symbols, 0, false).unwrap();
    assert_eq!(hg.best_target(&symbols), UNTRANSLATED);
}

#[test]
fn oov_penalty_still_charges_marked_oovs() {
    let mut symbols = SymbolTable::new();
    let models: Models =
        vec![Box::new(RuleFeature::new(0, 1.0)), Box::new(OovPenalty::new(2.5))];
    let grammar = GrammarBuilder::new(&mut symbols, "g")
        .rule("S", &[T("a")], &[W("a")], vec![1.0, 0.0])
        .into_grammar(&models);
    let lattice = linear(&mut symbols, "zzz");

    let config = DecoderConfig {
        allow_oov: true,
        mark_oovs: true,
        oov_nonterminal: "S".to_string(),
        ..DecoderConfig::unpruned()
    };
    let hg =
        parse(&lattice, &models, &[grammar], "S", &[], &config, &mut symbols, 0, false).unwrap();
    // rewriting to the marker must not dodge the penalty
    assert_eq!(hg.best_target(&symbols), UNTRANSLATED);
    assert_eq!(hg.best_cost(), 2.5);
}

#[test]
fn hard_rule_span_suppresses_everything_else() {
    let mut symbols = SymbolTable::new();
    let models = rf_models();
    let grammar = GrammarBuilder::new(&mut symbols, "g")
        .rule("S", &[T("a"), T("b")], &[W("grammar-made")], vec![5.0])
        .into_grammar(&models);
    let lattice = linear(&mut symbols, "a b");

    let constraints = vec![ConstraintSpan::new(
        0,
        2,
        true,
        vec![ConstraintRule::manual("S", &["a", "b"], &["handmade"], vec![5.0], 0)],
    )];
    // OOV stays enabled on purpose: hard containment must win over it
    let config = DecoderConfig { allow_oov: true, ..DecoderConfig::unpruned() };
    let hg = parse(
        &lattice, &models, &[grammar], "S", &constraints, &config, &mut symbols, 0, false,
    )
    .unwrap();

    // hard spans zero the feature values
    assert_eq!(hg.best_cost(), 0.0);
    assert_eq!(hg.best_target(&symbols), "handmade");

    // no OOV axioms in the enclosed narrow cells, one derivation up top
    assert_eq!(hg.arena.iter_nodes().filter(|n| n.j - n.i == 1).count(), 0);
    let goal_lhs = symbols.add_nonterminal("GOAL");
    let top: Vec<_> = hg
        .arena
        .iter_nodes()
        .filter(|n| n.i == 0 && n.j == 2 && n.lhs != goal_lhs)
        .collect();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].edges.len(), 1);
}

#[test]
fn soft_manual_rule_competes_with_the_grammar() {
    let mut symbols = SymbolTable::new();
    let models = rf_models();
    let grammar = GrammarBuilder::new(&mut symbols, "g")
        .rule("S", &[T("a"), T("b")], &[W("grammar-made")], vec![5.0])
        .into_grammar(&models);
    let lattice = linear(&mut symbols, "a b");

    let constraints = vec![ConstraintSpan::new(
        0,
        2,
        false,
        vec![ConstraintRule::manual("S", &["a", "b"], &["handmade"], vec![1.0], 0)],
    )];
    let hg = parse(
        &lattice, &models, &[grammar], "S", &constraints, &no_oov_unpruned(), &mut symbols, 0,
        false,
    )
    .unwrap();
    // both derivations exist; the cheaper manual one wins
    assert_eq!(hg.best_cost(), 1.0);
    assert_eq!(hg.best_target(&symbols), "handmade");
}

#[test]
fn lhs_filter_keeps_only_accepted_rules() {
    let mut symbols = SymbolTable::new();
    let models = rf_models();
    let grammar = GrammarBuilder::new(&mut symbols, "g")
        .rule("A", &[T("a")], &[W("x")], vec![1.0])
        .rule("B", &[T("a")], &[W("y")], vec![2.0])
        .into_grammar(&models);
    let lattice = linear(&mut symbols, "a");

    let constraints =
        vec![ConstraintSpan::new(0, 1, false, vec![ConstraintRule::lhs("A")])];
    let hg = parse(
        &lattice, &models, &[grammar], "A", &constraints, &no_oov_unpruned(), &mut symbols, 0,
        false,
    )
    .unwrap();

    let b = symbols.add_nonterminal("B");
    assert!(hg.arena.iter_nodes().all(|n| n.lhs != b), "filtered LHS must not appear");
    assert_eq!(hg.best_target(&symbols), "x");
}

#[test]
fn rhs_filter_compares_whole_target_sides() {
    let mut symbols = SymbolTable::new();
    let models = rf_models();
    let grammar = GrammarBuilder::new(&mut symbols, "g")
        .rule("A", &[T("a")], &[W("x")], vec![1.0])
        .rule("A", &[T("a")], &[W("x"), W("x")], vec![0.5])
        .into_grammar(&models);
    let lattice = linear(&mut symbols, "a");

    let constraints =
        vec![ConstraintSpan::new(0, 1, false, vec![ConstraintRule::rhs(&["x"])])];
    let hg = parse(
        &lattice, &models, &[grammar], "A", &constraints, &no_oov_unpruned(), &mut symbols, 0,
        false,
    )
    .unwrap();
    // the cheaper two-word rule is rejected by the RHS filter
    assert_eq!(hg.best_cost(), 1.0);
    assert_eq!(hg.best_target(&symbols), "x");
}

#[test]
fn cube_prune_matches_exhaustive_without_pruning() {
    let run = |cube: bool| {
        let mut setup = toy_translation();
        let lattice = linear(&mut setup.symbols, "el gato negro come pescado");
        let config = DecoderConfig { use_cube_prune: cube, ..DecoderConfig::unpruned() };
        parse(
            &lattice,
            &setup.models,
            &setup.grammars,
            setup.goal,
            &[],
            &config,
            &mut setup.symbols,
            7,
            false,
        )
        .unwrap()
    };
    let exhaustive = run(false);
    let cubed = run(true);
    assert_eq!(inventory(&exhaustive), inventory(&cubed));
    assert_eq!(exhaustive.best_cost(), cubed.best_cost());
    // signatures are unique per cell, so the inventory is lossless
    assert_eq!(inventory(&exhaustive).len(), exhaustive.arena.num_nodes());
}

#[test]
fn demo_sentence_reorders_the_adjective() {
    let mut setup = toy_translation();
    let lattice = linear(&mut setup.symbols, "el gato negro come pescado");
    let hg = parse(
        &lattice,
        &setup.models,
        &setup.grammars,
        setup.goal,
        &[],
        &DecoderConfig::default(),
        &mut setup.symbols,
        0,
        false,
    )
    .unwrap();
    assert_eq!(hg.best_target(&setup.symbols), "black the cat eats fish");
    assert!((hg.best_cost() - 2.0).abs() < 1e-9);
    assert!(hg.stats.n_added > 0);
    assert!(hg.stats.n_dotitem_added > 0);
    assert!(hg.stats.n_called_compute_item > 0);
}

#[test]
fn no_derivation_without_coverage() {
    let mut symbols = SymbolTable::new();
    let models = rf_models();
    let grammar = GrammarBuilder::new(&mut symbols, "g")
        .rule("S", &[T("b")], &[W("b")], vec![1.0])
        .into_grammar(&models);
    let lattice = linear(&mut symbols, "a");

    let err = parse(
        &lattice, &models, &[grammar], "S", &[], &no_oov_unpruned(), &mut symbols, 0, false,
    )
    .unwrap_err();
    assert!(matches!(err, DecodeError::NoDerivation(_)));
}

#[test]
fn parallel_lattice_arcs_pack_into_one_node() {
    let mut symbols = SymbolTable::new();
    let models = rf_models();
    let a = symbols.add_terminal("a");
    let b = symbols.add_terminal("b");
    let grammar = GrammarBuilder::new(&mut symbols, "g")
        .rule("X", &[T("a")], &[W("a")], vec![0.0])
        .rule("X", &[T("b")], &[W("b")], vec![0.0])
        .into_grammar(&models);

    let mut lattice = Lattice::with_positions(1);
    lattice.add_arc(0, 1, a, 0.0);
    lattice.add_arc(0, 1, b, 1.0);

    let hg = parse(
        &lattice, &models, &[grammar], "X", &[], &no_oov_unpruned(), &mut symbols, 0, false,
    )
    .unwrap();
    // same LHS, no stateful features: both derivations merge into one node
    let x = symbols.add_nonterminal("X");
    let packed: Vec<_> =
        hg.arena.iter_nodes().filter(|n| n.i == 0 && n.j == 1 && n.lhs == x).collect();
    assert_eq!(packed.len(), 1);
    assert_eq!(packed[0].edges.len(), 2);
    assert_eq!(hg.stats.n_merged, 1);
    // the cheaper arc wins
    assert_eq!(hg.best_cost(), 0.0);
    assert_eq!(hg.best_target(&symbols), "a");
}

#[test]
fn weighted_arc_cost_lands_in_the_derivation() {
    let mut symbols = SymbolTable::new();
    let models = rf_models();
    let a = symbols.add_terminal("a");
    let grammar = GrammarBuilder::new(&mut symbols, "g")
        .rule("S", &[T("a")], &[W("a")], vec![1.0])
        .into_grammar(&models);
    let mut lattice = Lattice::with_positions(1);
    lattice.add_arc(0, 1, a, 0.25);

    let hg = parse(
        &lattice, &models, &[grammar], "S", &[], &no_oov_unpruned(), &mut symbols, 0, false,
    )
    .unwrap();
    assert_eq!(hg.best_cost(), 1.25);
}

#[test]
fn beam_discards_expensive_rivals() {
    let mut symbols = SymbolTable::new();
    let models = rf_models();
    let grammar = GrammarBuilder::new(&mut symbols, "g")
        .rule("A", &[T("a")], &[W("cheap")], vec![0.0])
        .rule("B", &[T("a")], &[W("dear")], vec![10.0])
        .into_grammar(&models);
    let lattice = linear(&mut symbols, "a");

    let config = DecoderConfig {
        allow_oov: false,
        beam_width: Some(5.0),
        ..DecoderConfig::default()
    };
    let hg =
        parse(&lattice, &models, &[grammar], "A", &[], &config, &mut symbols, 0, false).unwrap();
    assert_eq!(hg.best_cost(), 0.0);
    assert!(
        hg.stats.n_prepruned + hg.stats.n_pruned >= 1,
        "the 10-cost rival must fall to the beam"
    );
}

#[test]
fn cancellation_reports_between_cells() {
    let mut setup = toy_translation();
    let lattice = linear(&mut setup.symbols, "el gato negro come pescado");
    let flag = Arc::new(AtomicBool::new(false));
    flag.store(true, Ordering::Relaxed);
    let config = DecoderConfig { cancel: Some(flag.clone()), ..DecoderConfig::default() };
    let err = parse(
        &lattice,
        &setup.models,
        &setup.grammars,
        setup.goal,
        &[],
        &config,
        &mut setup.symbols,
        0,
        false,
    )
    .unwrap_err();
    assert!(matches!(err, DecodeError::Cancelled));
}
