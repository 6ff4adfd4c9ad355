//! Hand-built toy grammars for the demo driver and the test suite.
//!
//! The fixture is a miniature Spanish-to-English system: a translation
//! grammar with one reordering rule, a monotone glue grammar, and a small
//! model bank (one translation-model feature, a word penalty, and the
//! boundary-word state feature).

use indoc::indoc;

use crate::grammar::SrcTok::{Nt, T};
use crate::grammar::TgtTok::{Sl, W};
use crate::grammar::{Grammar, GrammarBuilder};
use crate::models::{Models, OovPenalty, RuleFeature, TargetBoundary, WordPenalty};
use crate::symbol::SymbolTable;

/// Everything needed to decode with the builtin fixture.
pub struct DemoSetup {
    pub symbols: SymbolTable,
    pub grammars: Vec<Grammar>,
    pub models: Models,
    pub goal: &'static str,
}

pub fn demo_models() -> Models {
    vec![
        Box::new(RuleFeature::new(0, 1.0)),
        Box::new(WordPenalty::new(0.1)),
        Box::new(OovPenalty::new(1.0)),
        Box::new(TargetBoundary::new()),
    ]
}

/// The toy translation setup shared by `cb decode` and the integration
/// tests.
pub fn toy_translation() -> DemoSetup {
    let mut symbols = SymbolTable::new();
    let models = demo_models();

    let tm = GrammarBuilder::new(&mut symbols, "tm")
        .span_limit(5)
        .rule("X", &[T("el"), T("gato")], &[W("the"), W("cat")], vec![0.5])
        .rule("X", &[T("gato")], &[W("cat")], vec![1.0])
        .rule("X", &[T("pescado")], &[W("fish")], vec![0.5])
        .rule("X", &[T("come")], &[W("eats")], vec![0.5])
        // adjective reordering: "[X] negro" -> "black [X]"
        .rule("X", &[Nt("X"), T("negro")], &[W("black"), Sl(0)], vec![0.3])
        .rule("X", &[Nt("X"), T("come"), Nt("X")], &[Sl(0), W("eats"), Sl(1)], vec![0.2])
        .into_grammar(&models);

    let glue = GrammarBuilder::new(&mut symbols, "glue")
        .rule("S", &[Nt("X")], &[Sl(0)], vec![0.0])
        .rule("S", &[Nt("S"), Nt("X")], &[Sl(0), Sl(1)], vec![0.1])
        .into_grammar(&models);

    DemoSetup { symbols, grammars: vec![tm, glue], models, goal: "S" }
}

pub const DEMO_SENTENCE: &str = "el gato negro come pescado";

pub fn demo_blurb() -> &'static str {
    indoc! {"
        Builtin toy grammar: Spanish -> English.

        Lexical rules cover 'el gato', 'gato', 'pescado', 'come'; one
        reordering rule moves 'negro' in front of its head; a monotone glue
        grammar chains X constituents under S. Any other word becomes an
        OOV pass-through.
    "}
}
