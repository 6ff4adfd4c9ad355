//! Decoder options. Plain data with workable defaults; the caller owns one
//! per decoding run.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Combine with cube pruning instead of the exhaustive product.
    pub use_cube_prune: bool,
    /// Beam offset over the bin's best estimated cost; `None` disables the
    /// beam entirely (every candidate survives the threshold check).
    pub beam_width: Option<f64>,
    /// Keep at most this many nodes per bin after sorting.
    pub max_items: usize,
    /// Slack over the cutoff for cube-prune corner seeding.
    pub fuzz1: f64,
    /// Slack over the cutoff for cube-prune neighbor expansion.
    pub fuzz2: f64,
    /// Cube pruning pops per (rule group × antecedents) grid.
    pub pop_limit: usize,
    /// Synthesize pass-through rules for uncovered lattice arcs.
    pub allow_oov: bool,
    /// Nonterminal label for synthesized OOV and manual rules.
    pub oov_nonterminal: String,
    /// Translate OOVs to the `<untranslated>` marker instead of copying the
    /// source word through.
    pub mark_oovs: bool,
    /// Raised by the caller to abandon the sentence; polled between cells.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            use_cube_prune: true,
            beam_width: Some(10.0),
            max_items: 200,
            fuzz1: 0.1,
            fuzz2: 0.1,
            pop_limit: 1000,
            allow_oov: true,
            oov_nonterminal: "X".to_string(),
            mark_oovs: false,
            cancel: None,
        }
    }
}

impl DecoderConfig {
    /// Everything-survives settings: exhaustive combination, no beam, no
    /// caps. Used by tests and the monotone-completeness law.
    pub fn unpruned() -> Self {
        Self {
            use_cube_prune: false,
            beam_width: None,
            max_items: usize::MAX,
            fuzz1: f64::INFINITY,
            fuzz2: f64::INFINITY,
            pop_limit: usize::MAX,
            ..Self::default()
        }
    }
}
