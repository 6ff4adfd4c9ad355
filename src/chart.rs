//! The chart driver: seeds dot charts and axioms, runs the CKY-over-lattice
//! outer loop, and finishes by transiting the top cell into a goal bin.
//!
//! Per cell `(i, j)`, in order:
//! 1. advance every grammar's dot chart into the cell,
//! 2. instantiate completed rules into the bin (cube-prune or exhaustive),
//! 3. close the cell under unary rules,
//! 4. open fresh dot items from the cell's own completed SuperItems,
//! 5. sort and prune the bin.
//!
//! A sentence is decoded by one `Chart`; nothing here is shared across
//! sentences except the symbol table, which is only read once seeding is
//! done (the chart keeps its own copy).

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::Ordering as AtomicOrdering;

use log::{debug, info};
use ordered_float::OrderedFloat;

use crate::cell::{compute_item, Added, Bin};
use crate::config::DecoderConfig;
use crate::constraint::{ConstraintSpan, ConstraintTable};
use crate::dotchart::DotChart;
use crate::error::DecodeError;
use crate::grammar::{Grammar, Rule};
use crate::hypergraph::{HyperGraph, NodeArena, NodeId};
use crate::lattice::Lattice;
use crate::models::FeatureFunction;
use crate::symbol::{Sym, SymbolTable};

/// Per-chart diagnostics. These are deliberately not process-wide, so
/// sentences decoded in parallel never race on them.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChartStats {
    pub n_added: u64,
    pub n_merged: u64,
    pub n_pruned: u64,
    pub n_prepruned: u64,
    pub n_prepruned_fuzz1: u64,
    pub n_prepruned_fuzz2: u64,
    pub n_dotitem_added: u64,
    pub n_called_compute_item: u64,
}

impl fmt::Display for ChartStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "added={} merged={} pruned={} prepruned={}/{}/{} dotitems={} compute_item={}",
            self.n_added,
            self.n_merged,
            self.n_pruned,
            self.n_prepruned,
            self.n_prepruned_fuzz1,
            self.n_prepruned_fuzz2,
            self.n_dotitem_added,
            self.n_called_compute_item
        )
    }
}

/// Decode one sentence: seed a chart, run it, hand back the hypergraph.
#[allow(clippy::too_many_arguments)]
pub fn parse(
    lattice: &Lattice,
    models: &[Box<dyn FeatureFunction>],
    grammars: &[Grammar],
    goal_symbol: &str,
    constraints: &[ConstraintSpan],
    config: &DecoderConfig,
    symbols: &mut SymbolTable,
    sent_id: usize,
    have_lm: bool,
) -> Result<HyperGraph, DecodeError> {
    let chart = Chart::new(
        lattice, grammars, models, config, symbols, goal_symbol, constraints, sent_id, have_lm,
    )?;
    chart.expand()
}

/// One rule group ready to instantiate over a cell: the surviving rules, the
/// resolved (and sorted) antecedent node list per slot, and the lattice cost
/// the dot item accumulated.
struct Completion<'a> {
    rules: Vec<&'a Rule>,
    slots: Vec<Vec<NodeId>>,
    lattice_cost: f64,
}

pub struct Chart<'a> {
    grammars: &'a [Grammar],
    models: &'a [Box<dyn FeatureFunction>],
    config: &'a DecoderConfig,
    /// Chart-private copy; the shared table is not touched after seeding.
    symbols: SymbolTable,
    constraints: ConstraintTable,
    bins: Vec<Vec<Bin>>,
    goal_bin: Bin,
    dotcharts: Vec<DotChart<'a>>,
    arena: NodeArena,
    stats: ChartStats,
    goal_sym: Sym,
    goal_lhs: Sym,
    sent_id: usize,
    have_lm: bool,
    n: usize,
}

impl<'a> Chart<'a> {
    /// Validate the input, intern the constraints, and seed: dot charts,
    /// manual axioms, then OOV axioms for every arc outside hard spans.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lattice: &'a Lattice,
        grammars: &'a [Grammar],
        models: &'a [Box<dyn FeatureFunction>],
        config: &'a DecoderConfig,
        symbols: &mut SymbolTable,
        goal_symbol: &str,
        constraints: &[ConstraintSpan],
        sent_id: usize,
        have_lm: bool,
    ) -> Result<Self, DecodeError> {
        lattice.validate()?;
        let n = lattice.len();
        let goal_sym = symbols.add_nonterminal(goal_symbol);
        let goal_lhs = symbols.add_nonterminal("GOAL");
        let untranslated = symbols.untranslated();
        let synthetic = Grammar::synthetic(symbols, &config.oov_nonterminal);
        let (ctable, manual_axioms) =
            ConstraintTable::build(constraints, symbols, &synthetic, models.len(), n)?;

        let mut stats = ChartStats::default();
        let mut arena = NodeArena::new();
        let mut bins: Vec<Vec<Bin>> =
            (0..n).map(|i| (0..=n).map(|j| Bin::new(i, j)).collect()).collect();

        let mut dotcharts: Vec<DotChart<'a>> =
            grammars.iter().map(|g| DotChart::new(g, lattice)).collect();
        for dc in &mut dotcharts {
            dc.seed(&mut stats);
        }

        for axiom in &manual_axioms {
            debug!(
                "manual axiom over ({}, {}): {}",
                axiom.start,
                axiom.end,
                axiom.rule.render(symbols)
            );
            bins[axiom.start][axiom.end].add_axiom(
                &axiom.rule, 0.0, &mut arena, models, config, &mut stats,
            );
        }

        if config.allow_oov {
            for u in 0..n {
                for arc in lattice.arcs_from(u) {
                    if ctable.contained_in_hard(u, arc.head) {
                        continue;
                    }
                    let target = if config.mark_oovs { untranslated } else { arc.label };
                    let rule = synthetic.construct_oov_rule(models.len(), arc.label, target);
                    if !ctable.accepts(u, arc.head, &rule) {
                        continue;
                    }
                    bins[u][arc.head].add_axiom(&rule, arc.cost, &mut arena, models, config, &mut stats);
                }
            }
        }

        Ok(Self {
            grammars,
            models,
            config,
            symbols: symbols.clone(),
            constraints: ctable,
            bins,
            goal_bin: Bin::new(0, n),
            dotcharts,
            arena,
            stats,
            goal_sym,
            goal_lhs,
            sent_id,
            have_lm,
            n,
        })
    }

    /// Run the outer loop over spans by increasing width, then assemble the
    /// goal. Consumes the chart; the arena moves into the hypergraph.
    pub fn expand(mut self) -> Result<HyperGraph, DecodeError> {
        let n = self.n;
        for width in 1..=n {
            for i in 0..=(n - width) {
                if let Some(flag) = &self.config.cancel {
                    if flag.load(AtomicOrdering::Relaxed) {
                        return Err(DecodeError::Cancelled);
                    }
                }
                let j = i + width;
                self.process_cell(i, j);
                if j == n {
                    // nothing wider consumes row i's dot bins anymore
                    for dc in &mut self.dotcharts {
                        dc.release_row(i);
                    }
                }
            }
        }
        self.finish()
    }

    fn process_cell(&mut self, i: usize, j: usize) {
        let n = self.n;
        let hard = self.constraints.contained_in_hard(i, j);
        debug!("cell ({i}, {j}){}", if hard { " [hard]" } else { "" });

        // 1. advance dot charts into the cell
        for g in 0..self.dotcharts.len() {
            self.dotcharts[g].expand_cell(i, j, &self.bins, &mut self.stats);
        }

        // 2. instantiate completed rules (suppressed inside hard spans)
        if !hard {
            for g in 0..self.grammars.len() {
                if !self.grammars[g].has_rule_for_span(i, j, n) || !self.dotcharts[g].has_items(i, j)
                {
                    continue;
                }
                let (axioms, completions) = self.collect_completions(g, i, j);
                for (rules, lattice_cost) in axioms {
                    self.bins[i][j].add_axioms(
                        &rules, lattice_cost, &mut self.arena, self.models, self.config,
                        &mut self.stats,
                    );
                }
                for c in completions {
                    if self.config.use_cube_prune {
                        self.bins[i][j].complete_cell_cube_prune(
                            &c.rules, &c.slots, c.lattice_cost, &mut self.arena, self.models,
                            self.config, &self.symbols, &mut self.stats,
                        );
                    } else {
                        self.bins[i][j].complete_cell(
                            &c.rules, &c.slots, c.lattice_cost, &mut self.arena, self.models,
                            self.config, &self.symbols, &mut self.stats,
                        );
                    }
                }
            }

            // 3. unary closure
            self.apply_unary_rules(i, j);
        }

        // 4. fresh dot items over the cell's own SuperItems
        for g in 0..self.grammars.len() {
            if self.grammars[g].has_rule_for_span(i, j, n) {
                self.dotcharts[g].start_dotitems(i, j, &self.bins, &mut self.stats);
            }
        }

        // 5. sort and prune
        self.bins[i][j].prune(&self.arena, self.config, &mut self.stats);
    }

    /// Read pass over the dot bin: split dot items into arity-0 axioms and
    /// rule groups with resolved antecedent slots. No bin is mutated here.
    fn collect_completions(
        &self,
        g: usize,
        i: usize,
        j: usize,
    ) -> (Vec<(Vec<&'a Rule>, f64)>, Vec<Completion<'a>>) {
        let mut axioms = Vec::new();
        let mut completions = Vec::new();
        for dt in self.dotcharts[g].items(i, j) {
            let Some(rc) = dt.tnode.rules() else { continue };
            if rc.is_empty() {
                continue;
            }
            debug_assert_eq!(rc.arity(), dt.ants.len());
            let rules = self.constraints.filter(i, j, rc.sorted_rules());
            if rules.is_empty() {
                continue;
            }
            if rc.arity() == 0 {
                axioms.push((rules, dt.lattice_cost));
                continue;
            }
            let mut slots = Vec::with_capacity(dt.ants.len());
            let mut live = true;
            for r in dt.ants.iter() {
                match self.bins[r.i][r.j].superitem(r.lhs) {
                    Some(members) if !members.is_empty() => {
                        let mut axis = members.clone();
                        axis.sort_by_key(|&id| OrderedFloat(self.arena.node(id).est_total_cost));
                        slots.push(axis);
                    }
                    _ => {
                        // every member of this SuperItem has been pruned away
                        live = false;
                        break;
                    }
                }
            }
            if live {
                completions.push(Completion { rules, slots, lattice_cost: dt.lattice_cost });
            }
        }
        (axioms, completions)
    }

    /// Agenda-driven unary closure over the cell. Only newly created nodes
    /// re-enter the agenda; merges do not, which terminates the loop even
    /// when unary rules form a cycle.
    fn apply_unary_rules(&mut self, i: usize, j: usize) {
        let n = self.n;
        let mut agenda: VecDeque<NodeId> = self.bins[i][j].member_snapshot().into();
        while let Some(h) = agenda.pop_front() {
            let lhs = self.arena.node(h).lhs;
            for g in 0..self.grammars.len() {
                let grammar = &self.grammars[g];
                if !grammar.has_rule_for_span(i, j, n) {
                    continue;
                }
                let Some(child) = grammar.trie_root().match_one(lhs) else { continue };
                let Some(rc) = child.rules() else { continue };
                if rc.arity() != 1 {
                    continue;
                }
                for rule in self.constraints.filter(i, j, rc.sorted_rules()) {
                    let result =
                        compute_item(self.models, rule, &[h], &self.arena, &mut self.stats);
                    let added = self.bins[i][j].add_deduction(
                        rule,
                        vec![h],
                        result,
                        0.0,
                        &mut self.arena,
                        self.config,
                        &mut self.stats,
                    );
                    if let Added::New(nid) = added {
                        agenda.push_back(nid);
                    }
                }
            }
        }
    }

    fn finish(mut self) -> Result<HyperGraph, DecodeError> {
        let n = self.n;
        if self.bins[0][n].is_empty() {
            return Err(DecodeError::no_derivation(
                "top cell is empty: the grammars admit no derivation covering the input, \
                 or pruning was too aggressive",
            ));
        }
        let root = self.goal_bin.transit_to_goal(
            &self.bins[0][n],
            self.goal_sym,
            self.goal_lhs,
            self.have_lm,
            &mut self.arena,
            self.models,
        );
        let Some(root) = root else {
            return Err(DecodeError::no_derivation(
                "top cell has items, but none carries the goal symbol: the grammars admit no \
                 goal derivation, or pruning removed them",
            ));
        };
        info!(
            "🏁 sentence {} decoded: {} nodes / {} edges in the forest; {}",
            self.sent_id,
            self.arena.num_nodes(),
            self.arena.num_edges(),
            self.stats
        );
        Ok(HyperGraph {
            arena: self.arena,
            root,
            sent_id: self.sent_id,
            sent_len: n,
            stats: self.stats,
        })
    }
}
