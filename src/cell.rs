//! Per-span bin: hosts the hypergraph nodes covering one cell `(i, j)`,
//! merges equivalent derivations by signature, and instantiates rules
//! against antecedent nodes either exhaustively or with cube pruning.
//!
//! The bin only indexes nodes; the arena owns them. Pruning removes entries
//! from the indices and nothing else, so antecedent references held by
//! wider cells stay valid.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use itertools::Itertools;
use log::{debug, trace};
use multimap::MultiMap;
use ordered_float::OrderedFloat;

use crate::chart::ChartStats;
use crate::config::DecoderConfig;
use crate::grammar::{Rule, TargetTok};
use crate::hypergraph::{HGNode, HyperEdge, NodeArena, NodeId};
use crate::models::{FeatState, FeatureFunction};
use crate::symbol::{Sym, SymbolTable};

/// Everything the feature functions say about one candidate rule
/// application, before it is (maybe) committed to the bin.
#[derive(Debug, Clone)]
pub struct ComputeItemResult {
    /// LHS plus per-feature state fingerprints.
    pub signature: String,
    pub transition_cost: f64,
    /// transition cost plus antecedent best costs
    pub best_cost: f64,
    /// `best_cost` plus the features' outside estimates
    pub est_total_cost: f64,
    pub states: Vec<Option<FeatState>>,
}

/// Consult every feature function for one rule application.
pub fn compute_item(
    models: &[Box<dyn FeatureFunction>],
    rule: &Rule,
    ants: &[NodeId],
    arena: &NodeArena,
    stats: &mut ChartStats,
) -> ComputeItemResult {
    stats.n_called_compute_item += 1;
    let mut transition_cost = 0.0;
    let mut estimate = 0.0;
    let mut states = Vec::with_capacity(models.len());
    for (m, model) in models.iter().enumerate() {
        let ant_states: Vec<Option<&FeatState>> =
            ants.iter().map(|&a| arena.node(a).states[m].as_ref()).collect();
        let t = model.transition(rule, &ant_states);
        transition_cost += t.cost;
        estimate += t.estimate;
        states.push(t.state);
    }
    let best_cost =
        transition_cost + ants.iter().map(|&a| arena.node(a).best_cost).sum::<f64>();
    let est_total_cost = best_cost + estimate;

    let mut sig = string_builder::Builder::default();
    sig.append(format!("{}", rule.lhs.id()));
    for state in states.iter().flatten() {
        sig.append("|");
        sig.append(state.fingerprint());
    }
    ComputeItemResult {
        signature: sig.string().unwrap_or_default(),
        transition_cost,
        best_cost,
        est_total_cost,
        states,
    }
}

/// What `add_deduction` did with a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Added {
    /// a node with a fresh signature was created
    New(NodeId),
    /// folded into an existing node as one more incoming edge
    Merged(NodeId),
    /// rejected against the cutoff
    Pruned,
}

/// The antecedent at each slot must carry the nonterminal the rule expects
/// there. Trie indexing makes this structural for dot-chart completions,
/// but the bin guards it anyway.
fn slot_mismatch(rule: &Rule, ants: &[NodeId], arena: &NodeArena, symbols: &SymbolTable) -> bool {
    let mut slot = 0;
    for &sym in &rule.source {
        if symbols.is_nonterminal(sym) {
            match ants.get(slot) {
                Some(&ant) if arena.node(ant).lhs == sym => slot += 1,
                _ => return true,
            }
        }
    }
    slot != ants.len()
}

/// One corner of the cube-pruning grid: axis 0 walks the sorted rule list,
/// axis `t + 1` walks the sorted nodes of antecedent slot `t`.
struct CubeEntry {
    cost: OrderedFloat<f64>,
    pos: Vec<usize>,
    ants: Vec<NodeId>,
    result: ComputeItemResult,
}

/// Min-order on cost inside a max-heap, ties broken by signature so pops are
/// deterministic.
impl Ord for CubeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .cmp(&self.cost)
            .then_with(|| other.result.signature.cmp(&self.result.signature))
    }
}

impl PartialOrd for CubeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for CubeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CubeEntry {}

/// All hypergraph nodes for one cell, indexed by signature and grouped into
/// SuperItems by LHS.
#[derive(Debug)]
pub struct Bin {
    i: usize,
    j: usize,
    by_sig: HashMap<String, NodeId>,
    /// SuperItem index: every node filed under its LHS.
    superitems: MultiMap<Sym, NodeId>,
    sorted: Vec<NodeId>,
    dirty: bool,
    /// best estimated total cost over current members
    best_est: f64,
}

impl Bin {
    pub fn new(i: usize, j: usize) -> Self {
        Self {
            i,
            j,
            by_sig: HashMap::new(),
            superitems: MultiMap::new(),
            sorted: Vec::new(),
            dirty: false,
            best_est: f64::INFINITY,
        }
    }

    pub fn span(&self) -> (usize, usize) {
        (self.i, self.j)
    }

    pub fn is_empty(&self) -> bool {
        self.by_sig.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_sig.len()
    }

    /// Nodes equivalent under `(i, j, lhs)`, i.e. one SuperItem.
    pub fn superitem(&self, lhs: Sym) -> Option<&Vec<NodeId>> {
        self.superitems.get_vec(&lhs)
    }

    pub fn superitem_lhses(&self) -> Vec<Sym> {
        self.superitems.keys().copied().collect()
    }

    fn cutoff(&self, config: &DecoderConfig) -> f64 {
        match config.beam_width {
            Some(beam) => self.best_est + beam,
            None => f64::INFINITY,
        }
    }

    /// Members ascending by estimated total cost, stable for ties.
    pub fn sorted_nodes(&mut self, arena: &NodeArena) -> &[NodeId] {
        if self.dirty {
            self.sorted
                .sort_by_key(|&id| OrderedFloat(arena.node(id).est_total_cost));
            self.dirty = false;
        }
        &self.sorted
    }

    /// Current members in insertion order (a snapshot for agendas).
    pub fn member_snapshot(&self) -> Vec<NodeId> {
        self.sorted.clone()
    }

    /// Commit one scored candidate: merge into an existing node by
    /// signature, or create a new node, unless the cutoff rejects it.
    pub fn add_deduction(
        &mut self,
        rule: &Rule,
        ants: Vec<NodeId>,
        result: ComputeItemResult,
        lattice_cost: f64,
        arena: &mut NodeArena,
        config: &DecoderConfig,
        stats: &mut ChartStats,
    ) -> Added {
        let total = result.est_total_cost + lattice_cost;
        if total > self.cutoff(config) + config.fuzz1 {
            stats.n_prepruned += 1;
            trace!("pre-pruned candidate {} at ({}, {}) cost {total:.3}", result.signature, self.i, self.j);
            return Added::Pruned;
        }
        let edge_best = result.best_cost + lattice_cost;
        let transition = result.transition_cost + lattice_cost;

        if let Some(&nid) = self.by_sig.get(&result.signature) {
            let eid = arena.new_edge(HyperEdge {
                rule: rule.clone(),
                tails: ants,
                transition_cost: transition,
                best_cost: edge_best,
            });
            let node = arena.node_mut(nid);
            node.edges.push(eid);
            if edge_best < node.best_cost {
                node.est_total_cost += edge_best - node.best_cost;
                node.best_cost = edge_best;
                node.best_edge = Some(eid);
                self.best_est = self.best_est.min(node.est_total_cost);
                self.dirty = true;
            }
            stats.n_merged += 1;
            Added::Merged(nid)
        } else {
            let eid = arena.new_edge(HyperEdge {
                rule: rule.clone(),
                tails: ants,
                transition_cost: transition,
                best_cost: edge_best,
            });
            let nid = arena.new_node(HGNode {
                i: self.i,
                j: self.j,
                lhs: rule.lhs,
                signature: result.signature.clone(),
                best_cost: edge_best,
                est_total_cost: total,
                states: result.states,
                edges: vec![eid],
                best_edge: Some(eid),
            });
            self.by_sig.insert(result.signature, nid);
            self.superitems.insert(rule.lhs, nid);
            self.sorted.push(nid);
            self.dirty = true;
            self.best_est = self.best_est.min(total);
            stats.n_added += 1;
            Added::New(nid)
        }
    }

    /// Axiom: a rule applied with no antecedents.
    pub fn add_axiom(
        &mut self,
        rule: &Rule,
        lattice_cost: f64,
        arena: &mut NodeArena,
        models: &[Box<dyn FeatureFunction>],
        config: &DecoderConfig,
        stats: &mut ChartStats,
    ) -> Added {
        let result = compute_item(models, rule, &[], arena, stats);
        self.add_deduction(rule, Vec::new(), result, lattice_cost, arena, config, stats)
    }

    pub fn add_axioms(
        &mut self,
        rules: &[&Rule],
        lattice_cost: f64,
        arena: &mut NodeArena,
        models: &[Box<dyn FeatureFunction>],
        config: &DecoderConfig,
        stats: &mut ChartStats,
    ) {
        for rule in rules {
            self.add_axiom(rule, lattice_cost, arena, models, config, stats);
        }
    }

    /// Exhaustive combination: the full Cartesian product of antecedent
    /// slots crossed with the sorted rules.
    #[allow(clippy::too_many_arguments)]
    pub fn complete_cell(
        &mut self,
        rules: &[&Rule],
        slots: &[Vec<NodeId>],
        lattice_cost: f64,
        arena: &mut NodeArena,
        models: &[Box<dyn FeatureFunction>],
        config: &DecoderConfig,
        symbols: &SymbolTable,
        stats: &mut ChartStats,
    ) {
        if rules.is_empty() || slots.iter().any(Vec::is_empty) {
            return;
        }
        let combos: Vec<Vec<NodeId>> = slots
            .iter()
            .map(|s| s.iter().copied())
            .multi_cartesian_product()
            .collect();
        for ants in combos {
            for &rule in rules {
                if slot_mismatch(rule, &ants, arena, symbols) {
                    continue;
                }
                let result = compute_item(models, rule, &ants, arena, stats);
                self.add_deduction(rule, ants.clone(), result, lattice_cost, arena, config, stats);
            }
        }
    }

    /// Cube pruning: pop the cheapest corner of the (rules × slots) grid,
    /// commit it, push its neighbors, up to the configured pop limit.
    #[allow(clippy::too_many_arguments)]
    pub fn complete_cell_cube_prune(
        &mut self,
        rules: &[&Rule],
        slots: &[Vec<NodeId>],
        lattice_cost: f64,
        arena: &mut NodeArena,
        models: &[Box<dyn FeatureFunction>],
        config: &DecoderConfig,
        symbols: &SymbolTable,
        stats: &mut ChartStats,
    ) {
        if rules.is_empty() || slots.iter().any(Vec::is_empty) {
            return;
        }
        let dims = 1 + slots.len();
        let mut visited: HashSet<Vec<usize>> = HashSet::new();
        let mut heap: BinaryHeap<CubeEntry> = BinaryHeap::new();

        let corner = vec![0; dims];
        visited.insert(corner.clone());
        if let Some(entry) =
            cube_candidate(corner, rules, slots, lattice_cost, arena, models, symbols, stats)
        {
            if entry.cost.into_inner() > self.cutoff(config) + config.fuzz1 {
                stats.n_prepruned_fuzz1 += 1;
            } else {
                heap.push(entry);
            }
        }

        let mut pops = 0usize;
        while let Some(entry) = heap.pop() {
            pops += 1;
            let CubeEntry { pos, ants, result, .. } = entry;
            let rule = rules[pos[0]];
            self.add_deduction(rule, ants, result, lattice_cost, arena, config, stats);
            if pops >= config.pop_limit {
                debug!("cube pop limit {} reached at ({}, {})", config.pop_limit, self.i, self.j);
                break;
            }
            for d in 0..dims {
                let mut next = pos.clone();
                next[d] += 1;
                let bound = if d == 0 { rules.len() } else { slots[d - 1].len() };
                if next[d] >= bound || !visited.insert(next.clone()) {
                    continue;
                }
                if let Some(neighbor) =
                    cube_candidate(next, rules, slots, lattice_cost, arena, models, symbols, stats)
                {
                    if neighbor.cost.into_inner() > self.cutoff(config) + config.fuzz2 {
                        stats.n_prepruned_fuzz2 += 1;
                    } else {
                        heap.push(neighbor);
                    }
                }
            }
        }
    }

    /// Enforce beam and cap after a cell finishes; evicted nodes leave the
    /// indices only.
    pub fn prune(&mut self, arena: &NodeArena, config: &DecoderConfig, stats: &mut ChartStats) {
        if self.by_sig.is_empty() {
            return;
        }
        let cutoff = self.cutoff(config);
        let ranked: Vec<NodeId> = self.sorted_nodes(arena).to_vec();
        let mut kept = Vec::with_capacity(ranked.len());
        let mut evicted = 0u64;
        for (rank, nid) in ranked.into_iter().enumerate() {
            let node = arena.node(nid);
            if rank >= config.max_items || node.est_total_cost > cutoff {
                self.by_sig.remove(&node.signature);
                if let Some(members) = self.superitems.get_vec_mut(&node.lhs) {
                    members.retain(|&m| m != nid);
                }
                evicted += 1;
            } else {
                kept.push(nid);
            }
        }
        if evicted > 0 {
            debug!("✂️ pruned {evicted} nodes from ({}, {})", self.i, self.j);
            stats.n_pruned += evicted;
            self.sorted = kept;
        }
    }

    /// Absorb the top cell into a goal bin: one edge per node whose LHS is
    /// the goal symbol, plus any LM finalization cost, packed under a single
    /// goal node.
    #[allow(clippy::too_many_arguments)]
    pub fn transit_to_goal(
        &mut self,
        top: &Bin,
        goal_sym: Sym,
        goal_lhs: Sym,
        have_lm: bool,
        arena: &mut NodeArena,
        models: &[Box<dyn FeatureFunction>],
    ) -> Option<NodeId> {
        let matching = top.superitem(goal_sym)?.clone();
        if matching.is_empty() {
            return None;
        }
        let goal_rule = Rule {
            lhs: goal_lhs,
            source: vec![goal_sym],
            target: vec![TargetTok::Slot(0)],
            arity: 1,
            features: vec![0.0; models.len()],
            score: 0.0,
            is_oov: false,
        };
        let mut goal: Option<NodeId> = None;
        for nid in matching {
            let final_cost: f64 = if have_lm {
                models
                    .iter()
                    .enumerate()
                    .map(|(m, model)| model.final_cost(arena.node(nid).states[m].as_ref()))
                    .sum()
            } else {
                0.0
            };
            let best = arena.node(nid).best_cost + final_cost;
            let eid = arena.new_edge(HyperEdge {
                rule: goal_rule.clone(),
                tails: vec![nid],
                transition_cost: final_cost,
                best_cost: best,
            });
            match goal {
                None => {
                    let gid = arena.new_node(HGNode {
                        i: self.i,
                        j: self.j,
                        lhs: goal_lhs,
                        signature: "goal".to_string(),
                        best_cost: best,
                        est_total_cost: best,
                        states: vec![None; models.len()],
                        edges: vec![eid],
                        best_edge: Some(eid),
                    });
                    self.by_sig.insert("goal".to_string(), gid);
                    self.superitems.insert(goal_lhs, gid);
                    self.sorted.push(gid);
                    self.best_est = best;
                    goal = Some(gid);
                }
                Some(gid) => {
                    let node = arena.node_mut(gid);
                    node.edges.push(eid);
                    if best < node.best_cost {
                        node.best_cost = best;
                        node.est_total_cost = best;
                        node.best_edge = Some(eid);
                        self.best_est = best;
                    }
                }
            }
        }
        goal
    }
}

/// Build and score the grid entry at `pos`, if its slots line up.
#[allow(clippy::too_many_arguments)]
fn cube_candidate(
    pos: Vec<usize>,
    rules: &[&Rule],
    slots: &[Vec<NodeId>],
    lattice_cost: f64,
    arena: &NodeArena,
    models: &[Box<dyn FeatureFunction>],
    symbols: &SymbolTable,
    stats: &mut ChartStats,
) -> Option<CubeEntry> {
    let rule = rules[pos[0]];
    let ants: Vec<NodeId> = slots.iter().zip(&pos[1..]).map(|(s, &k)| s[k]).collect();
    if slot_mismatch(rule, &ants, arena, symbols) {
        return None;
    }
    let result = compute_item(models, rule, &ants, arena, stats);
    let cost = OrderedFloat(result.est_total_cost + lattice_cost);
    Some(CubeEntry { cost, pos, ants, result })
}
