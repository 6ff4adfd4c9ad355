//! Packed derivation forest: "or" nodes (`HGNode`) hosting "and" edges
//! (`HyperEdge`), stored in one arena and addressed by id.
//!
//! The arena is the permanent home of every node and edge created during
//! chart expansion; pruning only removes entries from bin indices, so ids
//! held by earlier edges never dangle. Edges always point at strictly
//! smaller spans, which makes the structure a DAG by construction.

use indextree::Arena;

use crate::chart::ChartStats;
use crate::grammar::{Rule, TargetTok};
use crate::models::FeatState;
use crate::symbol::{Sym, SymbolTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(usize);

/// An equivalence class of derivations over one span: same LHS, same
/// feature-state signature.
#[derive(Debug)]
pub struct HGNode {
    pub i: usize,
    pub j: usize,
    pub lhs: Sym,
    /// LHS + per-feature state fingerprints; unique within a bin.
    pub signature: String,
    /// Best derivation cost through this node.
    pub best_cost: f64,
    /// `best_cost` plus the features' outside estimate.
    pub est_total_cost: f64,
    /// One slot per configured feature function.
    pub states: Vec<Option<FeatState>>,
    pub edges: Vec<EdgeId>,
    pub best_edge: Option<EdgeId>,
}

/// One rule application: the rule, its antecedents in slot order, and what
/// the feature functions charged for it.
#[derive(Debug)]
pub struct HyperEdge {
    pub rule: Rule,
    pub tails: Vec<NodeId>,
    pub transition_cost: f64,
    /// transition cost plus the antecedents' best costs at creation time
    pub best_cost: f64,
}

/// The permanent owner of all nodes and edges, indexed by id.
#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: Vec<HGNode>,
    edges: Vec<HyperEdge>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: NodeId) -> &HGNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut HGNode {
        &mut self.nodes[id.0]
    }

    pub fn edge(&self, id: EdgeId) -> &HyperEdge {
        &self.edges[id.0]
    }

    pub fn new_node(&mut self, node: HGNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn new_edge(&mut self, edge: HyperEdge) -> EdgeId {
        let id = EdgeId(self.edges.len());
        self.edges.push(edge);
        id
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn iter_nodes(&self) -> impl Iterator<Item = &HGNode> {
        self.nodes.iter()
    }
}

/// One step of a rendered 1-best derivation.
#[derive(Debug, Clone)]
pub struct DerivStep {
    pub lhs: Sym,
    pub i: usize,
    pub j: usize,
    pub cost: f64,
}

/// The decoder's output: the arena plus the goal node for the sentence.
#[derive(Debug)]
pub struct HyperGraph {
    pub arena: NodeArena,
    pub root: NodeId,
    pub sent_id: usize,
    pub sent_len: usize,
    pub stats: ChartStats,
}

impl HyperGraph {
    pub fn best_cost(&self) -> f64 {
        self.arena.node(self.root).best_cost
    }

    /// Viterbi walk: realize the best derivation's target string, splicing
    /// antecedent yields into their slots.
    pub fn best_target(&self, symbols: &SymbolTable) -> String {
        let mut words = Vec::new();
        self.realize(self.root, &mut words);
        let mut b = string_builder::Builder::default();
        for (k, &w) in words.iter().enumerate() {
            if k > 0 {
                b.append(" ");
            }
            b.append(symbols.word(w));
        }
        b.string().unwrap_or_default()
    }

    fn realize(&self, node: NodeId, out: &mut Vec<Sym>) {
        let Some(best) = self.arena.node(node).best_edge else {
            return;
        };
        let edge = self.arena.edge(best);
        for tok in &edge.rule.target {
            match tok {
                TargetTok::Word(w) => out.push(*w),
                TargetTok::Slot(k) => {
                    if let Some(&tail) = edge.tails.get(*k) {
                        self.realize(tail, out);
                    }
                }
            }
        }
    }

    /// The 1-best derivation as a tree, one `DerivStep` per node visited.
    pub fn derivation_tree(&self) -> (Arena<DerivStep>, indextree::NodeId) {
        let mut tree = Arena::new();
        let root = self.grow(self.root, &mut tree, None);
        (tree, root)
    }

    fn grow(
        &self,
        node: NodeId,
        tree: &mut Arena<DerivStep>,
        parent: Option<indextree::NodeId>,
    ) -> indextree::NodeId {
        let hg = self.arena.node(node);
        let step = tree.new_node(DerivStep { lhs: hg.lhs, i: hg.i, j: hg.j, cost: hg.best_cost });
        if let Some(p) = parent {
            p.append(step, tree);
        }
        if let Some(best) = hg.best_edge {
            let tails = self.arena.edge(best).tails.clone();
            for tail in tails {
                self.grow(tail, tree, Some(step));
            }
        }
        step
    }

    /// Bracketed rendering of the 1-best derivation, for logs and the demo
    /// driver: `([GOAL] 0-2 ([S] 0-2 ...))`.
    pub fn render_derivation(&self, symbols: &SymbolTable) -> String {
        let (tree, root) = self.derivation_tree();
        let mut b = string_builder::Builder::default();
        Self::render_recurse(&tree, root, symbols, &mut b);
        b.string().unwrap_or_default()
    }

    fn render_recurse(
        tree: &Arena<DerivStep>,
        nid: indextree::NodeId,
        symbols: &SymbolTable,
        b: &mut string_builder::Builder,
    ) {
        let Some(node) = tree.get(nid) else {
            return;
        };
        let step = node.get();
        b.append("(");
        b.append(symbols.word(step.lhs));
        b.append(format!(" {}-{}", step.i, step.j));
        for child in nid.children(tree) {
            b.append(" ");
            Self::render_recurse(tree, child, symbols, b);
        }
        b.append(")");
    }
}
