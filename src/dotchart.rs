//! Earley-style dot charts: one per grammar, advancing partial rule matches
//! through the grammar trie across lattice spans.
//!
//! A `DotItem` is a trie position plus the SuperItems consumed so far (one
//! per nonterminal already matched) plus the lattice cost of the terminals
//! consumed. Antecedent lists are persistent vectors, so the tail-append on
//! every nonterminal advance shares structure with the parent item instead
//! of copying. Items are hash-consed per dot bin; nothing here is ever
//! pruned.

use std::collections::HashSet;
use std::fmt::Write as _;

use log::trace;
use rpds::Vector;

use crate::cell::Bin;
use crate::chart::ChartStats;
use crate::grammar::{Grammar, TrieNode};
use crate::lattice::Lattice;
use crate::symbol::Sym;

/// Handle to one SuperItem: the cell it lives in plus the shared LHS. The
/// node list is resolved through the bin at completion time, so pruning
/// between now and then is respected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SuperRef {
    pub i: usize,
    pub j: usize,
    pub lhs: Sym,
}

#[derive(Debug, Clone)]
pub struct DotItem<'g> {
    pub tnode: &'g TrieNode,
    pub ants: Vector<SuperRef>,
    pub lattice_cost: f64,
}

impl<'g> DotItem<'g> {
    /// Identity key: trie position, antecedent list, lattice cost.
    fn dedup_key(&self) -> String {
        let mut key = format!("{:p}", self.tnode as *const TrieNode);
        for r in self.ants.iter() {
            let _ = write!(key, " {},{},{}", r.i, r.j, r.lhs.id());
        }
        let _ = write!(key, " ${:x}", self.lattice_cost.to_bits());
        key
    }
}

#[derive(Debug, Default)]
pub struct DotBin<'g> {
    items: Vec<DotItem<'g>>,
    seen: HashSet<String>,
}

impl<'g> DotBin<'g> {
    fn add(&mut self, item: DotItem<'g>) -> bool {
        if self.seen.insert(item.dedup_key()) {
            self.items.push(item);
            true
        } else {
            false
        }
    }
}

pub struct DotChart<'g> {
    grammar: &'g Grammar,
    lattice: &'g Lattice,
    bins: Vec<Vec<DotBin<'g>>>,
}

impl<'g> DotChart<'g> {
    pub fn new(grammar: &'g Grammar, lattice: &'g Lattice) -> Self {
        let n = lattice.len();
        let bins = (0..=n).map(|_| (0..=n).map(|_| DotBin::default()).collect()).collect();
        Self { grammar, lattice, bins }
    }

    pub fn items(&self, i: usize, j: usize) -> &[DotItem<'g>] {
        &self.bins[i][j].items
    }

    pub fn has_items(&self, i: usize, j: usize) -> bool {
        !self.bins[i][j].items.is_empty()
    }

    /// Initial dot item at the trie root for every position that can still
    /// consume something. Idempotent: reseeding emits nothing new.
    pub fn seed(&mut self, stats: &mut ChartStats) {
        for pos in 0..=self.lattice.len() {
            if self.lattice.has_outgoing(pos) {
                let item = DotItem {
                    tnode: self.grammar.trie_root(),
                    ants: Vector::new(),
                    lattice_cost: 0.0,
                };
                self.add(pos, pos, item, stats);
            }
        }
    }

    /// Extend items into `(i, j)` by consuming one more symbol ending at
    /// `j`: a terminal from a lattice arc, or a completed SuperItem from a
    /// narrower cell.
    pub fn expand_cell(&mut self, i: usize, j: usize, chart_bins: &[Vec<Bin>], stats: &mut ChartStats) {
        let mut fresh: Vec<DotItem<'g>> = Vec::new();

        // terminal advance over arcs k -> j
        for k in i..j {
            for arc in self.lattice.arcs_from(k).iter().filter(|a| a.head == j) {
                for d in &self.bins[i][k].items {
                    if let Some(child) = d.tnode.match_one(arc.label) {
                        fresh.push(DotItem {
                            tnode: child,
                            ants: d.ants.clone(),
                            lattice_cost: d.lattice_cost + arc.cost,
                        });
                    }
                }
            }
        }

        // nonterminal advance over SuperItems of completed cells (k, j)
        for k in (i + 1)..j {
            for lhs in chart_bins[k][j].superitem_lhses() {
                if chart_bins[k][j].superitem(lhs).map_or(true, Vec::is_empty) {
                    continue;
                }
                for d in &self.bins[i][k].items {
                    if let Some(child) = d.tnode.match_one(lhs) {
                        fresh.push(DotItem {
                            tnode: child,
                            ants: d.ants.push_back(SuperRef { i: k, j, lhs }),
                            lattice_cost: d.lattice_cost,
                        });
                    }
                }
            }
        }

        for item in fresh {
            self.add(i, j, item, stats);
        }
    }

    /// Open fresh dot items from the SuperItems completed in `(i, j)`
    /// itself: rules whose source side *starts* with one of them.
    pub fn start_dotitems(&mut self, i: usize, j: usize, chart_bins: &[Vec<Bin>], stats: &mut ChartStats) {
        let root = self.grammar.trie_root();
        let mut fresh: Vec<DotItem<'g>> = Vec::new();
        for lhs in chart_bins[i][j].superitem_lhses() {
            if chart_bins[i][j].superitem(lhs).map_or(true, Vec::is_empty) {
                continue;
            }
            if let Some(child) = root.match_one(lhs) {
                fresh.push(DotItem {
                    tnode: child,
                    ants: Vector::new().push_back(SuperRef { i, j, lhs }),
                    lattice_cost: 0.0,
                });
            }
        }
        for item in fresh {
            self.add(i, j, item, stats);
        }
    }

    /// Dot bins in row `i` feed only cells `(i, j)`; once `(i, N)` has been
    /// processed the whole row can go.
    pub fn release_row(&mut self, i: usize) {
        for bin in &mut self.bins[i] {
            *bin = DotBin::default();
        }
    }

    fn add(&mut self, i: usize, j: usize, item: DotItem<'g>, stats: &mut ChartStats) {
        if self.bins[i][j].add(item) {
            stats.n_dotitem_added += 1;
            trace!("dot item added at ({i}, {j}) for grammar {}", self.grammar.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::GrammarBuilder;
    use crate::grammar::SrcTok::T;
    use crate::grammar::TgtTok::W;
    use crate::models::Models;
    use crate::symbol::SymbolTable;

    #[test]
    fn seeding_is_idempotent() {
        let mut tab = SymbolTable::new();
        let words = tab.add_terminals(&["a", "b"]);
        let lattice = Lattice::linear(&words);
        let models: Models = vec![];
        let grammar = GrammarBuilder::new(&mut tab, "g")
            .rule("X", &[T("a")], &[W("a")], vec![])
            .into_grammar(&models);

        let mut stats = ChartStats::default();
        let mut chart = DotChart::new(&grammar, &lattice);
        chart.seed(&mut stats);
        let first = stats.n_dotitem_added;
        assert_eq!(first, 2); // positions 0 and 1 have outgoing arcs, 2 does not
        chart.seed(&mut stats);
        assert_eq!(stats.n_dotitem_added, first);
    }

    #[test]
    fn terminal_advance_accumulates_arc_cost() {
        let mut tab = SymbolTable::new();
        let a = tab.add_terminal("a");
        let mut lattice = Lattice::with_positions(1);
        lattice.add_arc(0, 1, a, 0.25);
        let models: Models = vec![];
        let grammar = GrammarBuilder::new(&mut tab, "g")
            .rule("X", &[T("a")], &[W("a")], vec![])
            .into_grammar(&models);

        let mut stats = ChartStats::default();
        let mut chart = DotChart::new(&grammar, &lattice);
        chart.seed(&mut stats);
        let chart_bins: Vec<Vec<Bin>> = vec![(0..=1).map(|j| Bin::new(0, j)).collect()];
        chart.expand_cell(0, 1, &chart_bins, &mut stats);

        let items = chart.items(0, 1);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].lattice_cost, 0.25);
        assert!(items[0].ants.is_empty());
        assert!(items[0].tnode.rules().is_some());
    }
}
