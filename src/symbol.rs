//! Interning symbol table shared by grammars, lattices and the chart.
//!
//! Every terminal word and nonterminal category is mapped to a dense `Sym`
//! id. Nonterminal names are normalized to their bracketed form ("[S]") so a
//! word and a category with the same spelling never collide.
//!
//! The table is the only structure shared across sentences. It is mutated
//! while grammars and constraints are being interned; once decoding starts
//! the chart only reads it. Callers decoding sentences in parallel must
//! finish interning first (or guard the table with a lock).

use std::collections::HashMap;
use std::fmt;
use smol_str::SmolStr;

/// Dense symbol id. Nonterminal-ness is a property of the table entry,
/// not of the id value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sym(u32);

impl Sym {
    pub fn id(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Sym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub const UNTRANSLATED: &str = "<untranslated>";

#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    words: Vec<SmolStr>,
    is_nt: Vec<bool>,
    index: HashMap<SmolStr, Sym>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn intern(&mut self, key: SmolStr, nt: bool) -> Sym {
        if let Some(&sym) = self.index.get(&key) {
            return sym;
        }
        let sym = Sym(self.words.len() as u32);
        self.words.push(key.clone());
        self.is_nt.push(nt);
        self.index.insert(key, sym);
        sym
    }

    /// Intern one terminal word.
    pub fn add_terminal(&mut self, word: &str) -> Sym {
        self.intern(SmolStr::new(word), false)
    }

    /// Intern a sequence of terminal words.
    pub fn add_terminals(&mut self, words: &[&str]) -> Vec<Sym> {
        words.iter().map(|w| self.add_terminal(w)).collect()
    }

    /// Intern a nonterminal category. Accepts either a bare name ("S") or an
    /// already-bracketed one ("[S]"); both land on the same entry.
    pub fn add_nonterminal(&mut self, name: &str) -> Sym {
        let key = if name.starts_with('[') && name.ends_with(']') {
            SmolStr::new(name)
        } else {
            SmolStr::new(format!("[{name}]"))
        };
        self.intern(key, true)
    }

    /// The terminal every marked-OOV rule translates to.
    pub fn untranslated(&mut self) -> Sym {
        self.add_terminal(UNTRANSLATED)
    }

    pub fn word(&self, sym: Sym) -> &str {
        &self.words[sym.0 as usize]
    }

    pub fn is_nonterminal(&self, sym: Sym) -> bool {
        self.is_nt[sym.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_round_trips() {
        let mut tab = SymbolTable::new();
        let a = tab.add_terminal("gato");
        let b = tab.add_terminal("gato");
        assert_eq!(a, b);
        assert_eq!(tab.word(a), "gato");
        assert!(!tab.is_nonterminal(a));
    }

    #[test]
    fn nonterminals_live_in_their_own_namespace() {
        let mut tab = SymbolTable::new();
        let word = tab.add_terminal("S");
        let cat = tab.add_nonterminal("S");
        let cat2 = tab.add_nonterminal("[S]");
        assert_ne!(word, cat);
        assert_eq!(cat, cat2);
        assert!(tab.is_nonterminal(cat));
        assert_eq!(tab.word(cat), "[S]");
    }

    #[test]
    fn untranslated_marker_is_a_terminal() {
        let mut tab = SymbolTable::new();
        let u = tab.untranslated();
        assert_eq!(tab.word(u), UNTRANSLATED);
        assert!(!tab.is_nonterminal(u));
    }
}
