//! Grammar services (§2, §6).
//!
//! The concrete-syntax parser that builds a [`Grammar`] from BNF or a
//! host language is out of scope (§1) — the core only consumes the
//! canonical mapping. Likewise, the Earley parser and the precise
//! nonterminal-to-regex conversion are external collaborators; only
//! their contracts ([`TreeParser`], [`RegexApproximator`]) live here,
//! alongside the reachability graph and a write-once cache over both,
//! mirroring the reference's `@lru_cache`-memoized
//! `ISLaSolver.reachable`/`extract_regular_expression` (see
//! `gensearch_2.py`).

use std::cell::RefCell;
use std::collections::HashMap;

use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use regex::Regex;

use crate::error::{IslaError, IslaResult};
use crate::tree::{DerivationTree, Symbol};

/// One alternative expansion of a nonterminal: an ordered list of
/// symbols, nonterminal (`<...>`) or terminal literal.
pub type Alternative = Vec<String>;

/// Canonical grammar form (§6): nonterminal → ordered list of
/// alternatives.
#[derive(Debug, Clone, Default)]
pub struct Grammar {
    rules: HashMap<String, Vec<Alternative>>,
    pub start_symbol: String,
}

pub fn is_nonterminal(symbol: &str) -> bool {
    symbol.starts_with('<') && symbol.ends_with('>') && symbol.len() > 2
}

impl Grammar {
    pub fn new(start_symbol: impl Into<String>) -> Self {
        Self {
            rules: HashMap::new(),
            start_symbol: start_symbol.into(),
        }
    }

    pub fn with_rule(mut self, nonterminal: impl Into<String>, alternatives: Vec<Alternative>) -> Self {
        self.rules.insert(nonterminal.into(), alternatives);
        self
    }

    pub fn alternatives(&self, nonterminal: &str) -> IslaResult<&[Alternative]> {
        self.rules
            .get(nonterminal)
            .map(Vec::as_slice)
            .ok_or_else(|| IslaError::grammar_error(nonterminal))
    }

    pub fn nonterminals(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    /// One-level expansion of `symbol` into a fresh inner node: literal
    /// symbols become terminal leaves with empty children, nonterminal
    /// symbols become new open leaves (§4.7).
    pub fn instantiate_alternative(alternative: &Alternative) -> Vec<DerivationTree> {
        alternative
            .iter()
            .map(|sym| {
                if is_nonterminal(sym) {
                    DerivationTree::leaf(Symbol::nonterminal(sym.clone()))
                } else {
                    DerivationTree::terminal(sym.clone())
                }
            })
            .collect()
    }
}

/// Reachability graph over grammar nonterminals (§2). `petgraph` is part
/// of the teacher's declared-but-otherwise-unused workspace dependency
/// set; this is the role §2 assigns it.
pub struct GrammarGraph {
    graph: DiGraph<String, ()>,
    index_of: HashMap<String, NodeIndex>,
    reachable_cache: RefCell<HashMap<(String, String), bool>>,
}

impl GrammarGraph {
    pub fn build(grammar: &Grammar) -> Self {
        let mut graph = DiGraph::new();
        let mut index_of = HashMap::new();

        for nt in grammar.nonterminals() {
            index_of
                .entry(nt.to_string())
                .or_insert_with(|| graph.add_node(nt.to_string()));
        }

        for nt in grammar.nonterminals() {
            let from = index_of[nt];
            if let Ok(alts) = grammar.alternatives(nt) {
                for alt in alts {
                    for sym in alt {
                        if is_nonterminal(sym) {
                            let to = *index_of
                                .entry(sym.clone())
                                .or_insert_with(|| graph.add_node(sym.clone()));
                            graph.add_edge(from, to, ());
                        }
                    }
                }
            }
        }

        Self {
            graph,
            index_of,
            reachable_cache: RefCell::new(HashMap::new()),
        }
    }

    /// Whether `to_nonterminal` is reachable from `nonterminal` (through
    /// zero or more expansion steps, including `nonterminal` itself).
    /// Write-once memoized per grammar instance (§9).
    pub fn reachable(&self, nonterminal: &str, to_nonterminal: &str) -> bool {
        if nonterminal == to_nonterminal {
            return true;
        }
        let key = (nonterminal.to_string(), to_nonterminal.to_string());
        if let Some(&cached) = self.reachable_cache.borrow().get(&key) {
            return cached;
        }
        let result = match (self.index_of.get(nonterminal), self.index_of.get(to_nonterminal)) {
            (Some(&from), Some(&to)) => has_path_connecting(&self.graph, from, to, None),
            _ => false,
        };
        self.reachable_cache.borrow_mut().insert(key, result);
        result
    }
}

/// An over-approximation of a nonterminal's language as a regular
/// expression, used by the SMT bridge (§4.4). Producing a *precise*
/// grammar-to-regex conversion is out of scope (§1); this contract lets
/// a caller plug in the real converter while a conservative default
/// (match anything) suffices to keep the bridge's `InRegex` obligation
/// satisfiable for the grammars used in this crate's own tests.
pub trait RegexApproximator {
    fn approximate(&self, nonterminal: &str) -> IslaResult<String>;
}

/// A permissive default: every nonterminal's language is approximated
/// by "any sequence of non-newline characters". Sound (every derivable
/// string matches) but not tight — exactly the over-approximation §4.4
/// specifies the SMT bridge as needing, not a precise converter.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveRegexApproximator;

impl RegexApproximator for PermissiveRegexApproximator {
    fn approximate(&self, _nonterminal: &str) -> IslaResult<String> {
        Ok(".*".to_string())
    }
}

/// Write-once cache over a [`RegexApproximator`], mirroring the
/// reference's `@lru_cache` on `extract_regular_expression`.
pub struct RegexCache<'a> {
    approximator: &'a dyn RegexApproximator,
    cache: RefCell<HashMap<String, Regex>>,
}

impl<'a> RegexCache<'a> {
    pub fn new(approximator: &'a dyn RegexApproximator) -> Self {
        Self {
            approximator,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn get(&self, nonterminal: &str) -> IslaResult<Regex> {
        if let Some(re) = self.cache.borrow().get(nonterminal) {
            return Ok(re.clone());
        }
        let pattern = self.approximator.approximate(nonterminal)?;
        let full_pattern = format!("^(?s:{pattern})$");
        let re = Regex::new(&full_pattern)
            .map_err(|e| IslaError::constraint_error(format!("bad regex for {nonterminal}: {e}")))?;
        self.cache.borrow_mut().insert(nonterminal.to_string(), re.clone());
        Ok(re)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment_grammar() -> Grammar {
        Grammar::new("<start>")
            .with_rule("<start>", vec![vec!["<stmt>".into()]])
            .with_rule(
                "<stmt>",
                vec![
                    vec!["<assgn>".into(), " ; ".into(), "<stmt>".into()],
                    vec!["<assgn>".into()],
                ],
            )
            .with_rule(
                "<assgn>",
                vec![vec!["<var>".into(), " := ".into(), "<rhs>".into()]],
            )
            .with_rule("<rhs>", vec![vec!["<var>".into()], vec!["<digit>".into()]])
            .with_rule("<var>", vec![vec!["a".into()], vec!["b".into()]])
            .with_rule("<digit>", vec![vec!["0".into()], vec!["1".into()]])
    }

    #[test]
    fn reachable_follows_expansion_edges() {
        let grammar = assignment_grammar();
        let graph = GrammarGraph::build(&grammar);
        assert!(graph.reachable("<start>", "<var>"));
        assert!(graph.reachable("<stmt>", "<stmt>"));
        assert!(!graph.reachable("<var>", "<stmt>"));
    }

    #[test]
    fn instantiate_alternative_splits_terminals_and_nonterminals() {
        let alt: Alternative = vec!["<var>".into(), " := ".into(), "<rhs>".into()];
        let children = Grammar::instantiate_alternative(&alt);
        assert!(children[0].is_open_concrete());
        assert_eq!(children[1].yield_str(), " := ");
        assert!(children[2].is_open_concrete());
    }
}
