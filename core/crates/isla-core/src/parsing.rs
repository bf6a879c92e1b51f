//! Parser contract (§6): "an Earley-like parser able to parse a string
//! into a derivation tree for a given start nonterminal, with
//! deterministic tie-break." A full Earley implementation is out of
//! scope (§1) — only the [`TreeParser`] interface is contract. The
//! concrete [`RecursiveDescentParser`] below is a minimal, deterministic
//! stand-in sufficient to parse the SMT model strings this crate's own
//! grammars produce (§8 scenarios); it is not a general CFG parser.

use crate::error::{IslaError, IslaResult};
use crate::grammar::{is_nonterminal, Grammar};
use crate::tree::{DerivationTree, Symbol};

/// Parses a concrete string into a derivation tree rooted at a given
/// nonterminal (§6).
pub trait TreeParser {
    fn parse(&self, grammar: &Grammar, start_nonterminal: &str, input: &str) -> IslaResult<DerivationTree>;
}

/// Backtracking recursive-descent parser over the canonical grammar
/// form, trying alternatives in declaration order and taking the first
/// one whose parse consumes the input exactly (deterministic
/// tie-break). Adequate for the small, non-ambiguous, non-left-recursive
/// grammars this crate's scenarios use; genuinely ambiguous or
/// left-recursive grammars are out of scope.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecursiveDescentParser;

impl TreeParser for RecursiveDescentParser {
    fn parse(&self, grammar: &Grammar, start_nonterminal: &str, input: &str) -> IslaResult<DerivationTree> {
        match parse_nonterminal(grammar, start_nonterminal, input)?{
            Some((tree, rest)) if rest.is_empty() => Ok(tree),
            _ => Err(IslaError::parse_failure(start_nonterminal, input)),
        }
    }
}

fn parse_nonterminal<'a>(
    grammar: &Grammar,
    nonterminal: &str,
    input: &'a str,
) -> IslaResult<Option<(DerivationTree, &'a str)>> {
    let alternatives = grammar.alternatives(nonterminal)?;
    for alt in alternatives {
        if let Some((children, rest)) = parse_sequence(grammar, alt, input)? {
            return Ok(Some((DerivationTree::inner(Symbol::nonterminal(nonterminal), children), rest)));
        }
    }
    Ok(None)
}

fn parse_sequence<'a>(
    grammar: &Grammar,
    symbols: &[String],
    input: &'a str,
) -> IslaResult<Option<(Vec<DerivationTree>, &'a str)>> {
    match symbols.split_first() {
        None => Ok(Some((Vec::new(), input))),
        Some((sym, rest_symbols)) => {
            if is_nonterminal(sym) {
                // Try every split point, greediest (longest match) first,
                // so a following literal can anchor the split.
                for split in (0..=input.len()).rev() {
                    if !input.is_char_boundary(split) {
                        continue;
                    }
                    let (head, tail) = input.split_at(split);
                    if let Some((child, head_rest)) = parse_nonterminal(grammar, sym, head)? {
                        if !head_rest.is_empty() {
                            continue;
                        }
                        if let Some((mut siblings, final_rest)) = parse_sequence(grammar, rest_symbols, tail)? {
                            siblings.insert(0, child);
                            return Ok(Some((siblings, final_rest)));
                        }
                    }
                }
                Ok(None)
            } else if let Some(tail) = input.strip_prefix(sym.as_str()) {
                let terminal = DerivationTree::terminal(sym.clone());
                match parse_sequence(grammar, rest_symbols, tail)? {
                    Some((mut siblings, final_rest)) => {
                        siblings.insert(0, terminal);
                        Ok(Some((siblings, final_rest)))
                    }
                    None => Ok(None),
                }
            } else {
                Ok(None)
            }
        }
    }
}
