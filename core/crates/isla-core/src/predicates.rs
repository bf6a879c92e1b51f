//! Structural and semantic predicate contracts (§6), plus a small
//! concrete library used to drive this crate's own §8 end-to-end
//! scenarios.
//!
//! §1 puts the *general* predicate library out of scope ("only the
//! predicate interface is contract") — the handful of predicates
//! implemented below (the glossary's own named examples: `before`,
//! `same_position`, `level`, `ljust_crop`/`rjust_crop`,
//! `octal_to_decimal`) exist only so the six scenarios in §8 are
//! actually runnable, not as a general-purpose library. The trait-object
//! registry shape follows the teacher's `validator/structural_validator.rs`
//! (`StructuralValidator` wrapping config + named checks).

use std::collections::HashMap;

use crate::error::{IslaError, IslaResult};
use crate::formula::PredicateArg;
use crate::grammar::Grammar;
use crate::tree::DerivationTree;
use crate::variable::Variable;

/// Outcome of applying a semantic predicate (§6).
///
/// Numeric constants are not part of the derivation tree (§3: "Numeric
/// variables use a distinguished type tag"), so a predicate that binds
/// one (e.g. `octal_to_decimal`) cannot propose a tree substitution for
/// it; `NumericSubstitutions` carries plain integer bindings instead,
/// which the solver substitutes directly into SMT atoms (§4.4).
#[derive(Debug, Clone, PartialEq)]
pub enum SemanticOutcome {
    Ready(bool),
    TreeSubstitutions(HashMap<Variable, DerivationTree>),
    NumericSubstitutions(HashMap<Variable, i64>),
    NotReady,
}

/// `name, arity, fn(reference_tree, *args) → bool` (§6).
pub trait StructuralPredicate {
    fn name(&self) -> &str;
    fn arity(&self) -> usize;
    fn evaluate(&self, reference_tree: &DerivationTree, args: &[PredicateArg]) -> IslaResult<bool>;
}

/// `name, arity, fn(grammar, *args) → outcome`, plus `binds_tree` (§6).
pub trait SemanticPredicate {
    fn name(&self) -> &str;
    fn arity(&self) -> usize;
    fn binds_tree(&self) -> bool;
    fn apply(&self, grammar: &Grammar, args: &[PredicateArg]) -> IslaResult<SemanticOutcome>;
}

fn require_bound(args: &[PredicateArg], idx: usize, who: &str) -> IslaResult<(&crate::tree::Path, &DerivationTree)> {
    match args.get(idx) {
        Some(PredicateArg::Bound { path, tree, .. }) => Ok((path, tree)),
        _ => Err(IslaError::constraint_error(format!(
            "{who}: argument {idx} is not grounded"
        ))),
    }
}

/// `before(n1, n2)`: `n1` occurs strictly earlier than `n2` in the
/// tree's left-to-right preorder.
pub struct BeforePredicate;

impl StructuralPredicate for BeforePredicate {
    fn name(&self) -> &str {
        "before"
    }

    fn arity(&self) -> usize {
        2
    }

    fn evaluate(&self, reference_tree: &DerivationTree, args: &[PredicateArg]) -> IslaResult<bool> {
        let (p1, _) = require_bound(args, 0, "before")?;
        let (p2, _) = require_bound(args, 1, "before")?;
        let order: Vec<crate::tree::Path> = reference_tree.walk().into_iter().map(|(p, _)| p).collect();
        let rank = |p: &crate::tree::Path| order.iter().position(|o| o == p);
        match (rank(p1), rank(p2)) {
            (Some(r1), Some(r2)) => Ok(r1 < r2),
            _ => Err(IslaError::constraint_error("before: path not found in reference tree")),
        }
    }
}

/// `same_position(n1, n2)`: the two arguments address the same node.
pub struct SamePositionPredicate;

impl StructuralPredicate for SamePositionPredicate {
    fn name(&self) -> &str {
        "same_position"
    }

    fn arity(&self) -> usize {
        2
    }

    fn evaluate(&self, _reference_tree: &DerivationTree, args: &[PredicateArg]) -> IslaResult<bool> {
        let (p1, _) = require_bound(args, 0, "same_position")?;
        let (p2, _) = require_bound(args, 1, "same_position")?;
        Ok(p1 == p2)
    }
}

/// `level(n1, n2)`: the two arguments sit at the same tree depth. A
/// simplified stand-in for ISLa's nesting-level predicate family, which
/// in the original also compares against an intervening nonterminal;
/// out of scope here since §1 excludes the general predicate library.
pub struct LevelPredicate;

impl StructuralPredicate for LevelPredicate {
    fn name(&self) -> &str {
        "level"
    }

    fn arity(&self) -> usize {
        2
    }

    fn evaluate(&self, _reference_tree: &DerivationTree, args: &[PredicateArg]) -> IslaResult<bool> {
        let (p1, _) = require_bound(args, 0, "level")?;
        let (p2, _) = require_bound(args, 1, "level")?;
        Ok(p1.len() == p2.len())
    }
}

/// `rjust_crop(var, width, pad)`: propose that `var`'s subtree be
/// replaced by its current yield right-justified (left-padded with
/// `pad`) and cropped/padded to exactly `width` characters.
pub struct RjustCropPredicate;

impl SemanticPredicate for RjustCropPredicate {
    fn name(&self) -> &str {
        "rjust_crop"
    }

    fn arity(&self) -> usize {
        3
    }

    fn binds_tree(&self) -> bool {
        true
    }

    fn apply(&self, _grammar: &Grammar, args: &[PredicateArg]) -> IslaResult<SemanticOutcome> {
        pad_crop(args, true)
    }
}

/// `ljust_crop(var, width, pad)`: same as `rjust_crop` but left-justified
/// (padded on the right).
pub struct LjustCropPredicate;

impl SemanticPredicate for LjustCropPredicate {
    fn name(&self) -> &str {
        "ljust_crop"
    }

    fn arity(&self) -> usize {
        3
    }

    fn binds_tree(&self) -> bool {
        true
    }

    fn apply(&self, _grammar: &Grammar, args: &[PredicateArg]) -> IslaResult<SemanticOutcome> {
        pad_crop(args, false)
    }
}

/// Crop/pad the current yield of `args[0]` to exactly `args[1]` (width)
/// characters, padded with `args[2]`. If the yield is already that
/// length, the predicate is satisfied without proposing a change;
/// otherwise it proposes replacing `args[0]`'s subtree with a terminal
/// holding the padded/cropped string.
fn pad_crop(args: &[PredicateArg], right_justify: bool) -> IslaResult<SemanticOutcome> {
    let (var_opt, var_path, var_tree) = match args.first() {
        Some(PredicateArg::Bound { var, path, tree }) => (var.clone(), path.clone(), tree),
        _ => return Ok(SemanticOutcome::NotReady),
    };
    let (_, width_tree) = require_bound(args, 1, "rjust_crop/ljust_crop")?;
    let (_, pad_tree) = require_bound(args, 2, "rjust_crop/ljust_crop")?;

    let width: usize = width_tree
        .yield_str()
        .trim()
        .parse()
        .map_err(|_| IslaError::constraint_error("rjust_crop/ljust_crop: width is not an integer"))?;
    let pad_char = pad_tree.yield_str().chars().next().unwrap_or('0');
    let current = var_tree.yield_str();

    if current.len() == width {
        return Ok(SemanticOutcome::Ready(true));
    }

    let var = match var_opt {
        Some(v) => v,
        None => {
            return Err(IslaError::constraint_error(
                "rjust_crop/ljust_crop: first argument must be a quantified variable",
            ))
        }
    };

    let cropped: String = if current.len() > width {
        if right_justify {
            current.chars().skip(current.len() - width).collect()
        } else {
            current.chars().take(width).collect()
        }
    } else {
        current
    };
    let padded = if right_justify {
        format!("{cropped:pad_char$>width$}")
    } else {
        format!("{cropped:pad_char$<width$}")
    };
    let _ = var_path;
    let mut subst = HashMap::new();
    subst.insert(var, DerivationTree::terminal(padded));
    Ok(SemanticOutcome::TreeSubstitutions(subst))
}

/// `octal_to_decimal(d, N)`: if `d`'s yield is a valid octal numeral,
/// bind the numeric constant `N` to its decimal value.
pub struct OctalToDecimalPredicate;

impl SemanticPredicate for OctalToDecimalPredicate {
    fn name(&self) -> &str {
        "octal_to_decimal"
    }

    fn arity(&self) -> usize {
        2
    }

    fn binds_tree(&self) -> bool {
        false
    }

    fn apply(&self, _grammar: &Grammar, args: &[PredicateArg]) -> IslaResult<SemanticOutcome> {
        match args {
            [PredicateArg::Bound { tree, .. }, PredicateArg::Unbound(n)] => {
                let digits = tree.yield_str();
                match i64::from_str_radix(digits.trim(), 8) {
                    Ok(value) => {
                        let mut subst = HashMap::new();
                        subst.insert(n.clone(), value);
                        Ok(SemanticOutcome::NumericSubstitutions(subst))
                    }
                    Err(_) => Ok(SemanticOutcome::Ready(false)),
                }
            }
            _ => Ok(SemanticOutcome::NotReady),
        }
    }
}

/// A named registry of the predicates in scope for a solve, mirroring
/// the teacher's `StructuralValidator` (config struct holding named
/// checks rather than a global static table).
#[derive(Default)]
pub struct PredicateLibrary {
    structural: HashMap<String, Box<dyn StructuralPredicate>>,
    semantic: HashMap<String, Box<dyn SemanticPredicate>>,
}

impl PredicateLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// The predicates needed to drive this crate's own §8 scenarios.
    pub fn standard() -> Self {
        let mut lib = Self::new();
        lib.register_structural(Box::new(BeforePredicate));
        lib.register_structural(Box::new(SamePositionPredicate));
        lib.register_structural(Box::new(LevelPredicate));
        lib.register_semantic(Box::new(RjustCropPredicate));
        lib.register_semantic(Box::new(LjustCropPredicate));
        lib.register_semantic(Box::new(OctalToDecimalPredicate));
        lib
    }

    pub fn register_structural(&mut self, predicate: Box<dyn StructuralPredicate>) {
        self.structural.insert(predicate.name().to_string(), predicate);
    }

    pub fn register_semantic(&mut self, predicate: Box<dyn SemanticPredicate>) {
        self.semantic.insert(predicate.name().to_string(), predicate);
    }

    pub fn structural(&self, name: &str) -> Option<&dyn StructuralPredicate> {
        self.structural.get(name).map(Box::as_ref)
    }

    pub fn semantic(&self, name: &str) -> Option<&dyn SemanticPredicate> {
        self.semantic.get(name).map(Box::as_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Symbol;

    fn tree_with_two_children() -> DerivationTree {
        DerivationTree::inner(
            Symbol::nonterminal("<stmt>"),
            vec![DerivationTree::terminal("a"), DerivationTree::terminal("b")],
        )
    }

    #[test]
    fn before_orders_by_preorder_rank() {
        let tree = tree_with_two_children();
        let lib = PredicateLibrary::standard();
        let pred = lib.structural("before").unwrap();
        let first = tree.get(&[0]).unwrap().clone();
        let second = tree.get(&[1]).unwrap().clone();
        let args = vec![
            PredicateArg::Bound { var: None, path: vec![0], tree: first },
            PredicateArg::Bound { var: None, path: vec![1], tree: second },
        ];
        assert!(pred.evaluate(&tree, &args).unwrap());
    }

    #[test]
    fn octal_to_decimal_binds_numeric_constant() {
        let lib = PredicateLibrary::standard();
        let pred = lib.semantic("octal_to_decimal").unwrap();
        let grammar = Grammar::new("<start>");
        let d = DerivationTree::terminal("017");
        let n = Variable::numeric_constant("N");
        let args = vec![
            PredicateArg::Bound { var: None, path: vec![], tree: d },
            PredicateArg::Unbound(n.clone()),
        ];
        let outcome = pred.apply(&grammar, &args).unwrap();
        match outcome {
            SemanticOutcome::NumericSubstitutions(map) => assert_eq!(map[&n], 15),
            other => panic!("expected NumericSubstitutions, got {other:?}"),
        }
    }
}
