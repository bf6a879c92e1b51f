//! Three-valued evaluator (§4.9), mirroring the reference's
//! `ThreeValuedTruth` (see `evaluator.py`).

use std::collections::HashMap;

use crate::error::IslaResult;
use crate::formula::{Formula, InTree, PredicateArg};
use crate::grammar::{Grammar, GrammarGraph};
use crate::matching::matches;
use crate::predicates::{PredicateLibrary, SemanticOutcome};
use crate::smt::ModelValue;
use crate::tree::{DerivationTree, Path};
use crate::variable::Variable;

/// Kleene three-valued truth (§4.9, §9: "do not overload boolean
/// operators ambiguously").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    pub fn not(self) -> Truth {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }

    pub fn from_bool(b: bool) -> Truth {
        if b {
            Truth::True
        } else {
            Truth::False
        }
    }

    /// Kleene conjunction over an iterator: `FALSE` short-circuits,
    /// otherwise `UNKNOWN` dominates, else `TRUE` (§8: `all([TRUE, x]) =
    /// x`, `all([FALSE, _]) = FALSE`).
    pub fn all(items: impl IntoIterator<Item = Truth>) -> Truth {
        let mut saw_unknown = false;
        for t in items {
            match t {
                Truth::False => return Truth::False,
                Truth::Unknown => saw_unknown = true,
                Truth::True => {}
            }
        }
        if saw_unknown {
            Truth::Unknown
        } else {
            Truth::True
        }
    }

    /// Kleene disjunction: `TRUE` short-circuits, otherwise `UNKNOWN`
    /// dominates, else `FALSE` (§8: `any([FALSE, x]) = x`,
    /// `any([TRUE, _]) = TRUE`).
    pub fn any(items: impl IntoIterator<Item = Truth>) -> Truth {
        let mut saw_unknown = false;
        for t in items {
            match t {
                Truth::True => return Truth::True,
                Truth::Unknown => saw_unknown = true,
                Truth::False => {}
            }
        }
        if saw_unknown {
            Truth::Unknown
        } else {
            Truth::False
        }
    }
}

/// Read-only context an evaluation needs: the reference tree's grammar
/// (for reachability, used by the vacuous-∀ / open-∃ cases) and the
/// predicate library in scope.
pub struct EvalContext<'a> {
    pub grammar: &'a Grammar,
    pub graph: &'a GrammarGraph,
    pub predicates: &'a PredicateLibrary,
    /// Free-variable assignments already resolved (e.g. the quantifier's
    /// own constant bound by an enclosing scope).
    pub bindings: HashMap<Variable, ModelValue>,
    /// The tree position each bound variable was matched at, so
    /// structural predicates that compare positions (`before`,
    /// `same_position`, `level`) see the real path rather than the
    /// variable's value alone.
    pub positions: HashMap<Variable, Path>,
}

/// Evaluate `formula` against `tree` (§4.9). `tree` is the reference
/// tree positions are resolved against; it need not be complete — an
/// open leaf reachable from a quantifier's bound nonterminal yields
/// `Truth::Unknown` rather than a spurious vacuous truth.
pub fn evaluate(formula: &Formula, tree: &DerivationTree, ctx: &EvalContext) -> IslaResult<Truth> {
    match formula {
        Formula::True => Ok(Truth::True),
        Formula::False => Ok(Truth::False),
        Formula::Smt(atom) => evaluate_smt_atom(atom, ctx),
        Formula::Not(inner) => Ok(evaluate(inner, tree, ctx)?.not()),
        Formula::And(items) => {
            let mut acc = Truth::True;
            for item in items {
                acc = Truth::all([acc, evaluate(item, tree, ctx)?]);
                if acc == Truth::False {
                    break;
                }
            }
            Ok(acc)
        }
        Formula::Or(items) => {
            let mut acc = Truth::False;
            for item in items {
                acc = Truth::any([acc, evaluate(item, tree, ctx)?]);
                if acc == Truth::True {
                    break;
                }
            }
            Ok(acc)
        }
        Formula::StructuralPredicate(call) => evaluate_structural(call, tree, ctx),
        Formula::SemanticPredicate(call) => evaluate_semantic(call, ctx),
        Formula::ForAll(q) => evaluate_forall(q, tree, ctx),
        Formula::Exists(q) => evaluate_exists(q, tree, ctx),
        Formula::ForAllNum(q) => {
            // Numeric universals with no known constants to range over
            // are vacuously true, matching the tree-quantifier case.
            evaluate(&q.inner, tree, ctx)
        }
        Formula::ExistsNum(q) => evaluate(&q.inner, tree, ctx),
    }
}

fn evaluate_smt_atom(atom: &crate::formula::SmtAtom, ctx: &EvalContext) -> IslaResult<Truth> {
    let result = crate::smt::evaluate_ground_atom(atom, &ctx.bindings)?;
    Ok(match result {
        Some(b) => Truth::from_bool(b),
        None => Truth::Unknown,
    })
}

fn resolve_reference_tree<'a>(
    var: &Variable,
    ctx: &'a EvalContext,
    tree: &'a DerivationTree,
) -> &'a DerivationTree {
    match ctx.bindings.get(var) {
        Some(ModelValue::Tree(t)) => t,
        _ => tree,
    }
}

fn evaluate_forall(
    q: &crate::formula::QuantifiedFormula,
    tree: &DerivationTree,
    ctx: &EvalContext,
) -> IslaResult<Truth> {
    let reference = match &q.in_variable {
        InTree::Tree(t) => t,
        InTree::Variable(v) => resolve_reference_tree(v, ctx, tree),
    };
    let found = matches(q, reference);
    if found.is_empty() {
        // Vacuous truth only if nothing reachable from an open leaf
        // could still produce a match (§4.9: "if zero matches, TRUE
        // (vacuous)"); an open leaf of the right type means the real
        // answer is still pending.
        let target = q.bound_variable.n_type();
        let still_pending = reference
            .open_leaves()
            .iter()
            .any(|(_, leaf)| ctx.graph.reachable(leaf.symbol().n_type().unwrap_or(""), target));
        return Ok(if still_pending {
            Truth::Unknown
        } else {
            Truth::True
        });
    }
    let mut results = Vec::with_capacity(found.len());
    for assignment in found {
        let mut sub_ctx = EvalContext {
            grammar: ctx.grammar,
            graph: ctx.graph,
            predicates: ctx.predicates,
            bindings: ctx.bindings.clone(),
            positions: ctx.positions.clone(),
        };
        for (var, (path, subtree)) in assignment.bindings {
            sub_ctx.positions.insert(var.clone(), path);
            sub_ctx.bindings.insert(var, ModelValue::Tree(subtree));
        }
        results.push(evaluate(&q.inner, reference, &sub_ctx)?);
    }
    Ok(Truth::all(results))
}

fn evaluate_exists(
    q: &crate::formula::QuantifiedFormula,
    tree: &DerivationTree,
    ctx: &EvalContext,
) -> IslaResult<Truth> {
    let reference = match &q.in_variable {
        InTree::Tree(t) => t,
        InTree::Variable(v) => resolve_reference_tree(v, ctx, tree),
    };
    let found = matches(q, reference);
    if found.is_empty() {
        let target = q.bound_variable.n_type();
        let still_pending = reference
            .open_leaves()
            .iter()
            .any(|(_, leaf)| ctx.graph.reachable(leaf.symbol().n_type().unwrap_or(""), target));
        return Ok(if still_pending { Truth::Unknown } else { Truth::False });
    }
    let mut results = Vec::with_capacity(found.len());
    for assignment in found {
        let mut sub_ctx = EvalContext {
            grammar: ctx.grammar,
            graph: ctx.graph,
            predicates: ctx.predicates,
            bindings: ctx.bindings.clone(),
            positions: ctx.positions.clone(),
        };
        for (var, (path, subtree)) in assignment.bindings {
            sub_ctx.positions.insert(var.clone(), path);
            sub_ctx.bindings.insert(var, ModelValue::Tree(subtree));
        }
        results.push(evaluate(&q.inner, reference, &sub_ctx)?);
    }
    Ok(Truth::any(results))
}

fn ground_args(call: &crate::formula::PredicateCall, ctx: &EvalContext) -> Option<Vec<PredicateArg>> {
    call.args
        .iter()
        .map(|arg| match arg {
            PredicateArg::Bound { .. } => Some(arg.clone()),
            PredicateArg::Unbound(var) => match ctx.bindings.get(var) {
                Some(ModelValue::Tree(tree)) => Some(PredicateArg::Bound {
                    var: Some(var.clone()),
                    path: ctx.positions.get(var).cloned().unwrap_or_default(),
                    tree: tree.clone(),
                }),
                _ => None,
            },
        })
        .collect()
}

fn evaluate_structural(
    call: &crate::formula::PredicateCall,
    tree: &DerivationTree,
    ctx: &EvalContext,
) -> IslaResult<Truth> {
    let args = match ground_args(call, ctx) {
        Some(a) => a,
        None => return Ok(Truth::Unknown),
    };
    let predicate = match ctx.predicates.structural(&call.name) {
        Some(p) => p,
        None => return Ok(Truth::Unknown),
    };
    let result = predicate.evaluate(tree, &args)?;
    let result = if call.negated { !result } else { result };
    Ok(Truth::from_bool(result))
}

fn evaluate_semantic(call: &crate::formula::PredicateCall, ctx: &EvalContext) -> IslaResult<Truth> {
    let args = match ground_args(call, ctx) {
        Some(a) => a,
        None => return Ok(Truth::Unknown),
    };
    let predicate = match ctx.predicates.semantic(&call.name) {
        Some(p) => p,
        None => return Ok(Truth::Unknown),
    };
    let outcome = predicate.apply(ctx.grammar, &args)?;
    Ok(match outcome {
        SemanticOutcome::Ready(b) => Truth::from_bool(if call.negated { !b } else { b }),
        // A proposed substitution is itself evidence the predicate holds
        // under that substitution (§4.9: "if it returns a substitution,
        // apply and treat as TRUE").
        SemanticOutcome::TreeSubstitutions(_) | SemanticOutcome::NumericSubstitutions(_) => {
            if call.negated {
                Truth::False
            } else {
                Truth::True
            }
        }
        SemanticOutcome::NotReady => Truth::Unknown,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{InTree, QuantifiedFormula, SmtAtom, SmtRelation, SmtTerm};
    use crate::tree::Symbol;

    fn ctx<'a>(grammar: &'a Grammar, graph: &'a GrammarGraph, predicates: &'a PredicateLibrary) -> EvalContext<'a> {
        EvalContext {
            grammar,
            graph,
            predicates,
            bindings: HashMap::new(),
            positions: HashMap::new(),
        }
    }

    #[test]
    fn kleene_not_is_involutive_on_unknown() {
        assert_eq!(Truth::Unknown.not(), Truth::Unknown);
        assert_eq!(Truth::True.not().not(), Truth::True);
    }

    #[test]
    fn kleene_all_and_any_match_spec_laws() {
        assert_eq!(Truth::all([Truth::True, Truth::Unknown]), Truth::Unknown);
        assert_eq!(Truth::any([Truth::False, Truth::Unknown]), Truth::Unknown);
        assert_eq!(Truth::all([Truth::False, Truth::True]), Truth::False);
        assert_eq!(Truth::any([Truth::True, Truth::False]), Truth::True);
    }

    #[test]
    fn forall_over_open_tree_is_unknown_then_true_once_expanded() {
        let grammar = Grammar::new("<start>")
            .with_rule("<start>", vec![vec!["<a>".into()]])
            .with_rule("<a>", vec![vec!["X".into()]]);
        let graph = GrammarGraph::build(&grammar);
        let predicates = PredicateLibrary::standard();

        let open_tree =
            DerivationTree::inner(Symbol::nonterminal("<start>"), vec![DerivationTree::leaf(Symbol::nonterminal("<a>"))]);
        let q = QuantifiedFormula::new(
            Variable::bound("a", "<a>"),
            InTree::Variable(Variable::constant("start", "<start>")),
            Formula::Smt(SmtAtom::new(
                SmtRelation::StrEq,
                SmtTerm::Var(Variable::bound("a", "<a>")),
                SmtTerm::StrLit("X".into()),
            )),
            None,
        );
        let formula = Formula::ForAll(Box::new(q.clone()));

        let eval_ctx = ctx(&grammar, &graph, &predicates);
        assert_eq!(evaluate(&formula, &open_tree, &eval_ctx).unwrap(), Truth::Unknown);

        let complete_tree = DerivationTree::inner(
            Symbol::nonterminal("<start>"),
            vec![DerivationTree::terminal("X")],
        );
        let eval_ctx = ctx(&grammar, &graph, &predicates);
        assert_eq!(evaluate(&formula, &complete_tree, &eval_ctx).unwrap(), Truth::True);
    }
}
