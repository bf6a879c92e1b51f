//! Predicate instantiation (§4.3 step 1), universal matching (§4.6),
//! existential elimination via tree insertion (§4.5), and quantifier
//! elimination for evaluation under assumptions (§4.10).
//!
//! §9's cyclic-reference note ("formulas reference tree nodes by value
//! or by id") is realized here as a `Variable -> Path` position map
//! threaded alongside a [`crate::formula::Formula`]: a variable is
//! "grounded" once its path into the *current* tree is known, whether
//! that path came from a universal match or from an existential's fresh
//! constant. Two matches of the same quantifier must not collide in one
//! flat map, so each match gets its own alpha-renamed copy of the bound
//! variable(s) before its position is recorded — mirroring how a real
//! interpreter would rename a loop variable per iteration rather than
//! reuse one binding cell.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::IslaResult;
use crate::formula::{Formula, InTree, PredicateArg, PredicateCall, QuantifiedFormula, SmtAtom, SmtTerm};
use crate::grammar::{Grammar, GrammarGraph};
use crate::matching::matches;
use crate::predicates::{PredicateLibrary, SemanticOutcome};
use crate::tree::{DerivationTree, NodeId, Path, Symbol};
use crate::variable::{BindElement, Variable};

static NEXT_MARKER: AtomicU64 = AtomicU64::new(1);

fn fresh_constant(n_type: &str) -> Variable {
    let id = NEXT_MARKER.fetch_add(1, Ordering::Relaxed);
    Variable::constant(format!("{n_type}__fresh{id}").replace(['<', '>'], ""), n_type)
}

/// Resolve `var`'s current subtree, if its position is known.
pub fn resolve<'a>(var: &Variable, tree: &'a DerivationTree, positions: &HashMap<Variable, Path>) -> Option<&'a DerivationTree> {
    positions.get(var).and_then(|path| tree.get(path))
}

fn rename_term(term: &SmtTerm, renaming: &HashMap<Variable, Variable>) -> SmtTerm {
    match term {
        SmtTerm::Var(v) => SmtTerm::Var(renaming.get(v).cloned().unwrap_or_else(|| v.clone())),
        SmtTerm::StrLit(s) => SmtTerm::StrLit(s.clone()),
        SmtTerm::IntLit(n) => SmtTerm::IntLit(*n),
        SmtTerm::Length(inner) => SmtTerm::Length(Box::new(rename_term(inner, renaming))),
    }
}

fn rename_call(call: &PredicateCall, renaming: &HashMap<Variable, Variable>) -> PredicateCall {
    PredicateCall {
        name: call.name.clone(),
        negated: call.negated,
        args: call
            .args
            .iter()
            .map(|a| match a {
                PredicateArg::Unbound(v) => PredicateArg::Unbound(renaming.get(v).cloned().unwrap_or_else(|| v.clone())),
                bound => bound.clone(),
            })
            .collect(),
    }
}

/// Replace every occurrence of a renamed variable throughout `formula`,
/// leaving nested quantifiers' own binders untouched (they introduce a
/// fresh scope; §9 forbids implicit mutation, so this always returns a
/// new value).
pub(crate) fn alpha_rename(formula: &Formula, renaming: &HashMap<Variable, Variable>) -> Formula {
    match formula {
        Formula::True | Formula::False => formula.clone(),
        Formula::Smt(atom) => Formula::Smt(crate::formula::SmtAtom {
            relation: atom.relation,
            lhs: rename_term(&atom.lhs, renaming),
            rhs: rename_term(&atom.rhs, renaming),
            negated: atom.negated,
        }),
        Formula::StructuralPredicate(call) => Formula::StructuralPredicate(rename_call(call, renaming)),
        Formula::SemanticPredicate(call) => Formula::SemanticPredicate(rename_call(call, renaming)),
        Formula::Not(inner) => Formula::Not(Box::new(alpha_rename(inner, renaming))),
        Formula::And(items) => Formula::And(items.iter().map(|f| alpha_rename(f, renaming)).collect()),
        Formula::Or(items) => Formula::Or(items.iter().map(|f| alpha_rename(f, renaming)).collect()),
        Formula::ForAll(q) => Formula::ForAll(Box::new(q.with_inner(alpha_rename(&q.inner, renaming)))),
        Formula::Exists(q) => Formula::Exists(Box::new(q.with_inner(alpha_rename(&q.inner, renaming)))),
        Formula::ForAllNum(q) => Formula::ForAllNum(Box::new(q.with_inner(alpha_rename(&q.inner, renaming)))),
        Formula::ExistsNum(q) => Formula::ExistsNum(Box::new(q.with_inner(alpha_rename(&q.inner, renaming)))),
    }
}

// ---------------------------------------------------------------------
// §4.3 step 1 — predicate instantiation
// ---------------------------------------------------------------------

fn ground_call_args(call: &PredicateCall, tree: &DerivationTree, positions: &HashMap<Variable, Path>) -> Vec<PredicateArg> {
    call.args
        .iter()
        .map(|arg| match arg {
            PredicateArg::Bound { .. } => arg.clone(),
            PredicateArg::Unbound(v) => match positions.get(v).and_then(|p| tree.get(p).map(|t| (p, t))) {
                Some((path, subtree)) => PredicateArg::Bound {
                    var: Some(v.clone()),
                    path: path.clone(),
                    tree: subtree.clone(),
                },
                None => arg.clone(),
            },
        })
        .collect()
}

/// Ground and evaluate every top-level structural predicate whose
/// arguments are all resolvable, and apply every semantic predicate that
/// is ready (§4.3 step 1). `numeric` accumulates constants bound by
/// `NumericSubstitutions` (e.g. `octal_to_decimal`'s output); its own
/// substitutions are not tree positions, so they never enter
/// `positions`. `tree_substitutions` accumulates proposed rewrites from
/// `TreeSubstitutions` (e.g. `rjust_crop`'s padded literal) — these are
/// tree rewrites, not formula rewrites (§4.4), so the caller applies them
/// to the tree itself and re-runs instantiation afterward; the predicate
/// call itself is left as-is here (still ungrounded) until that rewrite
/// actually lands and the call is re-evaluated against the new tree.
pub fn instantiate_predicates(
    formula: &Formula,
    reference_tree: &DerivationTree,
    positions: &HashMap<Variable, Path>,
    numeric: &mut HashMap<Variable, i64>,
    tree_substitutions: &mut Vec<(Variable, DerivationTree)>,
    library: &PredicateLibrary,
    grammar: &Grammar,
) -> IslaResult<Formula> {
    match formula {
        Formula::True | Formula::False | Formula::Smt(_) => Ok(formula.clone()),
        Formula::Not(inner) => {
            let instantiated = instantiate_predicates(inner, reference_tree, positions, numeric, tree_substitutions, library, grammar)?;
            Ok(instantiated.negate())
        }
        Formula::And(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(instantiate_predicates(item, reference_tree, positions, numeric, tree_substitutions, library, grammar)?);
            }
            Ok(Formula::and(out))
        }
        Formula::Or(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(instantiate_predicates(item, reference_tree, positions, numeric, tree_substitutions, library, grammar)?);
            }
            Ok(Formula::or(out))
        }
        Formula::ForAll(q) => Ok(Formula::ForAll(Box::new(q.with_inner(instantiate_predicates(
            &q.inner,
            reference_tree,
            positions,
            numeric,
            tree_substitutions,
            library,
            grammar,
        )?)))),
        Formula::Exists(q) => Ok(Formula::Exists(Box::new(q.with_inner(instantiate_predicates(
            &q.inner,
            reference_tree,
            positions,
            numeric,
            tree_substitutions,
            library,
            grammar,
        )?)))),
        Formula::ForAllNum(q) => Ok(Formula::ForAllNum(Box::new(q.with_inner(instantiate_predicates(
            &q.inner,
            reference_tree,
            positions,
            numeric,
            tree_substitutions,
            library,
            grammar,
        )?)))),
        Formula::ExistsNum(q) => Ok(Formula::ExistsNum(Box::new(q.with_inner(instantiate_predicates(
            &q.inner,
            reference_tree,
            positions,
            numeric,
            tree_substitutions,
            library,
            grammar,
        )?)))),
        Formula::StructuralPredicate(call) => {
            let args = ground_call_args(call, reference_tree, positions);
            if args.iter().all(PredicateArg::is_bound) {
                let predicate = match library.structural(&call.name) {
                    Some(p) => p,
                    None => return Ok(Formula::StructuralPredicate(PredicateCall { args, ..call.clone() })),
                };
                let result = predicate.evaluate(reference_tree, &args)?;
                let result = if call.negated { !result } else { result };
                Ok(if result { Formula::True } else { Formula::False })
            } else {
                Ok(Formula::StructuralPredicate(PredicateCall { args, ..call.clone() }))
            }
        }
        Formula::SemanticPredicate(call) => {
            let args = ground_call_args(call, reference_tree, positions);
            if !args.iter().all(PredicateArg::is_bound) {
                return Ok(Formula::SemanticPredicate(PredicateCall { args, ..call.clone() }));
            }
            let predicate = match library.semantic(&call.name) {
                Some(p) => p,
                None => return Ok(Formula::SemanticPredicate(PredicateCall { args, ..call.clone() })),
            };
            match predicate.apply(grammar, &args)? {
                SemanticOutcome::Ready(b) => {
                    let b = if call.negated { !b } else { b };
                    Ok(if b { Formula::True } else { Formula::False })
                }
                SemanticOutcome::NumericSubstitutions(subst) => {
                    numeric.extend(subst);
                    Ok(if call.negated { Formula::False } else { Formula::True })
                }
                SemanticOutcome::TreeSubstitutions(subst) => {
                    tree_substitutions.extend(subst);
                    Ok(Formula::SemanticPredicate(PredicateCall { args, ..call.clone() }))
                }
                SemanticOutcome::NotReady => Ok(Formula::SemanticPredicate(PredicateCall { args, ..call.clone() })),
            }
        }
    }
}

// ---------------------------------------------------------------------
// §4.6 — universal matching
// ---------------------------------------------------------------------

pub enum UniversalOutcome {
    /// No new match yet, but the bound nonterminal remains reachable
    /// through an open leaf — fall through to expansion (§4.6).
    NoNewMatches,
    /// The bound nonterminal is unreachable from every open leaf and no
    /// new matches were found: `q` contributes nothing further
    /// (vacuous truth).
    Discarded,
    /// One or more new matches were instantiated; `formula` is the
    /// conjunction to splice in (instantiations, plus `q` itself
    /// retained unless the nonterminal became unreachable).
    Replaced {
        formula: Formula,
        new_positions: Vec<(Variable, Path)>,
        matched_ids: Vec<NodeId>,
    },
}

fn reachable_from_open_leaf(tree: &DerivationTree, graph: &GrammarGraph, target: &str) -> bool {
    tree.open_leaves()
        .iter()
        .any(|(_, leaf)| leaf.symbol().n_type().is_some_and(|nt| graph.reachable(nt, target)))
}

/// Apply §4.6 to one universal formula `q` against `tree`, skipping
/// positions already in `already_matched`.
pub fn eliminate_universal(
    q: &QuantifiedFormula,
    tree: &DerivationTree,
    already_matched: &std::collections::HashSet<NodeId>,
    graph: &GrammarGraph,
) -> UniversalOutcome {
    let target = q.bound_variable.n_type();
    let found: Vec<_> = matches(q, tree)
        .into_iter()
        .filter(|m| !already_matched.contains(&m.matched_node))
        .collect();

    let still_reachable = reachable_from_open_leaf(tree, graph, target);

    if found.is_empty() {
        return if still_reachable {
            UniversalOutcome::NoNewMatches
        } else {
            UniversalOutcome::Discarded
        };
    }

    let mut instantiations = Vec::with_capacity(found.len());
    let mut new_positions = Vec::new();
    let mut matched_ids = Vec::new();
    for assignment in found {
        let mut renaming = HashMap::new();
        for (var, (path, _)) in &assignment.bindings {
            let fresh = Variable::bound(format!("{}__m{}", var.name(), assignment.matched_node), var.n_type());
            renaming.insert(var.clone(), fresh.clone());
            new_positions.push((fresh, path.clone()));
        }
        matched_ids.push(assignment.matched_node);
        instantiations.push(alpha_rename(&q.inner, &renaming));
    }

    let mut conjuncts = instantiations;
    if still_reachable {
        conjuncts.push(Formula::ForAll(Box::new(q.clone())));
    }

    UniversalOutcome::Replaced {
        formula: Formula::and(conjuncts),
        new_positions,
        matched_ids,
    }
}

// ---------------------------------------------------------------------
// §4.5 — existential elimination via tree insertion
// ---------------------------------------------------------------------

pub struct ExistentialSuccessor {
    pub replacement: Formula,
    pub tree: DerivationTree,
    pub new_positions: Vec<(Variable, Path)>,
}

fn build_bind_shape(be: &crate::variable::BindExpression, renaming: &mut HashMap<Variable, Variable>) -> Vec<DerivationTree> {
    be.elements
        .iter()
        .map(|el| match el {
            BindElement::Literal(text) => DerivationTree::terminal(text.clone()),
            BindElement::Variable(v) => {
                let fresh = fresh_constant(v.n_type());
                renaming.insert(v.clone(), fresh.clone());
                DerivationTree::inner(Symbol::Variable(fresh), vec![DerivationTree::leaf(Symbol::nonterminal(v.n_type()))])
            }
        })
        .collect()
}

/// All ways to satisfy `∃ x:N in r. ψ(x)` by inserting a fresh constant
/// of type `N` into `reference` (§4.5): either by tagging an
/// already-open leaf of that type, or by expanding some other open leaf
/// one level when that expansion directly produces a child of type `N`.
/// Each candidate wraps the chosen position in a `Symbol::Variable`
/// marker node whose sole child is an ordinary open nonterminal leaf —
/// that child remains reachable by the usual expansion pass (§4.7),
/// while the marker itself stays put so the constant's position can
/// always be recovered later by [`resolve`].
pub fn eliminate_existential(q: &QuantifiedFormula, reference: &DerivationTree, grammar: &Grammar) -> Vec<ExistentialSuccessor> {
    let target_type = q.bound_variable.n_type();
    let mut out = Vec::new();

    for (path, leaf) in reference.open_concrete_leaves() {
        if leaf.symbol().n_type() != Some(target_type) {
            continue;
        }
        let c = fresh_constant(target_type);
        let mut renaming = HashMap::new();
        renaming.insert(q.bound_variable.clone(), c.clone());
        let inserted = match &q.bind_expression {
            None => DerivationTree::inner(Symbol::Variable(c.clone()), vec![DerivationTree::leaf(Symbol::nonterminal(target_type))]),
            Some(be) => DerivationTree::inner(Symbol::Variable(c.clone()), build_bind_shape(be, &mut renaming)),
        };
        let new_tree = reference.replace(&path, inserted);
        let mut new_positions = Vec::new();
        if let Some(p) = new_tree.find_variable(&c) {
            new_positions.push((c, p));
        }
        for (orig, renamed) in &renaming {
            if orig == &q.bound_variable {
                continue;
            }
            if let Some(p) = new_tree.find_variable(renamed) {
                new_positions.push((renamed.clone(), p));
            }
        }
        out.push(ExistentialSuccessor {
            replacement: alpha_rename(&q.inner, &renaming),
            tree: new_tree,
            new_positions,
        });
    }

    for (path, leaf) in reference.open_concrete_leaves() {
        let Symbol::Nonterminal(name) = leaf.symbol().clone() else { continue };
        let alternatives = match grammar.alternatives(&name) {
            Ok(alts) => alts,
            Err(_) => continue,
        };
        for alt in alternatives {
            let children = Grammar::instantiate_alternative(alt);
            for (i, child) in children.iter().enumerate() {
                if child.symbol().n_type() != Some(target_type) || !child.is_open_concrete() {
                    continue;
                }
                let c = fresh_constant(target_type);
                let mut renaming = HashMap::new();
                renaming.insert(q.bound_variable.clone(), c.clone());
                let mut new_children = children.clone();
                new_children[i] = match &q.bind_expression {
                    None => DerivationTree::inner(Symbol::Variable(c.clone()), vec![child.clone()]),
                    Some(be) => DerivationTree::inner(Symbol::Variable(c.clone()), build_bind_shape(be, &mut renaming)),
                };
                let expanded = DerivationTree::inner(Symbol::nonterminal(name.clone()), new_children);
                let new_tree = reference.replace(&path, expanded);
                let mut new_positions = Vec::new();
                if let Some(p) = new_tree.find_variable(&c) {
                    new_positions.push((c, p));
                }
                for (orig, renamed) in &renaming {
                    if orig == &q.bound_variable {
                        continue;
                    }
                    if let Some(p) = new_tree.find_variable(renamed) {
                        new_positions.push((renamed.clone(), p));
                    }
                }
                out.push(ExistentialSuccessor {
                    replacement: alpha_rename(&q.inner, &renaming),
                    tree: new_tree,
                    new_positions,
                });
            }
        }
    }

    out
}

// ---------------------------------------------------------------------
// §4.10 — quantifier elimination for evaluation under assumptions
// ---------------------------------------------------------------------

/// Rewrite `formula` into a quantifier-reduced form suitable for
/// re-evaluation under a (possibly still partial) `tree`: every
/// tree-quantifier whose bound nonterminal is no longer reachable from
/// an open leaf is expanded into the conjunction/disjunction of its
/// current matches (soundly dropping it only when no further match
/// could appear); quantifiers still reachable are kept as-is so later
/// evaluation can correctly report `Unknown` rather than a premature
/// vacuous truth.
pub fn eliminate_quantifiers(formula: &Formula, tree: &DerivationTree, graph: &GrammarGraph) -> Formula {
    match formula {
        Formula::True | Formula::False | Formula::Smt(_) | Formula::StructuralPredicate(_) | Formula::SemanticPredicate(_) => {
            formula.clone()
        }
        Formula::Not(inner) => Formula::Not(Box::new(eliminate_quantifiers(inner, tree, graph))),
        Formula::And(items) => Formula::and(items.iter().map(|f| eliminate_quantifiers(f, tree, graph))),
        Formula::Or(items) => Formula::or(items.iter().map(|f| eliminate_quantifiers(f, tree, graph))),
        Formula::ForAll(q) | Formula::Exists(q) => {
            let is_forall = matches!(formula, Formula::ForAll(_));
            let reference = match &q.in_variable {
                InTree::Tree(t) => t,
                InTree::Variable(_) => tree,
            };
            if reachable_from_open_leaf(reference, graph, q.bound_variable.n_type()) {
                return formula.clone();
            }
            let found = matches(q, reference);
            let instantiations: Vec<Formula> = found
                .into_iter()
                .map(|assignment| {
                    let grounded = ground_formula(&q.inner, &assignment.bindings);
                    eliminate_quantifiers(&grounded, reference, graph)
                })
                .collect();
            if is_forall {
                Formula::and(instantiations)
            } else {
                Formula::or(instantiations)
            }
        }
        Formula::ForAllNum(q) => Formula::ForAllNum(Box::new(
            q.with_inner(eliminate_quantifiers(&q.inner, tree, graph)),
        )),
        Formula::ExistsNum(q) => Formula::ExistsNum(Box::new(
            q.with_inner(eliminate_quantifiers(&q.inner, tree, graph)),
        )),
    }
}

/// Substitute every occurrence of a just-matched variable in `formula`
/// with its concrete `(path, subtree)` binding: an `SmtTerm::Var` becomes
/// a string literal of the subtree's yield, an unbound predicate
/// argument becomes a grounded one. Variables not in `subst` (e.g. a
/// nested quantifier's own binder) are left untouched.
fn ground_formula(formula: &Formula, subst: &HashMap<Variable, (Path, DerivationTree)>) -> Formula {
    match formula {
        Formula::True => Formula::True,
        Formula::False => Formula::False,
        Formula::Smt(atom) => Formula::Smt(ground_smt_atom(atom, subst)),
        Formula::StructuralPredicate(call) => Formula::StructuralPredicate(ground_predicate_call(call, subst)),
        Formula::SemanticPredicate(call) => Formula::SemanticPredicate(ground_predicate_call(call, subst)),
        Formula::Not(inner) => Formula::Not(Box::new(ground_formula(inner, subst))),
        Formula::And(items) => Formula::And(items.iter().map(|f| ground_formula(f, subst)).collect()),
        Formula::Or(items) => Formula::Or(items.iter().map(|f| ground_formula(f, subst)).collect()),
        Formula::ForAll(q) => Formula::ForAll(Box::new(q.with_inner(ground_formula(&q.inner, subst)))),
        Formula::Exists(q) => Formula::Exists(Box::new(q.with_inner(ground_formula(&q.inner, subst)))),
        Formula::ForAllNum(q) => Formula::ForAllNum(Box::new(q.with_inner(ground_formula(&q.inner, subst)))),
        Formula::ExistsNum(q) => Formula::ExistsNum(Box::new(q.with_inner(ground_formula(&q.inner, subst)))),
    }
}

fn ground_smt_term(term: &SmtTerm, subst: &HashMap<Variable, (Path, DerivationTree)>) -> SmtTerm {
    match term {
        SmtTerm::Var(v) => match subst.get(v) {
            Some((_, tree)) => SmtTerm::StrLit(tree.yield_str()),
            None => term.clone(),
        },
        SmtTerm::StrLit(_) | SmtTerm::IntLit(_) => term.clone(),
        SmtTerm::Length(inner) => SmtTerm::Length(Box::new(ground_smt_term(inner, subst))),
    }
}

fn ground_smt_atom(atom: &SmtAtom, subst: &HashMap<Variable, (Path, DerivationTree)>) -> SmtAtom {
    SmtAtom {
        relation: atom.relation,
        lhs: ground_smt_term(&atom.lhs, subst),
        rhs: ground_smt_term(&atom.rhs, subst),
        negated: atom.negated,
    }
}

fn ground_predicate_call(call: &PredicateCall, subst: &HashMap<Variable, (Path, DerivationTree)>) -> PredicateCall {
    let args = call
        .args
        .iter()
        .map(|arg| match arg {
            PredicateArg::Unbound(v) => match subst.get(v) {
                Some((path, tree)) => PredicateArg::Bound {
                    var: Some(v.clone()),
                    path: path.clone(),
                    tree: tree.clone(),
                },
                None => arg.clone(),
            },
            PredicateArg::Bound { .. } => arg.clone(),
        })
        .collect();
    PredicateCall { args, ..call.clone() }
}
