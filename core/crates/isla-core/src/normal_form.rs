//! Formula normal-form invariant and splitters (§4.1).
//!
//! A DNF-like shape is maintained per disjunct: `Or(And(...), And(...), ...)`
//! where each conjunction's conjuncts appear in a fixed order — SMT atoms,
//! predicate atoms, existentials, universals. The invariant is checked
//! defensively before every solver dispatch (§9: "flag any deviation ...
//! as a defect"), mirroring the reference's `satisfies_invariant` in
//! `gensearch_2.py` rather than silently repairing a malformed formula.

use crate::error::{IslaError, IslaResult};
use crate::formula::Formula;

/// Split a disjunction into its top-level disjuncts; a non-`Or` formula
/// is its own sole disjunct.
pub fn split_disjunction(formula: &Formula) -> Vec<Formula> {
    match formula {
        Formula::Or(items) => items.clone(),
        other => vec![other.clone()],
    }
}

/// Split a conjunction into its top-level conjuncts; a non-`And` formula
/// is its own sole conjunct.
pub fn split_conjunction(formula: &Formula) -> Vec<Formula> {
    match formula {
        Formula::And(items) => items.clone(),
        other => vec![other.clone()],
    }
}

/// The four conjunct classes, in the order §4.1 mandates within a
/// disjunct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ConjunctClass {
    Smt,
    Predicate,
    Existential,
    Universal,
}

fn classify(conjunct: &Formula) -> IslaResult<ConjunctClass> {
    match conjunct {
        Formula::True | Formula::False | Formula::Smt(_) => Ok(ConjunctClass::Smt),
        Formula::StructuralPredicate(_) | Formula::SemanticPredicate(_) => Ok(ConjunctClass::Predicate),
        Formula::Not(inner) => match inner.as_ref() {
            Formula::StructuralPredicate(_) | Formula::SemanticPredicate(_) => Ok(ConjunctClass::Predicate),
            other => Err(IslaError::invariant_violation(format!(
                "negation only permitted around a predicate atom, found Not({other:?})"
            ))),
        },
        Formula::Exists(_) | Formula::ExistsNum(_) => Ok(ConjunctClass::Existential),
        Formula::ForAll(_) | Formula::ForAllNum(_) => Ok(ConjunctClass::Universal),
        Formula::And(_) => Err(IslaError::invariant_violation(
            "nested conjunction inside a conjunct",
        )),
        Formula::Or(_) => Err(IslaError::invariant_violation(
            "disjunction nested inside a conjunction",
        )),
    }
}

/// Prefix of `other`'s bound-tree path relationship: §4.1 forbids two
/// co-occurring universal formulas whose bound tree prefixes are a
/// prefix of one another. We approximate "bound tree prefix" by the
/// quantifier's bind-expression literal prefix, when present; universal
/// formulas without a bind expression never conflict under this check.
fn bind_prefix(formula: &Formula) -> Option<Vec<String>> {
    let q = match formula {
        Formula::ForAll(q) => q,
        _ => return None,
    };
    let be = q.bind_expression.as_ref()?;
    Some(
        be.elements
            .iter()
            .take_while(|e| matches!(e, crate::variable::BindElement::Literal(_)))
            .map(|e| match e {
                crate::variable::BindElement::Literal(s) => s.clone(),
                _ => unreachable!(),
            })
            .collect(),
    )
}

fn is_prefix(a: &[String], b: &[String]) -> bool {
    a.len() <= b.len() && a.iter().zip(b).all(|(x, y)| x == y)
}

/// Check that `formula` satisfies the normal-form invariant (§4.1):
/// `Or` only at the top, `And` only directly under an `Or` (or at top),
/// conjuncts ordered SMT/predicate/existential/universal, `Not` only
/// around predicate atoms, no two co-occurring universal prefixes
/// nesting.
pub fn check_invariant(formula: &Formula) -> IslaResult<()> {
    for disjunct in split_disjunction(formula) {
        let conjuncts = split_conjunction(&disjunct);
        let mut last_class = ConjunctClass::Smt;
        let mut universal_prefixes: Vec<Vec<String>> = Vec::new();
        for conjunct in &conjuncts {
            let class = classify(conjunct)?;
            if class < last_class {
                return Err(IslaError::invariant_violation(format!(
                    "conjunct order violated: {class:?} after {last_class:?}"
                )));
            }
            last_class = class;
            if class == ConjunctClass::Universal {
                if let Some(prefix) = bind_prefix(conjunct) {
                    for existing in &universal_prefixes {
                        if is_prefix(&prefix, existing) || is_prefix(existing, &prefix) {
                            return Err(IslaError::invariant_violation(
                                "two co-occurring universal formulas have nesting bound-tree prefixes",
                            ));
                        }
                    }
                    universal_prefixes.push(prefix);
                }
            }
        }
    }
    Ok(())
}

/// Reassemble a normal-form formula from its disjuncts, each already in
/// conjunct-class order, applying the flattening smart constructors.
pub fn rebuild(disjuncts: Vec<Vec<Formula>>) -> Formula {
    Formula::or(disjuncts.into_iter().map(Formula::and))
}

fn classify_soft(f: &Formula) -> ConjunctClass {
    match f {
        Formula::True | Formula::False | Formula::Smt(_) => ConjunctClass::Smt,
        Formula::StructuralPredicate(_) | Formula::SemanticPredicate(_) => ConjunctClass::Predicate,
        Formula::Not(inner) => classify_soft(inner),
        Formula::Exists(_) | Formula::ExistsNum(_) => ConjunctClass::Existential,
        Formula::ForAll(_) | Formula::ForAllNum(_) => ConjunctClass::Universal,
        // Shouldn't occur once `Formula::and`'s flattening has run, but
        // sort last rather than panic if an elimination pass nested one.
        Formula::And(_) | Formula::Or(_) => ConjunctClass::Universal,
    }
}

/// Restore conjunct-class order after an elimination pass splices an
/// instantiated quantifier body into the middle of a conjunction — the
/// spliced body's own conjuncts need not already respect the global
/// order, only the reassembled whole does (§4.1). A stable sort keeps
/// same-class conjuncts in their original relative order.
pub fn reorder(formula: Formula) -> Formula {
    match formula {
        Formula::Or(items) => Formula::or(items.into_iter().map(reorder)),
        Formula::And(items) => {
            let mut items = items;
            items.sort_by_key(classify_soft);
            Formula::and(items)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{PredicateArg, PredicateCall, SmtAtom, SmtRelation, SmtTerm};
    use crate::variable::Variable;

    fn smt(name: &str) -> Formula {
        Formula::Smt(SmtAtom::new(
            SmtRelation::StrEq,
            SmtTerm::Var(Variable::constant(name, "<var>")),
            SmtTerm::StrLit("x".into()),
        ))
    }

    fn predicate(name: &str) -> Formula {
        Formula::StructuralPredicate(PredicateCall::new(
            name,
            vec![PredicateArg::Unbound(Variable::constant("a", "<var>"))],
        ))
    }

    #[test]
    fn accepts_smt_then_predicate_order() {
        let conj = Formula::and(vec![smt("a"), predicate("before")]);
        assert!(check_invariant(&conj).is_ok());
    }

    #[test]
    fn rejects_predicate_before_smt() {
        let conj = Formula::And(vec![predicate("before"), smt("a")]);
        assert!(check_invariant(&conj).is_err());
    }

    #[test]
    fn rejects_nested_and() {
        let bad = Formula::And(vec![Formula::And(vec![smt("a")])]);
        assert!(check_invariant(&bad).is_err());
    }

    #[test]
    fn split_disjunction_and_conjunction_roundtrip() {
        let f = Formula::or(vec![
            Formula::and(vec![smt("a")]),
            Formula::and(vec![smt("b")]),
        ]);
        let disjuncts: Vec<Vec<Formula>> = split_disjunction(&f)
            .iter()
            .map(split_conjunction)
            .collect();
        assert_eq!(disjuncts.len(), 2);
        assert_eq!(rebuild(disjuncts), f);
    }

    #[test]
    fn reorder_restores_class_order_after_splicing() {
        let spliced = Formula::And(vec![predicate("before"), smt("a")]);
        let reordered = reorder(spliced);
        assert!(check_invariant(&reordered).is_ok());
    }
}
