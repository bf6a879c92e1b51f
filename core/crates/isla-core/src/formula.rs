//! The constraint formula AST (§2, §3).
//!
//! A closed, tagged-variant ADT matched exhaustively by every pass —
//! following the teacher's `model_checker.rs` `TemporalFormula` enum and
//! `property_types.rs` `FormulaStructure` enum, both boxed-recursive
//! enums deriving `Debug, Clone` rather than an open trait-object
//! hierarchy (§9: "forbid open inheritance hierarchies").

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::tree::{DerivationTree, Path};
use crate::variable::{BindExpression, Variable};

/// Stable identity for a quantifier node, used to key `already_matched`
/// (§3). Minted once per syntactically distinct quantifier; quantifiers
/// that survive unconsumed through the solve (§4.6: "replace q ...
/// conjoined with q itself retained") keep their id by being cloned, not
/// reconstructed.
pub type QuantifierId = u64;

static NEXT_QID: AtomicU64 = AtomicU64::new(1);

fn fresh_qid() -> QuantifierId {
    NEXT_QID.fetch_add(1, Ordering::Relaxed)
}

/// A term in the quantifier-free string/number theory (§4.4).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SmtTerm {
    Var(Variable),
    StrLit(String),
    IntLit(i64),
    Length(Box<SmtTerm>),
}

impl SmtTerm {
    fn free_variables(&self, out: &mut HashSet<Variable>) {
        match self {
            SmtTerm::Var(v) => {
                out.insert(v.clone());
            }
            SmtTerm::StrLit(_) | SmtTerm::IntLit(_) => {}
            SmtTerm::Length(inner) => inner.free_variables(out),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmtRelation {
    StrEq,
    NumEq,
    NumLe,
    NumLt,
    NumGe,
    NumGt,
}

/// A pure, atomic string-theory formula (§4.1: "no nested SMT logical
/// connectives/quantifiers inside a single SMT atom"). Negation is
/// carried as a flag on the atom itself rather than via [`Formula::Not`],
/// since SMT atoms must stay atomic under the normal-form invariant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SmtAtom {
    pub relation: SmtRelation,
    pub lhs: SmtTerm,
    pub rhs: SmtTerm,
    pub negated: bool,
}

impl SmtAtom {
    pub fn new(relation: SmtRelation, lhs: SmtTerm, rhs: SmtTerm) -> Self {
        Self {
            relation,
            lhs,
            rhs,
            negated: false,
        }
    }

    pub fn negate(&self) -> Self {
        Self {
            negated: !self.negated,
            ..self.clone()
        }
    }

    pub fn free_variables(&self) -> HashSet<Variable> {
        let mut out = HashSet::new();
        self.lhs.free_variables(&mut out);
        self.rhs.free_variables(&mut out);
        out
    }
}

/// A grounded-or-not argument to a structural/semantic predicate call
/// (§6: "Arguments are paths or trees").
///
/// `Bound` keeps the originating `Variable`, when there was one, so a
/// semantic predicate's proposed substitution (§6: "may propose tree
/// updates") can be applied back against the right key — grounding a
/// predicate call (§4.3) resolves positions, it does not forget which
/// quantified variable a position came from. Literal arguments (e.g. a
/// width or a padding character written directly into the constraint)
/// are `Bound` with `var: None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PredicateArg {
    Unbound(Variable),
    Bound {
        var: Option<Variable>,
        path: Path,
        tree: DerivationTree,
    },
}

impl PredicateArg {
    pub fn is_bound(&self) -> bool {
        matches!(self, PredicateArg::Bound { .. })
    }

    pub fn literal(tree: DerivationTree) -> Self {
        PredicateArg::Bound {
            var: None,
            path: Path::new(),
            tree,
        }
    }
}

/// A call to a named structural or semantic predicate (§6).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PredicateCall {
    pub name: String,
    pub args: Vec<PredicateArg>,
    /// Negation, permitted only immediately around a predicate atom
    /// (§4.1).
    pub negated: bool,
}

impl PredicateCall {
    pub fn new(name: impl Into<String>, args: Vec<PredicateArg>) -> Self {
        Self {
            name: name.into(),
            args,
            negated: false,
        }
    }

    pub fn is_grounded(&self) -> bool {
        self.args.iter().all(PredicateArg::is_bound)
    }

    pub fn free_variables(&self) -> HashSet<Variable> {
        self.args
            .iter()
            .filter_map(|a| match a {
                PredicateArg::Unbound(v) => Some(v.clone()),
                PredicateArg::Bound { .. } => None,
            })
            .collect()
    }
}

/// A tree-quantifier's range: either still a free variable awaiting
/// substitution, or already a concrete tree (for ground formulas, §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InTree {
    Variable(Variable),
    Tree(DerivationTree),
}

/// A universal or existential quantifier over tree positions (§2, §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuantifiedFormula {
    pub id: QuantifierId,
    pub bound_variable: Variable,
    pub in_variable: InTree,
    pub inner: Box<Formula>,
    pub bind_expression: Option<BindExpression>,
}

impl QuantifiedFormula {
    pub fn new(
        bound_variable: Variable,
        in_variable: InTree,
        inner: Formula,
        bind_expression: Option<BindExpression>,
    ) -> Self {
        Self {
            id: fresh_qid(),
            bound_variable,
            in_variable,
            inner: Box::new(inner),
            bind_expression,
        }
    }

    /// A copy with the same id and binder, but a rewritten inner formula
    /// — used by elimination passes that only transform the body (§4.3,
    /// §4.6), which must not mint a new quantifier identity.
    pub fn with_inner(&self, inner: Formula) -> Self {
        Self {
            id: self.id,
            bound_variable: self.bound_variable.clone(),
            in_variable: self.in_variable.clone(),
            inner: Box::new(inner),
            bind_expression: self.bind_expression.clone(),
        }
    }

    /// A copy with a fresh id and dualized inner formula, used when
    /// pushing negation through a quantifier (¬∀x.φ ≡ ∃x.¬φ).
    fn dualized(&self) -> Self {
        Self {
            id: fresh_qid(),
            bound_variable: self.bound_variable.clone(),
            in_variable: self.in_variable.clone(),
            inner: Box::new(self.inner.negate()),
            bind_expression: self.bind_expression.clone(),
        }
    }
}

/// A numeric quantifier, ranging over known numeric constants rather
/// than tree positions (§2, §4.10).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NumericQuantifiedFormula {
    pub id: QuantifierId,
    pub bound_variable: Variable,
    pub inner: Box<Formula>,
}

impl NumericQuantifiedFormula {
    pub fn new(bound_variable: Variable, inner: Formula) -> Self {
        debug_assert!(bound_variable.is_numeric());
        Self {
            id: fresh_qid(),
            bound_variable,
            inner: Box::new(inner),
        }
    }

    fn dualized(&self) -> Self {
        Self {
            id: fresh_qid(),
            bound_variable: self.bound_variable.clone(),
            inner: Box::new(self.inner.negate()),
        }
    }

    /// See [`QuantifiedFormula::with_inner`].
    pub fn with_inner(&self, inner: Formula) -> Self {
        Self {
            id: self.id,
            bound_variable: self.bound_variable.clone(),
            inner: Box::new(inner),
        }
    }
}

/// The constraint language formula AST (§2).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Formula {
    True,
    False,
    Smt(SmtAtom),
    StructuralPredicate(PredicateCall),
    SemanticPredicate(PredicateCall),
    And(Vec<Formula>),
    Or(Vec<Formula>),
    /// Only ever wraps a predicate-atom formula; enforced by the smart
    /// constructors here and checked defensively by
    /// [`crate::normal_form::check_invariant`].
    Not(Box<Formula>),
    ForAll(Box<QuantifiedFormula>),
    Exists(Box<QuantifiedFormula>),
    ForAllNum(Box<NumericQuantifiedFormula>),
    ExistsNum(Box<NumericQuantifiedFormula>),
}

impl Formula {
    pub fn and(items: impl IntoIterator<Item = Formula>) -> Formula {
        let mut flat = Vec::new();
        for item in items {
            match item {
                Formula::True => {}
                Formula::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.is_empty() {
            Formula::True
        } else if flat.len() == 1 {
            flat.into_iter().next().unwrap()
        } else if flat.iter().any(|f| *f == Formula::False) {
            Formula::False
        } else {
            Formula::And(flat)
        }
    }

    pub fn or(items: impl IntoIterator<Item = Formula>) -> Formula {
        let mut flat = Vec::new();
        for item in items {
            match item {
                Formula::False => {}
                Formula::Or(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.is_empty() {
            Formula::False
        } else if flat.len() == 1 {
            flat.into_iter().next().unwrap()
        } else if flat.iter().any(|f| *f == Formula::True) {
            Formula::True
        } else {
            Formula::Or(flat)
        }
    }

    /// Negation, pushed all the way to the leaves (predicate atoms and
    /// SMT atoms) so the result still satisfies §4.1's normal-form
    /// invariant.
    pub fn negate(&self) -> Formula {
        match self {
            Formula::True => Formula::False,
            Formula::False => Formula::True,
            Formula::Smt(atom) => Formula::Smt(atom.negate()),
            Formula::StructuralPredicate(_) | Formula::SemanticPredicate(_) => {
                Formula::Not(Box::new(self.clone()))
            }
            Formula::Not(inner) => (**inner).clone(),
            Formula::And(items) => Formula::or(items.iter().map(Formula::negate)),
            Formula::Or(items) => Formula::and(items.iter().map(Formula::negate)),
            Formula::ForAll(q) => Formula::Exists(Box::new(q.dualized())),
            Formula::Exists(q) => Formula::ForAll(Box::new(q.dualized())),
            Formula::ForAllNum(q) => Formula::ExistsNum(Box::new(q.dualized())),
            Formula::ExistsNum(q) => Formula::ForAllNum(Box::new(q.dualized())),
        }
    }

    pub fn free_variables(&self) -> HashSet<Variable> {
        match self {
            Formula::True | Formula::False => HashSet::new(),
            Formula::Smt(atom) => atom.free_variables(),
            Formula::StructuralPredicate(p) | Formula::SemanticPredicate(p) => p.free_variables(),
            Formula::Not(inner) => inner.free_variables(),
            Formula::And(items) | Formula::Or(items) => {
                items.iter().flat_map(Formula::free_variables).collect()
            }
            Formula::ForAll(q) | Formula::Exists(q) => {
                let mut fv = q.inner.free_variables();
                fv.remove(&q.bound_variable);
                if let InTree::Variable(v) = &q.in_variable {
                    fv.insert(v.clone());
                }
                if let Some(be) = &q.bind_expression {
                    for bv in be.bound_variables() {
                        fv.remove(bv);
                    }
                }
                fv
            }
            Formula::ForAllNum(q) | Formula::ExistsNum(q) => {
                let mut fv = q.inner.free_variables();
                fv.remove(&q.bound_variable);
                fv
            }
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Formula::True)
    }

    pub fn is_false(&self) -> bool {
        matches!(self, Formula::False)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(name: &str) -> Variable {
        Variable::constant(name, "<var>")
    }

    #[test]
    fn negate_is_involutive_for_predicate_atoms() {
        let atom = Formula::StructuralPredicate(PredicateCall::new(
            "before",
            vec![PredicateArg::Unbound(u("a")), PredicateArg::Unbound(u("b"))],
        ));
        assert_eq!(atom.negate().negate(), atom);
    }

    #[test]
    fn negate_pushes_through_and_via_de_morgan() {
        let a = Formula::Smt(SmtAtom::new(
            SmtRelation::StrEq,
            SmtTerm::Var(u("a")),
            SmtTerm::StrLit("x".into()),
        ));
        let b = Formula::Smt(SmtAtom::new(
            SmtRelation::StrEq,
            SmtTerm::Var(u("b")),
            SmtTerm::StrLit("y".into()),
        ));
        let conj = Formula::and(vec![a.clone(), b.clone()]);
        let negated = conj.negate();
        match negated {
            Formula::Or(items) => {
                assert_eq!(items.len(), 2);
            }
            other => panic!("expected Or, got {other:?}"),
        }
    }

    #[test]
    fn and_flattens_and_absorbs_true() {
        let f = Formula::and(vec![Formula::True, Formula::False]);
        assert!(f.is_false());
    }

    #[test]
    fn quantifier_negation_dualizes_and_mints_fresh_id() {
        let inner = Formula::Smt(SmtAtom::new(
            SmtRelation::StrEq,
            SmtTerm::Var(Variable::bound("x", "<var>")),
            SmtTerm::StrLit("a".into()),
        ));
        let q = QuantifiedFormula::new(
            Variable::bound("x", "<var>"),
            InTree::Variable(u("start")),
            inner,
            None,
        );
        let id = q.id;
        let negated = Formula::ForAll(Box::new(q)).negate();
        match negated {
            Formula::Exists(q2) => assert_ne!(q2.id, id),
            other => panic!("expected Exists, got {other:?}"),
        }
    }
}
