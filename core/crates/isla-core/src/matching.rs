//! Matching a quantifier's bound variable against tree positions (§4.2).

use std::collections::HashMap;

use crate::formula::QuantifiedFormula;
use crate::tree::{DerivationTree, NodeId, Path};
use crate::variable::{BindElement, Variable};

/// One assignment produced by [`matches`]: the quantifier's own bound
/// variable plus any extra variables introduced by a bind expression,
/// each mapped to the `(path, subtree)` it was matched against.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchAssignment {
    pub bindings: HashMap<Variable, (Path, DerivationTree)>,
    /// The node id of the subtree matched against `q`'s own bound
    /// variable — the key the solver records in `already_matched` (§3).
    pub matched_node: NodeId,
}

/// Every assignment matching `q` against a position in `t`, in
/// left-to-right preorder (§4.6: "matches are processed in left-to-right
/// path order"). A candidate whose bind-expression shape cannot yet be
/// determined because part of the subtree is still open is skipped, not
/// reported as a non-match (§4.2 edge case) — the solver falls back to
/// expansion in that case.
pub fn matches(q: &QuantifiedFormula, t: &DerivationTree) -> Vec<MatchAssignment> {
    let target_type = q.bound_variable.n_type();
    let mut out = Vec::new();
    for (path, subtree) in t.walk() {
        if subtree.symbol().n_type() != Some(target_type) {
            continue;
        }
        match &q.bind_expression {
            None => out.push(MatchAssignment {
                bindings: HashMap::from([(q.bound_variable.clone(), (path, subtree.clone()))]),
                matched_node: subtree.id(),
            }),
            Some(be) => {
                if let Some(mut bindings) = match_bind_expression(&path, &subtree, be) {
                    bindings.insert(q.bound_variable.clone(), (path, subtree.clone()));
                    out.push(MatchAssignment {
                        bindings,
                        matched_node: subtree.id(),
                    });
                }
            }
        }
    }
    out
}

/// Match a bind expression's literal/variable sequence against
/// `subtree`'s immediate children. Returns `None` either because the
/// shape genuinely does not match, or because the subtree is not yet
/// expanded enough to tell (both cases mean "no match, try later").
fn match_bind_expression(
    base_path: &Path,
    subtree: &DerivationTree,
    be: &crate::variable::BindExpression,
) -> Option<HashMap<Variable, (Path, DerivationTree)>> {
    let children = subtree.children()?;
    if children.len() != be.elements.len() {
        return None;
    }
    let mut bindings = HashMap::new();
    for (i, (element, child)) in be.elements.iter().zip(children).enumerate() {
        match element {
            BindElement::Literal(text) => {
                if child.is_open() {
                    return None;
                }
                if &child.yield_str() != text {
                    return None;
                }
            }
            BindElement::Variable(var) => {
                if child.symbol().n_type() != Some(var.n_type()) {
                    return None;
                }
                let mut child_path = base_path.clone();
                child_path.push(i);
                bindings.insert(var.clone(), (child_path, child.clone()));
            }
        }
    }
    Some(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{Formula, InTree, QuantifiedFormula};
    use crate::tree::Symbol;
    use crate::variable::{BindExpression, Variable};

    fn two_assignments_tree() -> DerivationTree {
        DerivationTree::inner(
            Symbol::nonterminal("<stmt>"),
            vec![
                DerivationTree::leaf(Symbol::nonterminal("<assgn>")),
                DerivationTree::terminal(" ; "),
                DerivationTree::leaf(Symbol::nonterminal("<assgn>")),
            ],
        )
    }

    #[test]
    fn matches_every_position_of_the_bound_type() {
        let tree = two_assignments_tree();
        let q = QuantifiedFormula::new(
            Variable::bound("a", "<assgn>"),
            InTree::Variable(Variable::constant("start", "<start>")),
            Formula::True,
            None,
        );
        let found = matches(&q, &tree);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].bindings[&q.bound_variable].0, vec![0]);
        assert_eq!(found[1].bindings[&q.bound_variable].0, vec![2]);
    }

    #[test]
    fn bind_expression_skips_not_yet_expanded_subtrees() {
        let open_assgn = DerivationTree::leaf(Symbol::nonterminal("<assgn>"));
        let be = BindExpression::new(vec![crate::variable::BindElement::Variable(Variable::bound(
            "v", "<var>",
        ))]);
        let q = QuantifiedFormula::new(
            Variable::bound("a", "<assgn>"),
            InTree::Variable(Variable::constant("start", "<start>")),
            Formula::True,
            Some(be),
        );
        assert!(matches(&q, &open_assgn).is_empty());
    }

    #[test]
    fn bind_expression_binds_extra_variables_at_their_positions() {
        let assgn = DerivationTree::inner(
            Symbol::nonterminal("<assgn>"),
            vec![
                DerivationTree::leaf(Symbol::nonterminal("<var>")),
                DerivationTree::terminal(" := "),
                DerivationTree::leaf(Symbol::nonterminal("<rhs>")),
            ],
        );
        let be = BindExpression::new(vec![
            crate::variable::BindElement::Variable(Variable::bound("v", "<var>")),
            crate::variable::BindElement::Literal(" := ".into()),
            crate::variable::BindElement::Variable(Variable::bound("r", "<rhs>")),
        ]);
        let v = Variable::bound("v", "<var>");
        let q = QuantifiedFormula::new(
            Variable::bound("a", "<assgn>"),
            InTree::Variable(Variable::constant("start", "<start>")),
            Formula::True,
            Some(be),
        );
        let found = matches(&q, &assgn);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].bindings[&v].0, vec![0]);
    }
}
