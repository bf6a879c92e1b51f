//! Quantifier matching (§4.2, §8): determinism, one assignment per
//! matched node, and bind-expression shape matching.

use isla_core::formula::{InTree, QuantifiedFormula};
use isla_core::matching::matches;
use isla_core::tree::{DerivationTree, Symbol};
use isla_core::variable::{BindElement, BindExpression, Variable};

fn two_assignments() -> DerivationTree {
    DerivationTree::inner(
        Symbol::nonterminal("<stmt>"),
        vec![
            DerivationTree::inner(
                Symbol::nonterminal("<assgn>"),
                vec![DerivationTree::terminal("a"), DerivationTree::terminal(":="), DerivationTree::terminal("1")],
            ),
            DerivationTree::inner(
                Symbol::nonterminal("<assgn>"),
                vec![DerivationTree::terminal("b"), DerivationTree::terminal(":="), DerivationTree::terminal("2")],
            ),
        ],
    )
}

fn quantifier() -> QuantifiedFormula {
    QuantifiedFormula::new(
        Variable::bound("a", "<assgn>"),
        InTree::Variable(Variable::constant("start", "<stmt>")),
        isla_core::formula::Formula::True,
        None,
    )
}

#[test]
fn matches_one_assignment_per_occurrence_in_preorder() {
    let tree = two_assignments();
    let q = quantifier();
    let found = matches(&q, &tree);
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].matched_node, tree.get(&[0]).unwrap().id());
    assert_eq!(found[1].matched_node, tree.get(&[1]).unwrap().id());
}

#[test]
fn matches_is_deterministic_across_calls() {
    let tree = two_assignments();
    let q = quantifier();
    let first: Vec<_> = matches(&q, &tree).into_iter().map(|m| m.matched_node).collect();
    let second: Vec<_> = matches(&q, &tree).into_iter().map(|m| m.matched_node).collect();
    assert_eq!(first, second);
}

#[test]
fn bind_expression_binds_the_named_hole_to_its_own_subtree() {
    let tree = two_assignments();
    let var = Variable::bound("var", "<stmt-var>");
    let be = BindExpression::new(vec![BindElement::Variable(var.clone())]);
    let q = QuantifiedFormula::new(
        Variable::bound("a", "<assgn>"),
        InTree::Variable(Variable::constant("start", "<stmt>")),
        isla_core::formula::Formula::True,
        Some(be),
    );
    // The assignment's own shape ("<var>", ":=", "<rhs>") doesn't match a
    // one-element bind expression, so no assignment should bind `var`
    // directly against the whole `<assgn>` subtree.
    let found = matches(&q, &tree);
    assert!(found.iter().all(|m| !m.bindings.contains_key(&var)));
}
