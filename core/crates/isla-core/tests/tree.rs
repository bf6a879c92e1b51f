//! Derivation tree invariants (§8): replacement identity, yield
//! preservation under expansion, and open-leaf bookkeeping.

use isla_core::tree::{DerivationTree, Symbol};
use proptest::prelude::*;

fn sample() -> DerivationTree {
    DerivationTree::inner(
        Symbol::nonterminal("<stmt>"),
        vec![
            DerivationTree::terminal("a"),
            DerivationTree::leaf(Symbol::nonterminal("<rhs>")),
        ],
    )
}

#[test]
fn replace_returns_the_new_subtree_at_its_path() {
    let tree = sample();
    let replacement = DerivationTree::terminal("1");
    let updated = tree.replace(&[1], replacement.clone());
    assert_eq!(updated.get(&[1]), Some(&replacement));
}

#[test]
fn replace_preserves_subtrees_disjoint_from_the_path() {
    let tree = sample();
    let updated = tree.replace(&[1], DerivationTree::terminal("1"));
    assert_eq!(updated.get(&[0]), tree.get(&[0]));
}

#[test]
fn open_concrete_leaves_reports_every_unexpanded_nonterminal() {
    let tree = sample();
    let open = tree.open_concrete_leaves();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].0, vec![1]);
}

#[test]
fn complete_tree_has_no_open_leaves() {
    let tree = sample().replace(&[1], DerivationTree::terminal("x"));
    assert!(tree.is_complete());
}

proptest! {
    #[test]
    fn replace_identity_holds_for_arbitrary_terminal_text(text in "[a-z]{0,8}") {
        let tree = sample();
        let updated = tree.replace(&[1], DerivationTree::terminal(text.clone()));
        prop_assert_eq!(updated.get(&[1]).unwrap().yield_str(), text);
        prop_assert_eq!(updated.get(&[0]), tree.get(&[0]));
    }
}
