//! The concrete end-to-end scenarios (§8): literal grammars and
//! constraints, checked against their expected verdicts.

use std::collections::HashMap;

use isla_core::elimination;
use isla_core::evaluate::{evaluate, EvalContext, Truth};
use isla_core::formula::{
    Formula, InTree, PredicateArg, PredicateCall, QuantifiedFormula, SmtAtom, SmtRelation, SmtTerm,
};
use isla_core::grammar::{Grammar, GrammarGraph, PermissiveRegexApproximator};
use isla_core::parsing::RecursiveDescentParser;
use isla_core::predicates::{PredicateLibrary, SemanticOutcome};
use isla_core::solver::Solver;
use isla_core::tree::{DerivationTree, Symbol};
use isla_core::variable::{BindElement, BindExpression, Variable};
use isla_core::SolverConfig;

fn eval_ctx<'a>(grammar: &'a Grammar, graph: &'a GrammarGraph, predicates: &'a PredicateLibrary) -> EvalContext<'a> {
    EvalContext {
        grammar,
        graph,
        predicates,
        bindings: HashMap::new(),
        positions: HashMap::new(),
    }
}

fn assgn(var: &str, rhs: DerivationTree) -> DerivationTree {
    DerivationTree::inner(
        Symbol::nonterminal("<assgn>"),
        vec![
            DerivationTree::inner(Symbol::nonterminal("<var>"), vec![DerivationTree::terminal(var)]),
            DerivationTree::terminal(" := "),
            rhs,
        ],
    )
}

fn rhs_var(name: &str) -> DerivationTree {
    DerivationTree::inner(
        Symbol::nonterminal("<rhs>"),
        vec![DerivationTree::inner(Symbol::nonterminal("<var>"), vec![DerivationTree::terminal(name)])],
    )
}

fn rhs_digit(d: &str) -> DerivationTree {
    DerivationTree::inner(
        Symbol::nonterminal("<rhs>"),
        vec![DerivationTree::inner(Symbol::nonterminal("<digit>"), vec![DerivationTree::terminal(d)])],
    )
}

/// `a := 1 ; b := <rhs>` as a closed `<start>` tree; `<stmt>` nests two
/// `<assgn>`s separated by `" ; "`.
fn two_statement_tree(second_rhs: DerivationTree) -> DerivationTree {
    DerivationTree::inner(
        Symbol::nonterminal("<start>"),
        vec![DerivationTree::inner(
            Symbol::nonterminal("<stmt>"),
            vec![
                assgn("a", rhs_digit("1")),
                DerivationTree::terminal(" ; "),
                DerivationTree::inner(Symbol::nonterminal("<stmt>"), vec![assgn("b", second_rhs)]),
            ],
        )],
    )
}

/// `∀ e:<rhs> in start [<var> u]: ∃ d:<assgn> in start [<var> d_var, " := ", <rhs> d_rhs]:
/// before(d, e) ∧ u = d_var`. Only `<rhs>` occurrences shaped like a bare
/// `<var>` (not a `<digit>`) get a bind-expression match at all (§4.2:
/// shape mismatch means "no match", not failure), so digit RHSes are
/// unconstrained — matching the scenario's "any RHS `<var>` must equal
/// some earlier LHS `<var>`".
fn def_before_use_formula() -> Formula {
    let u = Variable::bound("u", "<var>");
    let d_var = Variable::bound("d_var", "<var>");
    let d_rhs = Variable::bound("d_rhs", "<rhs>");
    let d = Variable::bound("d", "<assgn>");
    let e = Variable::bound("e", "<rhs>");

    let inner_exists = QuantifiedFormula::new(
        d.clone(),
        InTree::Variable(Variable::constant("start", "<start>")),
        Formula::and([
            Formula::StructuralPredicate(PredicateCall::new(
                "before",
                vec![PredicateArg::Unbound(d.clone()), PredicateArg::Unbound(e.clone())],
            )),
            Formula::Smt(SmtAtom::new(SmtRelation::StrEq, SmtTerm::Var(u.clone()), SmtTerm::Var(d_var.clone()))),
        ]),
        Some(BindExpression::new(vec![
            BindElement::Variable(d_var),
            BindElement::Literal(" := ".into()),
            BindElement::Variable(d_rhs),
        ])),
    );

    let outer_forall = QuantifiedFormula::new(
        e,
        InTree::Variable(Variable::constant("start", "<start>")),
        Formula::Exists(Box::new(inner_exists)),
        Some(BindExpression::new(vec![BindElement::Variable(u)])),
    );

    Formula::ForAll(Box::new(outer_forall))
}

#[test]
fn def_before_use_passes_when_every_var_rhs_has_an_earlier_matching_lhs() {
    let grammar = Grammar::new("<start>");
    let graph = GrammarGraph::build(&grammar);
    let predicates = PredicateLibrary::standard();
    let tree = two_statement_tree(rhs_var("a"));
    let formula = def_before_use_formula();
    assert_eq!(evaluate(&formula, &tree, &eval_ctx(&grammar, &graph, &predicates)).unwrap(), Truth::True);
}

#[test]
fn def_before_use_fails_when_a_var_rhs_has_no_matching_lhs() {
    let grammar = Grammar::new("<start>");
    let graph = GrammarGraph::build(&grammar);
    let predicates = PredicateLibrary::standard();
    let tree = two_statement_tree(rhs_var("c"));
    let formula = def_before_use_formula();
    assert_eq!(evaluate(&formula, &tree, &eval_ctx(&grammar, &graph, &predicates)).unwrap(), Truth::False);
}

#[test]
fn def_before_use_is_unaffected_by_a_digit_rhs() {
    // A digit RHS never matches the `[<var>]` bind expression, so it is
    // simply not visited by `∀ e`, leaving the formula TRUE.
    let grammar = Grammar::new("<start>");
    let graph = GrammarGraph::build(&grammar);
    let predicates = PredicateLibrary::standard();
    let tree = two_statement_tree(rhs_digit("9"));
    let formula = def_before_use_formula();
    assert_eq!(evaluate(&formula, &tree, &eval_ctx(&grammar, &graph, &predicates)).unwrap(), Truth::True);
}

#[test]
fn unsat_short_circuit_yields_no_trees() {
    let grammar = Grammar::new("<start>").with_rule("<start>", vec![vec!["<a>".into()]]).with_rule("<a>", vec![vec!["A".into()]]);
    let approximator = PermissiveRegexApproximator;
    let parser = RecursiveDescentParser;
    let predicates = PredicateLibrary::standard();
    let start_tree = DerivationTree::inner(Symbol::nonterminal("<start>"), vec![DerivationTree::leaf(Symbol::nonterminal("<a>"))]);

    let a = Variable::bound("a", "<a>");
    let formula = Formula::Exists(Box::new(QuantifiedFormula::new(
        a.clone(),
        InTree::Variable(Variable::constant("start", "<start>")),
        Formula::Smt(SmtAtom::new(SmtRelation::StrEq, SmtTerm::Var(a), SmtTerm::StrLit("B".into()))),
        None,
    )));

    let solver = Solver::new(&grammar, &approximator, &parser, &predicates, SolverConfig::default(), formula, start_tree);
    assert!(solver.take(5).next().is_none());
}

#[test]
fn echo_exit_forbids_a_zero_exit_code() {
    let code = Variable::bound("code", "<code>");
    let formula = Formula::ForAll(Box::new(QuantifiedFormula::new(
        code.clone(),
        InTree::Variable(Variable::constant("start", "<start>")),
        Formula::Not(Box::new(Formula::Smt(SmtAtom::new(
            SmtRelation::StrEq,
            SmtTerm::Var(code),
            SmtTerm::StrLit("0".into()),
        )))),
        None,
    )));

    let grammar = Grammar::new("<start>");
    let graph = GrammarGraph::build(&grammar);
    let predicates = PredicateLibrary::standard();

    let passing = DerivationTree::inner(
        Symbol::nonterminal("<start>"),
        vec![DerivationTree::inner(Symbol::nonterminal("<code>"), vec![DerivationTree::terminal("1")])],
    );
    assert_eq!(evaluate(&formula, &passing, &eval_ctx(&grammar, &graph, &predicates)).unwrap(), Truth::True);

    let failing = DerivationTree::inner(
        Symbol::nonterminal("<start>"),
        vec![DerivationTree::inner(Symbol::nonterminal("<code>"), vec![DerivationTree::terminal("0")])],
    );
    assert_eq!(evaluate(&formula, &failing, &eval_ctx(&grammar, &graph, &predicates)).unwrap(), Truth::False);
}

#[test]
fn quantifier_match_caching_does_not_rebind_the_same_node() {
    // Two `<assgn>` siblings; `matches` must report each exactly once,
    // in left-to-right order, and re-evaluating must not rebind the
    // leftmost one a second time.
    let stmt = DerivationTree::inner(
        Symbol::nonterminal("<stmt>"),
        vec![assgn("x", rhs_digit("1")), assgn("y", rhs_digit("2"))],
    );
    let q = QuantifiedFormula::new(
        Variable::bound("a", "<assgn>"),
        InTree::Variable(Variable::constant("start", "<stmt>")),
        Formula::True,
        None,
    );
    let found = isla_core::matching::matches(&q, &stmt);
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].matched_node, stmt.get(&[0]).unwrap().id());
    assert_eq!(found[1].matched_node, stmt.get(&[1]).unwrap().id());
    assert_ne!(found[0].matched_node, found[1].matched_node);
}

#[test]
fn length_bounded_tar_field_rjust_crop_pads_to_exact_width() {
    let lib = PredicateLibrary::standard();
    let predicate = lib.semantic("rjust_crop").unwrap();
    let grammar = Grammar::new("<start>");
    let var = Variable::bound("file_size", "<file_size>");
    let field = DerivationTree::terminal("17");
    let args = vec![
        PredicateArg::Bound { var: Some(var.clone()), path: vec![0], tree: field },
        PredicateArg::literal(DerivationTree::terminal("12")),
        PredicateArg::literal(DerivationTree::terminal("0")),
    ];
    match predicate.apply(&grammar, &args).unwrap() {
        SemanticOutcome::TreeSubstitutions(subst) => {
            let replacement = &subst[&var];
            assert_eq!(replacement.yield_str().len(), 12);
            assert_eq!(replacement.yield_str(), "000000000017");
        }
        other => panic!("expected TreeSubstitutions, got {other:?}"),
    }
}

#[test]
fn length_bounded_tar_field_octal_to_decimal_stays_within_bounds() {
    let lib = PredicateLibrary::standard();
    let predicate = lib.semantic("octal_to_decimal").unwrap();
    let grammar = Grammar::new("<start>");
    let n = Variable::numeric_constant("N");
    let args = vec![PredicateArg::literal(DerivationTree::terminal("016")), PredicateArg::Unbound(n.clone())];
    match predicate.apply(&grammar, &args).unwrap() {
        SemanticOutcome::NumericSubstitutions(subst) => {
            let value = subst[&n];
            assert!((10..=100).contains(&value), "expected N in [10,100], got {value}");
        }
        other => panic!("expected NumericSubstitutions, got {other:?}"),
    }
}

#[test]
fn eliminate_quantifiers_reduces_a_closed_forall_to_its_matched_conjuncts() {
    let grammar = Grammar::new("<start>").with_rule("<start>", vec![vec!["<a>".into(), "<a>".into()]]).with_rule("<a>", vec![vec!["x".into()]]);
    let graph = GrammarGraph::build(&grammar);
    let tree = DerivationTree::inner(
        Symbol::nonterminal("<start>"),
        vec![DerivationTree::terminal("x"), DerivationTree::terminal("x")],
    );
    let a = Variable::bound("a", "<a>");
    let formula = Formula::ForAll(Box::new(QuantifiedFormula::new(
        a.clone(),
        InTree::Variable(Variable::constant("start", "<start>")),
        Formula::Smt(SmtAtom::new(SmtRelation::StrEq, SmtTerm::Var(a), SmtTerm::StrLit("x".into()))),
        None,
    )));
    let reduced = elimination::eliminate_quantifiers(&formula, &tree, &graph);
    assert!(matches!(reduced, Formula::And(_)));
}
