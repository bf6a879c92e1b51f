//! Solution states and the solver's dispatch loop (§3, §4.3–§4.8, §5).
//!
//! A [`SolutionState`] is a formula paired with a derivation tree, a
//! `Variable -> Path` position map grounding every constant introduced so
//! far (by a universal match or an existential insertion, see
//! `elimination.rs`), and the bookkeeping needed to avoid reprocessing
//! the same quantifier match twice. [`Solver`] is a lazy iterator over
//! complete derivation trees (§5: "each pull drives the state machine
//! until another satisfying tree is produced"), structured as a FIFO
//! work queue plus a structural dedup set — the same `VecDeque` +
//! `HashSet` shape the teacher's `model_checker.rs` `ModelChecker` uses
//! for its own reachable-state search, generalized here from boolean
//! model checking to constraint-directed tree generation.

use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, trace};

use crate::config::SolverConfig;
use crate::elimination::{self, UniversalOutcome};
use crate::error::IslaResult;
use crate::evaluate::Truth;
use crate::formula::{Formula, InTree, QuantifierId, SmtAtom, SmtTerm};
use crate::grammar::{Grammar, GrammarGraph, RegexApproximator, RegexCache};
use crate::normal_form::{self, split_conjunction};
use crate::parsing::TreeParser;
use crate::predicates::PredicateLibrary;
use crate::smt::{evaluate_ground_atom, Model, ModelValue};
use crate::tree::{DerivationTree, NodeId, Path, Symbol};
use crate::variable::Variable;

/// One node of the search: a formula still to be discharged against a
/// (possibly incomplete) tree, plus everything grounded about it so far.
#[derive(Debug, Clone, PartialEq)]
pub struct SolutionState {
    pub formula: Formula,
    pub tree: DerivationTree,
    pub positions: HashMap<Variable, Path>,
    pub numeric: HashMap<Variable, i64>,
    /// Per-quantifier set of tree node ids already matched (§4.6), so a
    /// universal conjunct retained across rounds doesn't re-conjoin the
    /// same instantiation.
    pub already_matched: HashMap<QuantifierId, HashSet<NodeId>>,
    /// Per-quantifier set of numeric constants already instantiated
    /// against, the numeric analogue of `already_matched`.
    pub already_matched_numeric: HashMap<QuantifierId, HashSet<Variable>>,
}

/// Structural dedup key for the solver's `seen` set (§5): a state is a
/// repeat if it pairs the same formula with the same tree, regardless of
/// how the position maps got there.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey(Formula, DerivationTree);

impl SolutionState {
    pub fn initial(formula: Formula, tree: DerivationTree) -> Self {
        Self {
            formula,
            tree,
            positions: HashMap::new(),
            numeric: HashMap::new(),
            already_matched: HashMap::new(),
            already_matched_numeric: HashMap::new(),
        }
    }
}

enum Step {
    /// No further dispatch needed this round; re-enqueue these states.
    Successors(Vec<SolutionState>),
    /// A fully-discharged, fully-expanded tree (§3: "no open leaves").
    Complete(Vec<DerivationTree>),
}

/// Where a quantifier's `in r` ranges over: either the whole derivation
/// tree (the common case, `r` bound to the grammar's start symbol) or a
/// subtree already grounded by an enclosing scope. Returns the subtree
/// to match against plus the path it sits at, so elimination results can
/// be spliced back into the full tree.
fn resolve_scope(in_var: &InTree, tree: &DerivationTree, positions: &HashMap<Variable, Path>) -> (DerivationTree, Path) {
    match in_var {
        InTree::Tree(t) => (t.clone(), Path::new()),
        InTree::Variable(v) => match positions.get(v) {
            Some(p) => (tree.get(p).cloned().unwrap_or_else(|| tree.clone()), p.clone()),
            None => (tree.clone(), Path::new()),
        },
    }
}

fn ground_term(term: &SmtTerm, tree: &DerivationTree, positions: &HashMap<Variable, Path>, numeric: &HashMap<Variable, i64>) -> SmtTerm {
    match term {
        SmtTerm::Var(v) => {
            if let Some(n) = numeric.get(v) {
                return SmtTerm::IntLit(*n);
            }
            if let Some(path) = positions.get(v) {
                if let Some(t) = tree.get(path) {
                    return SmtTerm::StrLit(t.yield_str());
                }
            }
            term.clone()
        }
        SmtTerm::StrLit(_) | SmtTerm::IntLit(_) => term.clone(),
        SmtTerm::Length(inner) => SmtTerm::Length(Box::new(ground_term(inner, tree, positions, numeric))),
    }
}

fn ground_atom(atom: &SmtAtom, tree: &DerivationTree, positions: &HashMap<Variable, Path>, numeric: &HashMap<Variable, i64>) -> SmtAtom {
    SmtAtom {
        relation: atom.relation,
        lhs: ground_term(&atom.lhs, tree, positions, numeric),
        rhs: ground_term(&atom.rhs, tree, positions, numeric),
        negated: atom.negated,
    }
}

/// §4.8's three free-instantiability conditions, approximated at the
/// granularity the rest of this crate operates at: reachability by
/// nonterminal type rather than by exact bind-expression path.
fn is_freely_instantiable(n_type: &str, path: &Path, formula: &Formula, positions: &HashMap<Variable, Path>, graph: &GrammarGraph) -> bool {
    let mut quantifier_types = Vec::new();
    let mut predicate_types = HashSet::new();
    collect_formula_types(formula, &mut quantifier_types, &mut predicate_types);

    if quantifier_types.iter().any(|qt| graph.reachable(n_type, qt)) {
        return false;
    }
    if predicate_types.contains(n_type) {
        return false;
    }
    if positions.values().any(|p| p == path) {
        return false;
    }
    true
}

fn collect_formula_types(formula: &Formula, quantifier_types: &mut Vec<String>, predicate_types: &mut HashSet<String>) {
    match formula {
        Formula::True | Formula::False | Formula::Smt(_) => {}
        Formula::StructuralPredicate(call) | Formula::SemanticPredicate(call) => {
            for v in call.free_variables() {
                predicate_types.insert(v.n_type().to_string());
            }
        }
        Formula::Not(inner) => collect_formula_types(inner, quantifier_types, predicate_types),
        Formula::And(items) | Formula::Or(items) => {
            for item in items {
                collect_formula_types(item, quantifier_types, predicate_types);
            }
        }
        Formula::ForAll(q) | Formula::Exists(q) => {
            quantifier_types.push(q.bound_variable.n_type().to_string());
            collect_formula_types(&q.inner, quantifier_types, predicate_types);
        }
        Formula::ForAllNum(q) | Formula::ExistsNum(q) => {
            collect_formula_types(&q.inner, quantifier_types, predicate_types);
        }
    }
}

/// Fully expand every open leaf of `tree` by repeatedly picking the first
/// remaining one and instantiating one grammar alternative (§4.8's
/// post-processing pass). No true randomness is available here (§9
/// forbids sources that would break determinism across runs), so
/// `variant` plays the role a random seed would: distinct variants walk
/// distinct alternative choices, within a bounded number of steps to
/// guarantee termination on grammars with unbounded recursive rules.
fn bulk_free_fill(tree: &DerivationTree, grammar: &Grammar, variant: usize) -> DerivationTree {
    let mut current = tree.clone();
    for step in 0..256 {
        let open = current.open_concrete_leaves();
        let Some((path, leaf)) = open.first() else {
            return current;
        };
        let n_type = leaf.symbol().n_type().unwrap_or("").to_string();
        let alternatives = match grammar.alternatives(&n_type) {
            Ok(alts) if !alts.is_empty() => alts.to_vec(),
            _ => return current,
        };
        let idx = (variant + step) % alternatives.len();
        let children = Grammar::instantiate_alternative(&alternatives[idx]);
        current = current.replace(path, DerivationTree::inner(Symbol::nonterminal(n_type), children));
    }
    current
}

/// Lazy iterator over complete derivation trees satisfying a formula
/// (§5). Pulling the iterator drives a FIFO work queue through §4.3's
/// dispatch cases until a tree with no open leaves is produced; the
/// queue and a structural dedup set persist across calls so the search
/// resumes where it left off.
pub struct Solver<'a> {
    grammar: &'a Grammar,
    graph: GrammarGraph,
    predicates: &'a PredicateLibrary,
    regex_cache: RegexCache<'a>,
    parser: &'a dyn TreeParser,
    config: SolverConfig,
    queue: VecDeque<SolutionState>,
    seen: HashSet<DedupKey>,
    pending: VecDeque<DerivationTree>,
}

impl<'a> Solver<'a> {
    pub fn new(
        grammar: &'a Grammar,
        regex_approximator: &'a dyn RegexApproximator,
        parser: &'a dyn TreeParser,
        predicates: &'a PredicateLibrary,
        config: SolverConfig,
        formula: Formula,
        start_tree: DerivationTree,
    ) -> Self {
        let mut queue = VecDeque::new();
        queue.push_back(SolutionState::initial(formula, start_tree));
        Self {
            grammar,
            graph: GrammarGraph::build(grammar),
            predicates,
            regex_cache: RegexCache::new(regex_approximator),
            parser,
            config,
            queue,
            seen: HashSet::new(),
            pending: VecDeque::new(),
        }
    }

    fn process(&mut self, mut state: SolutionState) -> IslaResult<Step> {
        // A semantic predicate (e.g. `rjust_crop`) may propose a tree
        // rewrite rather than a truth value; apply it and re-instantiate
        // so the predicate is re-evaluated against its new yield. Bounded
        // to guard against a misbehaving predicate proposing the same
        // rewrite forever.
        let mut formula = state.formula.clone();
        for _ in 0..16 {
            let mut tree_substitutions = Vec::new();
            formula = elimination::instantiate_predicates(
                &formula,
                &state.tree,
                &state.positions,
                &mut state.numeric,
                &mut tree_substitutions,
                self.predicates,
                self.grammar,
            )?;
            if tree_substitutions.is_empty() {
                break;
            }
            for (var, replacement) in tree_substitutions {
                if let Some(path) = state.positions.get(&var).cloned() {
                    state.tree = state.tree.replace(&path, replacement);
                }
            }
        }
        let formula = normal_form::reorder(formula);
        normal_form::check_invariant(&formula)?;
        state.formula = formula;
        trace!("processing state with {} open leaves", state.tree.open_concrete_leaves().len());

        if state.formula.is_false() {
            return Ok(Step::Successors(Vec::new()));
        }
        if state.formula.is_true() {
            return self.finish(state);
        }
        if let Formula::Or(branches) = state.formula.clone() {
            let out = branches.into_iter().map(|b| SolutionState { formula: b, ..state.clone() }).collect();
            return Ok(Step::Successors(out));
        }

        let conjuncts = split_conjunction(&state.formula);
        self.dispatch_conjunction(state, conjuncts)
    }

    fn finish(&mut self, state: SolutionState) -> IslaResult<Step> {
        if state.tree.is_complete() {
            Ok(Step::Complete(vec![state.tree]))
        } else {
            self.expand(state)
        }
    }

    /// §4.3 steps 2–5: find the leftmost actionable conjunct class and
    /// dispatch to the matching elimination pass. Conjunct-class ordering
    /// (§4.1) guarantees an SMT prefix, if any, comes first, then any
    /// remaining (ungrounded) predicate, then existentials, then
    /// universals.
    fn dispatch_conjunction(&mut self, state: SolutionState, conjuncts: Vec<Formula>) -> IslaResult<Step> {
        let smt_prefix_len = conjuncts.iter().take_while(|f| matches!(f, Formula::Smt(_))).count();
        if smt_prefix_len > 0 {
            return self.eliminate_semantic_prefix(state, conjuncts, smt_prefix_len);
        }
        if let Some(idx) = conjuncts.iter().position(|f| matches!(f, Formula::Exists(_))) {
            return self.eliminate_existential_case(state, conjuncts, idx);
        }
        if let Some(idx) = conjuncts.iter().position(|f| matches!(f, Formula::ExistsNum(_))) {
            return self.eliminate_existential_num_case(state, conjuncts, idx);
        }
        if let Some(idx) = conjuncts.iter().position(|f| matches!(f, Formula::ForAll(_))) {
            return self.eliminate_universal_case(state, conjuncts, idx);
        }
        if let Some(idx) = conjuncts.iter().position(|f| matches!(f, Formula::ForAllNum(_))) {
            return self.eliminate_universal_num_case(state, conjuncts, idx);
        }
        // Only an ungrounded predicate atom remains, unreachable by any
        // quantifier substitution this round — nothing to do but keep
        // expanding the tree until it becomes groundable (§4.3 case E).
        self.expand(state)
    }

    /// §4.4 via §4.3 cases A/B: solve the leading contiguous run of SMT
    /// atoms. Atoms whose variables are all already grounded are decided
    /// directly without a solver call; only genuinely free variables (an
    /// existential's fresh constant, say) go through `solve_atoms`.
    fn eliminate_semantic_prefix(&mut self, state: SolutionState, conjuncts: Vec<Formula>, prefix_len: usize) -> IslaResult<Step> {
        let atoms: Vec<SmtAtom> = conjuncts[..prefix_len]
            .iter()
            .map(|f| match f {
                Formula::Smt(a) => a.clone(),
                _ => unreachable!("prefix_len only counts Smt conjuncts"),
            })
            .collect();
        let rest = conjuncts[prefix_len..].to_vec();

        let grounded: Vec<SmtAtom> = atoms
            .iter()
            .map(|a| ground_atom(a, &state.tree, &state.positions, &state.numeric))
            .collect();
        let mut free_vars = Vec::new();
        let mut seen_vars = HashSet::new();
        for atom in &grounded {
            for v in atom.free_variables() {
                if seen_vars.insert(v.clone()) {
                    free_vars.push(v);
                }
            }
        }

        if free_vars.is_empty() {
            let mut truth = Truth::True;
            for atom in &grounded {
                let outcome = evaluate_ground_atom(atom, &HashMap::new())?;
                let t = match outcome {
                    Some(b) => Truth::from_bool(b),
                    None => Truth::Unknown,
                };
                truth = Truth::all([truth, t]);
            }
            return match truth {
                Truth::False => Ok(Step::Successors(Vec::new())),
                Truth::True => Ok(Step::Successors(vec![SolutionState { formula: Formula::and(rest), ..state }])),
                // Every variable was grounded, so this should not arise in
                // practice; fall back to further expansion rather than
                // stall the search on a formula we can't yet decide.
                Truth::Unknown => self.expand(state),
            };
        }

        let models = self.solve_atoms(&grounded, &free_vars, self.config.max_smt_instantiations)?;
        if models.is_empty() {
            return Ok(Step::Successors(Vec::new()));
        }
        let mut out = Vec::with_capacity(models.len());
        for model in models {
            out.push(apply_model(&state, &rest, model));
        }
        Ok(Step::Successors(out))
    }

    #[cfg(feature = "z3-backend")]
    fn solve_atoms(&self, atoms: &[SmtAtom], vars: &[Variable], max_models: usize) -> IslaResult<Vec<Model>> {
        crate::smt::solve_conjunction(
            self.grammar,
            &self.regex_cache,
            self.parser,
            atoms,
            vars,
            max_models,
            self.config.smt_timeout_ms as u32,
        )
    }

    #[cfg(not(feature = "z3-backend"))]
    fn solve_atoms(&self, _atoms: &[SmtAtom], vars: &[Variable], _max_models: usize) -> IslaResult<Vec<Model>> {
        let _ = (&self.regex_cache, self.parser);
        if vars.is_empty() {
            return Ok(vec![Model::new()]);
        }
        Err(crate::error::IslaError::constraint_error(
            "semantic elimination needs a free variable solved, but this build has no SMT backend (enable the `z3-backend` feature)",
        ))
    }

    /// §4.5 via §4.3 case C: insert a fresh constant of the existential's
    /// type somewhere in the tree, one successor per insertion point.
    fn eliminate_existential_case(&mut self, state: SolutionState, conjuncts: Vec<Formula>, idx: usize) -> IslaResult<Step> {
        let SolutionState { tree, positions, numeric, already_matched, already_matched_numeric, .. } = state;
        let q = match &conjuncts[idx] {
            Formula::Exists(q) => (**q).clone(),
            _ => unreachable!(),
        };
        let (reference, base_path) = resolve_scope(&q.in_variable, &tree, &positions);
        let successors = elimination::eliminate_existential(&q, &reference, self.grammar);
        if successors.is_empty() {
            debug!("existential `{}` has no remaining insertion point", q.bound_variable.name());
            return Ok(Step::Successors(Vec::new()));
        }
        let mut out = Vec::with_capacity(successors.len());
        for succ in successors {
            let mut new_conjuncts = conjuncts.clone();
            new_conjuncts[idx] = succ.replacement;
            let mut new_positions = positions.clone();
            for (v, p) in succ.new_positions {
                let mut full = base_path.clone();
                full.extend(p);
                new_positions.insert(v, full);
            }
            let new_tree = if base_path.is_empty() { succ.tree } else { tree.replace(&base_path, succ.tree) };
            out.push(SolutionState {
                formula: Formula::and(new_conjuncts),
                tree: new_tree,
                positions: new_positions,
                numeric: numeric.clone(),
                already_matched: already_matched.clone(),
                already_matched_numeric: already_matched_numeric.clone(),
            });
        }
        Ok(Step::Successors(out))
    }

    /// Numeric analogue of existential elimination: a fresh numeric
    /// constant replaces the bound variable throughout the quantifier's
    /// body, to be resolved by whichever SMT atoms reference it once
    /// `eliminate_semantic_prefix` sees it as a free variable.
    fn eliminate_existential_num_case(&mut self, state: SolutionState, conjuncts: Vec<Formula>, idx: usize) -> IslaResult<Step> {
        let q = match &conjuncts[idx] {
            Formula::ExistsNum(q) => (**q).clone(),
            _ => unreachable!(),
        };
        let fresh = Variable::numeric_constant(format!("N__fresh{}", q.id));
        let mut renaming = HashMap::new();
        renaming.insert(q.bound_variable.clone(), fresh);
        let mut new_conjuncts = conjuncts;
        new_conjuncts[idx] = elimination::alpha_rename(&q.inner, &renaming);
        Ok(Step::Successors(vec![SolutionState { formula: Formula::and(new_conjuncts), ..state }]))
    }

    /// §4.6 via §4.3 case D: conjoin one instantiation per new match,
    /// retaining `q` unless its bound nonterminal became unreachable.
    fn eliminate_universal_case(&mut self, state: SolutionState, conjuncts: Vec<Formula>, idx: usize) -> IslaResult<Step> {
        let SolutionState { tree, positions, numeric, already_matched, already_matched_numeric, .. } = state;
        let q = match &conjuncts[idx] {
            Formula::ForAll(q) => (**q).clone(),
            _ => unreachable!(),
        };
        let (reference, base_path) = resolve_scope(&q.in_variable, &tree, &positions);
        let already = already_matched.get(&q.id).cloned().unwrap_or_default();

        match elimination::eliminate_universal(&q, &reference, &already, &self.graph) {
            UniversalOutcome::Discarded => {
                let mut new_conjuncts = conjuncts;
                new_conjuncts.remove(idx);
                Ok(Step::Successors(vec![SolutionState {
                    formula: Formula::and(new_conjuncts),
                    tree,
                    positions,
                    numeric,
                    already_matched,
                    already_matched_numeric,
                }]))
            }
            UniversalOutcome::NoNewMatches => self.expand(SolutionState {
                formula: Formula::and(conjuncts),
                tree,
                positions,
                numeric,
                already_matched,
                already_matched_numeric,
            }),
            UniversalOutcome::Replaced { formula, new_positions, matched_ids } => {
                let mut new_conjuncts = conjuncts;
                new_conjuncts[idx] = formula;
                let mut positions = positions;
                for (v, p) in new_positions {
                    let mut full = base_path.clone();
                    full.extend(p);
                    positions.insert(v, full);
                }
                let mut already_matched = already_matched;
                already_matched.entry(q.id).or_default().extend(matched_ids);
                Ok(Step::Successors(vec![SolutionState {
                    formula: Formula::and(new_conjuncts),
                    tree,
                    positions,
                    numeric,
                    already_matched,
                    already_matched_numeric,
                }]))
            }
        }
    }

    /// Numeric analogue of universal matching (§4.10's "instantiate over
    /// known numeric constants"): conjoin one instantiation per numeric
    /// constant bound so far that this quantifier hasn't consumed yet. No
    /// constants known yet falls through to tree expansion, which may
    /// eventually produce one via another conjunct (e.g. `octal_to_decimal`).
    fn eliminate_universal_num_case(&mut self, state: SolutionState, conjuncts: Vec<Formula>, idx: usize) -> IslaResult<Step> {
        let SolutionState { tree, positions, numeric, already_matched, already_matched_numeric, .. } = state;
        let q = match &conjuncts[idx] {
            Formula::ForAllNum(q) => (**q).clone(),
            _ => unreachable!(),
        };
        let consumed = already_matched_numeric.get(&q.id).cloned().unwrap_or_default();
        let fresh: Vec<Variable> = numeric.keys().filter(|v| !consumed.contains(*v)).cloned().collect();
        if fresh.is_empty() {
            return self.expand(SolutionState {
                formula: Formula::and(conjuncts),
                tree,
                positions,
                numeric,
                already_matched,
                already_matched_numeric,
            });
        }
        let mut instantiations = Vec::with_capacity(fresh.len());
        let mut consumed_now = consumed;
        for c in &fresh {
            let mut renaming = HashMap::new();
            renaming.insert(q.bound_variable.clone(), c.clone());
            instantiations.push(elimination::alpha_rename(&q.inner, &renaming));
            consumed_now.insert(c.clone());
        }
        instantiations.push(Formula::ForAllNum(Box::new(q.clone())));
        let mut new_conjuncts = conjuncts;
        new_conjuncts[idx] = Formula::and(instantiations);
        let mut already_matched_numeric = already_matched_numeric;
        already_matched_numeric.insert(q.id, consumed_now);
        Ok(Step::Successors(vec![SolutionState {
            formula: Formula::and(new_conjuncts),
            tree,
            positions,
            numeric,
            already_matched,
            already_matched_numeric,
        }]))
    }

    /// §4.7/§4.8: expand one non-freely-instantiable open leaf by every
    /// grammar alternative, or — once every remaining open leaf is freely
    /// instantiable — bulk-fill up to `max_free_instantiations` complete
    /// variants and let the next round of `process` decide their fate.
    fn expand(&mut self, state: SolutionState) -> IslaResult<Step> {
        let open = state.tree.open_concrete_leaves();
        if open.is_empty() {
            // Nothing left to expand and the formula never resolved to
            // True or False: this branch can't make further progress.
            return Ok(Step::Successors(Vec::new()));
        }
        let candidate = open
            .iter()
            .find(|(path, leaf)| !is_freely_instantiable(leaf.symbol().n_type().unwrap_or(""), path, &state.formula, &state.positions, &self.graph));

        if let Some((path, leaf)) = candidate {
            let n_type = leaf.symbol().n_type().unwrap_or("").to_string();
            let alternatives = self.grammar.alternatives(&n_type)?;
            let mut out = Vec::with_capacity(alternatives.len());
            for alt in alternatives {
                let children = Grammar::instantiate_alternative(alt);
                let new_tree = state.tree.replace(path, DerivationTree::inner(Symbol::nonterminal(n_type.clone()), children));
                out.push(SolutionState { tree: new_tree, ..state.clone() });
            }
            return Ok(Step::Successors(out));
        }

        debug!("all {} open leaves are freely instantiable, bulk-filling", open.len());
        let mut out = Vec::with_capacity(self.config.max_free_instantiations);
        for variant in 0..self.config.max_free_instantiations {
            let filled = bulk_free_fill(&state.tree, self.grammar, variant);
            out.push(SolutionState { tree: filled, ..state.clone() });
        }
        Ok(Step::Successors(out))
    }
}

/// Fold one SMT model into a successor state: string-sorted variables'
/// parsed trees are spliced into the tree at the constant's own marker
/// position (§4.5); numeric constants are recorded directly.
fn apply_model(state: &SolutionState, rest: &[Formula], model: Model) -> SolutionState {
    let mut positions = state.positions.clone();
    let mut numeric = state.numeric.clone();
    let mut tree = state.tree.clone();
    for (v, value) in model {
        match value {
            ModelValue::Tree(t) => {
                if let Some(path) = positions.get(&v).cloned() {
                    tree = tree.replace(&path, t);
                }
            }
            ModelValue::Int(n) => {
                numeric.insert(v, n);
            }
        }
    }
    SolutionState {
        formula: Formula::and(rest.to_vec()),
        tree,
        positions,
        numeric,
        already_matched: state.already_matched.clone(),
        already_matched_numeric: state.already_matched_numeric.clone(),
    }
}

impl<'a> Iterator for Solver<'a> {
    type Item = IslaResult<DerivationTree>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(tree) = self.pending.pop_front() {
                return Some(Ok(tree));
            }
            let state = self.queue.pop_front()?;
            match self.process(state) {
                Ok(Step::Complete(trees)) => {
                    self.pending.extend(trees);
                }
                Ok(Step::Successors(states)) => {
                    for s in states {
                        let key = DedupKey(s.formula.clone(), s.tree.clone());
                        if self.seen.insert(key) {
                            self.queue.push_back(s);
                        }
                    }
                }
                Err(e) if e.is_recoverable() => {
                    debug!("dropping branch after recoverable error: {e}");
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{InTree, PredicateArg, PredicateCall, QuantifiedFormula, SmtRelation};
    use crate::grammar::PermissiveRegexApproximator;
    use crate::parsing::RecursiveDescentParser;

    fn var_grammar() -> Grammar {
        Grammar::new("<start>")
            .with_rule("<start>", vec![vec!["<var>".into()]])
            .with_rule("<var>", vec![vec!["a".into()], vec!["b".into()]])
    }

    fn start_tree() -> DerivationTree {
        DerivationTree::inner(Symbol::nonterminal("<start>"), vec![DerivationTree::leaf(Symbol::nonterminal("<var>"))])
    }

    #[test]
    fn pure_expansion_enumerates_every_complete_tree() {
        let grammar = var_grammar();
        let approximator = PermissiveRegexApproximator;
        let parser = RecursiveDescentParser;
        let predicates = PredicateLibrary::standard();
        let solver = Solver::new(&grammar, &approximator, &parser, &predicates, SolverConfig::default(), Formula::True, start_tree());
        let yields: HashSet<String> = solver.take(10).map(|r| r.unwrap().yield_str()).collect();
        assert_eq!(yields, HashSet::from(["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn false_formula_yields_nothing() {
        let grammar = var_grammar();
        let approximator = PermissiveRegexApproximator;
        let parser = RecursiveDescentParser;
        let predicates = PredicateLibrary::standard();
        let solver = Solver::new(&grammar, &approximator, &parser, &predicates, SolverConfig::default(), Formula::False, start_tree());
        assert!(solver.take(5).next().is_none());
    }

    #[test]
    fn grounded_smt_equality_prunes_non_matching_expansions() {
        let grammar = var_grammar();
        let approximator = PermissiveRegexApproximator;
        let parser = RecursiveDescentParser;
        let predicates = PredicateLibrary::standard();
        let start = Variable::constant("start", "<start>");
        let x = Variable::bound("x", "<var>");
        let formula = Formula::ForAll(Box::new(QuantifiedFormula::new(
            x.clone(),
            InTree::Variable(start),
            Formula::Smt(crate::formula::SmtAtom::new(SmtRelation::StrEq, SmtTerm::Var(x), SmtTerm::StrLit("a".into()))),
            None,
        )));
        let solver = Solver::new(&grammar, &approximator, &parser, &predicates, SolverConfig::default(), formula, start_tree());
        let yields: Vec<String> = solver.take(5).map(|r| r.unwrap().yield_str()).collect();
        assert_eq!(yields, vec!["a".to_string()]);
    }

    #[test]
    fn existential_insertion_is_driven_to_a_complete_tree() {
        let grammar = var_grammar();
        let approximator = PermissiveRegexApproximator;
        let parser = RecursiveDescentParser;
        let predicates = PredicateLibrary::standard();
        let start = Variable::constant("start", "<start>");
        let q = QuantifiedFormula::new(Variable::bound("x", "<var>"), InTree::Variable(start), Formula::True, None);
        let solver = Solver::new(&grammar, &approximator, &parser, &predicates, SolverConfig::default(), Formula::Exists(Box::new(q)), start_tree());
        let first = solver.take(1).next().unwrap().unwrap();
        assert!(first.is_complete());
    }

    #[test]
    fn grounded_false_predicate_prunes_immediately() {
        let grammar = Grammar::new("<start>").with_rule("<start>", vec![vec!["<a>".into(), "<b>".into()]]);
        let approximator = PermissiveRegexApproximator;
        let parser = RecursiveDescentParser;
        let predicates = PredicateLibrary::standard();
        let tree = DerivationTree::inner(
            Symbol::nonterminal("<start>"),
            vec![
                DerivationTree::leaf(Symbol::nonterminal("<a>")),
                DerivationTree::leaf(Symbol::nonterminal("<b>")),
            ],
        );
        // Both arguments already grounded at distinct positions, so
        // `same_position` decides to `False` without touching the tree.
        let formula = Formula::StructuralPredicate(PredicateCall::new(
            "same_position",
            vec![
                PredicateArg::Bound { var: None, path: vec![0], tree: tree.get(&[0]).unwrap().clone() },
                PredicateArg::Bound { var: None, path: vec![1], tree: tree.get(&[1]).unwrap().clone() },
            ],
        ));
        let solver = Solver::new(&grammar, &approximator, &parser, &predicates, SolverConfig::default(), formula, tree);
        assert!(solver.take(5).next().is_none());
    }
}
