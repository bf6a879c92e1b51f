//! SMT bridge (§4.4).
//!
//! Ground-atom evaluation (used by the three-valued evaluator, §4.9) is
//! plain arithmetic over already-resolved values and needs no solver.
//! Model enumeration — assembling the quantifier-free residue, attaching
//! per-variable regex constraints, and asking for up to k distinct
//! models — goes through the `z3` crate behind the `z3-backend` feature,
//! following the teacher's `z3_verification/verifier.rs` pattern of one
//! `Context`/`Solver` pair per call rather than a shared global instance.

use std::collections::HashMap;

use log::{debug, warn};

use crate::error::{IslaError, IslaResult};
use crate::formula::{SmtAtom, SmtRelation, SmtTerm};
use crate::grammar::{Grammar, RegexCache};
use crate::parsing::TreeParser;
use crate::tree::DerivationTree;
use crate::variable::Variable;

/// A resolved value for one free variable of a model (§4.4): a
/// derivation subtree for string-sorted (tree-backed) variables, or a
/// plain integer for numeric constants, which are not tree-backed (§3).
#[derive(Debug, Clone, PartialEq)]
pub enum ModelValue {
    Tree(DerivationTree),
    Int(i64),
}

pub type Model = HashMap<Variable, ModelValue>;

#[derive(Debug, Clone)]
enum TermValue {
    Str(String),
    Int(i64),
}

fn term_value(term: &SmtTerm, bindings: &HashMap<Variable, ModelValue>) -> Option<TermValue> {
    match term {
        SmtTerm::StrLit(s) => Some(TermValue::Str(s.clone())),
        SmtTerm::IntLit(n) => Some(TermValue::Int(*n)),
        SmtTerm::Var(v) => bindings.get(v).map(|value| match value {
            ModelValue::Tree(t) => TermValue::Str(t.yield_str()),
            ModelValue::Int(n) => TermValue::Int(*n),
        }),
        SmtTerm::Length(inner) => match term_value(inner, bindings)? {
            TermValue::Str(s) => Some(TermValue::Int(s.chars().count() as i64)),
            TermValue::Int(_) => None,
        },
    }
}

/// Evaluate a fully-grounded SMT atom (§4.9: "substitute each free tree
/// variable by the string yield of its assignment"). `Ok(None)` means a
/// free variable in the atom is not yet bound — the caller should treat
/// that as `Truth::Unknown` rather than call into the solver.
pub fn evaluate_ground_atom(atom: &SmtAtom, bindings: &HashMap<Variable, ModelValue>) -> IslaResult<Option<bool>> {
    let lhs = term_value(&atom.lhs, bindings);
    let rhs = term_value(&atom.rhs, bindings);
    let (lhs, rhs) = match (lhs, rhs) {
        (Some(l), Some(r)) => (l, r),
        _ => return Ok(None),
    };
    let result = match (atom.relation, &lhs, &rhs) {
        (SmtRelation::StrEq, TermValue::Str(a), TermValue::Str(b)) => a == b,
        (SmtRelation::NumEq, TermValue::Int(a), TermValue::Int(b)) => a == b,
        (SmtRelation::NumLe, TermValue::Int(a), TermValue::Int(b)) => a <= b,
        (SmtRelation::NumLt, TermValue::Int(a), TermValue::Int(b)) => a < b,
        (SmtRelation::NumGe, TermValue::Int(a), TermValue::Int(b)) => a >= b,
        (SmtRelation::NumGt, TermValue::Int(a), TermValue::Int(b)) => a > b,
        _ => {
            return Err(IslaError::constraint_error(
                "SMT atom relation/operand sort mismatch",
            ))
        }
    };
    Ok(Some(if atom.negated { !result } else { result }))
}

/// Iterative model enumeration for a conjunction of SMT atoms (§4.4).
/// `vars` are the free variables of the conjunction needing a model;
/// string-sorted variables are constrained to `R(v.n_type)` and parsed
/// back via `parser`, numeric constants are returned as plain integers.
///
/// Returns an empty vector on first-call UNSAT (§7: "silently dropped;
/// no error"); a parse-back failure discards that one model and
/// continues enumerating (§7) rather than aborting the whole call.
#[cfg(feature = "z3-backend")]
pub fn solve_conjunction(
    grammar: &Grammar,
    regex_cache: &RegexCache,
    parser: &dyn TreeParser,
    atoms: &[SmtAtom],
    vars: &[Variable],
    max_models: usize,
    timeout_ms: u32,
) -> IslaResult<Vec<Model>> {
    use z3::ast::{Ast, Bool, Int, Regex as Z3Regex, String as Z3String};
    use z3::{Config, Context, SatResult, Solver};

    let mut config = Config::new();
    config.set_timeout_msec(timeout_ms as u64);
    let ctx = Context::new(&config);
    let solver = Solver::new(&ctx);

    let mut str_consts: HashMap<&Variable, Z3String> = HashMap::new();
    let mut int_consts: HashMap<&Variable, Int> = HashMap::new();

    for var in vars {
        if var.is_numeric() {
            int_consts.insert(var, Int::new_const(&ctx, var.name()));
        } else {
            let sv = Z3String::new_const(&ctx, var.name());
            let pattern = regex_cache.get(var.n_type())?;
            let membership = Z3String::regex_match(&sv, &pattern_to_z3_regex(&ctx, pattern.as_str())?);
            solver.assert(&membership);
            str_consts.insert(var, sv);
        }
    }

    for atom in atoms {
        solver.assert(&atom_to_z3(&ctx, atom, &str_consts, &int_consts)?);
    }

    let mut models = Vec::new();
    while models.len() < max_models {
        match solver.check() {
            SatResult::Unsat => break,
            SatResult::Unknown => {
                if models.is_empty() {
                    return Err(IslaError::SmtTimeout {
                        timeout_ms: timeout_ms as u64,
                    });
                }
                break;
            }
            SatResult::Sat => {
                let z3_model = solver
                    .get_model()
                    .ok_or_else(|| IslaError::SmtUnknown {
                        message: "solver reported SAT but produced no model".into(),
                    })?;

                let mut blocking = Vec::new();
                let mut model = Model::new();
                let mut parse_failed = false;

                for (var, sv) in &str_consts {
                    let value = z3_model
                        .eval(sv, true)
                        .and_then(|v| v.as_string())
                        .ok_or_else(|| IslaError::SmtUnknown {
                            message: format!("no string value for `{}` in model", var.name()),
                        })?;
                    blocking.push(sv._eq(&Z3String::from_str(&ctx, &value)).not());
                    match parser.parse(grammar, var.n_type(), &value) {
                        Ok(tree) => {
                            model.insert((*var).clone(), ModelValue::Tree(tree));
                        }
                        Err(e) => {
                            warn!("SMT model parse-back failed for `{}`: {e}", var.name());
                            parse_failed = true;
                        }
                    }
                }
                for (var, iv) in &int_consts {
                    let value = z3_model
                        .eval(iv, true)
                        .and_then(|v| v.as_i64())
                        .ok_or_else(|| IslaError::SmtUnknown {
                            message: format!("no integer value for `{}` in model", var.name()),
                        })?;
                    blocking.push(iv._eq(&Int::from_i64(&ctx, value)).not());
                    model.insert((*var).clone(), ModelValue::Int(value));
                }

                let blocking_refs: Vec<&Bool> = blocking.iter().collect();
                solver.assert(&Bool::or(&ctx, &blocking_refs));

                if parse_failed {
                    continue;
                }
                if models.contains(&model) {
                    // §4.4: "duplicate model returned -> stop (formula
                    // trivially valid)".
                    break;
                }
                debug!("SMT model accepted ({} so far)", models.len() + 1);
                models.push(model);
            }
        }
    }
    Ok(models)
}

/// Translate a `RegexApproximator` pattern (§2) into the Z3 regex it
/// actually denotes, so the `InRe` constraint filters string-sorted
/// models instead of admitting everything and leaving all the work to
/// parse-back. `".*"` (the permissive approximator's only output) maps
/// to `Regex::full`; a pattern with no regex metacharacters is a plain
/// literal and maps to `Regex::literal`. Any other shape is outside
/// what this bridge can translate faithfully — erroring here (rather
/// than silently widening to `full`) keeps the SMT stage honest about
/// what it actually constrained, per §4.4.
#[cfg(feature = "z3-backend")]
fn pattern_to_z3_regex<'ctx>(ctx: &'ctx z3::Context, pattern: &str) -> IslaResult<z3::ast::Regex<'ctx>> {
    const METACHARACTERS: &[char] = &['.', '*', '+', '?', '[', ']', '(', ')', '|', '\\', '^', '$', '{', '}'];

    if pattern == ".*" {
        Ok(z3::ast::Regex::full(ctx))
    } else if !pattern.contains(METACHARACTERS) {
        Ok(z3::ast::Regex::literal(ctx, pattern))
    } else {
        Err(IslaError::z3_error(format!(
            "regex approximator pattern `{pattern}` has no known Z3 regex translation"
        )))
    }
}

#[cfg(feature = "z3-backend")]
fn atom_to_z3<'ctx>(
    ctx: &'ctx z3::Context,
    atom: &SmtAtom,
    str_consts: &HashMap<&Variable, z3::ast::String<'ctx>>,
    int_consts: &HashMap<&Variable, z3::ast::Int<'ctx>>,
) -> IslaResult<z3::ast::Bool<'ctx>> {
    use z3::ast::{Ast, Bool, Int, String as Z3String};

    enum Dyn<'ctx> {
        Str(Z3String<'ctx>),
        Int(Int<'ctx>),
    }

    fn term<'ctx>(
        ctx: &'ctx z3::Context,
        term: &SmtTerm,
        str_consts: &HashMap<&Variable, Z3String<'ctx>>,
        int_consts: &HashMap<&Variable, Int<'ctx>>,
    ) -> IslaResult<Dyn<'ctx>> {
        Ok(match term {
            SmtTerm::StrLit(s) => Dyn::Str(Z3String::from_str(ctx, s)),
            SmtTerm::IntLit(n) => Dyn::Int(Int::from_i64(ctx, *n)),
            SmtTerm::Var(v) => {
                if let Some(sv) = str_consts.get(v) {
                    Dyn::Str(sv.clone())
                } else if let Some(iv) = int_consts.get(v) {
                    Dyn::Int(iv.clone())
                } else {
                    return Err(IslaError::constraint_error(format!(
                        "SMT term references unbound variable `{}`",
                        v.name()
                    )));
                }
            }
            SmtTerm::Length(inner) => match term(ctx, inner, str_consts, int_consts)? {
                Dyn::Str(s) => Dyn::Int(s.length()),
                Dyn::Int(_) => {
                    return Err(IslaError::constraint_error("`length` applied to a non-string term"))
                }
            },
        })
    }

    let lhs = term(ctx, &atom.lhs, str_consts, int_consts)?;
    let rhs = term(ctx, &atom.rhs, str_consts, int_consts)?;
    let formula = match (atom.relation, lhs, rhs) {
        (SmtRelation::StrEq, Dyn::Str(a), Dyn::Str(b)) => a._eq(&b),
        (SmtRelation::NumEq, Dyn::Int(a), Dyn::Int(b)) => a._eq(&b),
        (SmtRelation::NumLe, Dyn::Int(a), Dyn::Int(b)) => a.le(&b),
        (SmtRelation::NumLt, Dyn::Int(a), Dyn::Int(b)) => a.lt(&b),
        (SmtRelation::NumGe, Dyn::Int(a), Dyn::Int(b)) => a.ge(&b),
        (SmtRelation::NumGt, Dyn::Int(a), Dyn::Int(b)) => a.gt(&b),
        _ => return Err(IslaError::constraint_error("SMT atom relation/operand sort mismatch")),
    };
    Ok(if atom.negated { Bool::not(&formula) } else { formula })
}
