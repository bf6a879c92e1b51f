//! Variables and bind expressions (§3).

use std::fmt;

use crate::tree::{DerivationTree, Symbol};

/// A distinguished nonterminal type tag used for numeric quantifier
/// variables (§3: "Numeric variables use a distinguished type tag").
pub const NUMERIC_TYPE: &str = "NUM";

/// A free, user-visible constant, or a variable bound by a quantifier or
/// a bind expression (§3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Variable {
    Constant { name: String, n_type: String },
    BoundVariable { name: String, n_type: String },
}

impl Variable {
    pub fn constant(name: impl Into<String>, n_type: impl Into<String>) -> Self {
        Variable::Constant {
            name: name.into(),
            n_type: n_type.into(),
        }
    }

    pub fn bound(name: impl Into<String>, n_type: impl Into<String>) -> Self {
        Variable::BoundVariable {
            name: name.into(),
            n_type: n_type.into(),
        }
    }

    /// A numeric constant, e.g. the `N` bound by a `∃ N: ...` formula.
    pub fn numeric_constant(name: impl Into<String>) -> Self {
        Variable::constant(name, NUMERIC_TYPE)
    }

    pub fn name(&self) -> &str {
        match self {
            Variable::Constant { name, .. } => name,
            Variable::BoundVariable { name, .. } => name,
        }
    }

    pub fn n_type(&self) -> &str {
        match self {
            Variable::Constant { n_type, .. } => n_type,
            Variable::BoundVariable { n_type, .. } => n_type,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.n_type() == NUMERIC_TYPE
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, Variable::BoundVariable { .. })
    }

    /// A tree leaf that stands for this variable's own subtree, used by
    /// existential tree insertion (§4.5) to mark exactly which node a
    /// fresh constant occupies.
    pub fn as_leaf(&self) -> DerivationTree {
        DerivationTree::leaf(Symbol::Variable(self.clone()))
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One element of a [`BindExpression`]'s tree-prefix pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BindElement {
    Literal(String),
    Variable(Variable),
}

/// An ordered sequence of terminal literals and bound variables defining
/// a tree prefix pattern for a bound variable's subtree (§3, glossary).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BindExpression {
    pub elements: Vec<BindElement>,
}

impl BindExpression {
    pub fn new(elements: Vec<BindElement>) -> Self {
        Self { elements }
    }

    /// The additional bound variables introduced by this bind
    /// expression, in left-to-right order.
    pub fn bound_variables(&self) -> Vec<&Variable> {
        self.elements
            .iter()
            .filter_map(|e| match e {
                BindElement::Variable(v) => Some(v),
                BindElement::Literal(_) => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_constants_carry_the_distinguished_type() {
        let n = Variable::numeric_constant("N");
        assert!(n.is_numeric());
        assert_eq!(n.n_type(), NUMERIC_TYPE);
    }

    #[test]
    fn bind_expression_collects_bound_variables_in_order() {
        let a = Variable::bound("a", "<var>");
        let b = Variable::bound("b", "<var>");
        let be = BindExpression::new(vec![
            BindElement::Literal("x".into()),
            BindElement::Variable(a.clone()),
            BindElement::Literal(" := ".into()),
            BindElement::Variable(b.clone()),
        ]);
        assert_eq!(be.bound_variables(), vec![&a, &b]);
    }
}
