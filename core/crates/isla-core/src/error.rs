//! Error types for the ISLa derivation-tree solver

use thiserror::Error;

/// Main error type for solver operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IslaError {
    #[error("grammar error: unknown nonterminal `{nonterminal}` reached during expansion")]
    GrammarError { nonterminal: String },

    #[error("constraint well-formedness error: {message}")]
    ConstraintError { message: String },

    #[error("SMT solver timed out after {timeout_ms}ms")]
    SmtTimeout { timeout_ms: u64 },

    #[error("SMT solver reported UNKNOWN: {message}")]
    SmtUnknown { message: String },

    #[error("parse failure reconstructing a tree for `{nonterminal}` from `{value}`")]
    ParseFailure { nonterminal: String, value: String },

    #[error("normal-form invariant violated: {message}")]
    InvariantViolation { message: String },

    #[cfg(feature = "z3-backend")]
    #[error("Z3 error: {message}")]
    Z3Error { message: String },
}

impl IslaError {
    pub fn grammar_error(nonterminal: impl Into<String>) -> Self {
        Self::GrammarError {
            nonterminal: nonterminal.into(),
        }
    }

    pub fn constraint_error(message: impl Into<String>) -> Self {
        Self::ConstraintError {
            message: message.into(),
        }
    }

    pub fn invariant_violation(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    pub fn parse_failure(nonterminal: impl Into<String>, value: impl Into<String>) -> Self {
        Self::ParseFailure {
            nonterminal: nonterminal.into(),
            value: value.into(),
        }
    }

    #[cfg(feature = "z3-backend")]
    pub fn z3_error(message: impl Into<String>) -> Self {
        Self::Z3Error {
            message: message.into(),
        }
    }

    /// Whether the caller may treat this as local (pruned branch, rejected
    /// model) rather than as a reason to stop the whole iteration. See §7.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::GrammarError { .. } => false,
            Self::ConstraintError { .. } => false,
            Self::SmtTimeout { .. } => true,
            Self::SmtUnknown { .. } => true,
            Self::ParseFailure { .. } => true,
            Self::InvariantViolation { .. } => false,
            #[cfg(feature = "z3-backend")]
            Self::Z3Error { .. } => true,
        }
    }
}

/// Result type for solver operations
pub type IslaResult<T> = Result<T, IslaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_kinds() {
        assert!(IslaError::SmtTimeout { timeout_ms: 1000 }.is_recoverable());
        assert!(IslaError::parse_failure("<a>", "xyz").is_recoverable());
        assert!(!IslaError::grammar_error("<missing>").is_recoverable());
        assert!(!IslaError::invariant_violation("bad order").is_recoverable());
    }

    #[test]
    #[cfg(feature = "z3-backend")]
    fn z3_error_is_recoverable() {
        assert!(IslaError::z3_error("unsupported pattern").is_recoverable());
    }
}
