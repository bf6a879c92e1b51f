//! Solver configuration (§6)

/// Tunable knobs for a [`crate::solver::Solver`] run.
///
/// Plain struct with a `Default` impl, following the teacher's
/// `Z3VerificationConfig` style rather than reaching for an external
/// config-loading crate.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    /// Bound on the number of complete candidate trees produced per state
    /// when every open leaf is freely instantiable (§4.8).
    pub max_free_instantiations: usize,
    /// Bound on the number of distinct SMT models requested per semantic
    /// elimination round (§4.4).
    pub max_smt_instantiations: usize,
    /// Per-call SMT solver timeout (§5).
    pub smt_timeout_ms: u64,
    /// Weights handed to an external cost function; five non-negative
    /// reals per §6. Not interpreted by the core itself.
    pub weight_vector: [f64; 5],
    /// Optional output directory for emitted artifacts; opaque to the
    /// core (file I/O is out of scope, §1).
    pub output_directory: Option<String>,
    /// Opaque placeholder carried for a fuzzing wrapper that is out of
    /// scope (§1); never inspected by the core.
    pub fuzz_placeholder: Option<String>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_free_instantiations: 10,
            max_smt_instantiations: 10,
            smt_timeout_ms: 1000,
            weight_vector: [0.0; 5],
            output_directory: None,
            fuzz_placeholder: None,
        }
    }
}

impl SolverConfig {
    pub fn with_max_free_instantiations(mut self, n: usize) -> Self {
        self.max_free_instantiations = n.max(1);
        self
    }

    pub fn with_max_smt_instantiations(mut self, n: usize) -> Self {
        self.max_smt_instantiations = n.max(1);
        self
    }

    pub fn with_smt_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.smt_timeout_ms = timeout_ms.max(1);
        self
    }

    pub fn with_weight_vector(mut self, weights: [f64; 5]) -> Self {
        self.weight_vector = weights;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = SolverConfig::default();
        assert_eq!(config.max_free_instantiations, 10);
        assert_eq!(config.max_smt_instantiations, 10);
        assert_eq!(config.smt_timeout_ms, 1000);
    }

    #[test]
    fn builder_enforces_minimums() {
        let config = SolverConfig::default()
            .with_max_free_instantiations(0)
            .with_smt_timeout_ms(0);
        assert_eq!(config.max_free_instantiations, 1);
        assert_eq!(config.smt_timeout_ms, 1);
    }
}
