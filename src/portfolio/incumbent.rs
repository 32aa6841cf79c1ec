use log::debug;
use ndarray::Array1;

/// Best integer point seen so far in a search.
#[derive(Debug, Clone)]
pub struct BestIntegerSolution {
    upper_bound: f64,
    nu: Option<Array1<f64>>,
    improvements: usize,
}

impl Default for BestIntegerSolution {
    fn default() -> Self {
        Self {
            upper_bound: f64::INFINITY,
            nu: None,
            improvements: 0,
        }
    }
}

impl BestIntegerSolution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upper_bound(&self) -> f64 {
        self.upper_bound
    }

    pub fn nu(&self) -> Option<&Array1<f64>> {
        self.nu.as_ref()
    }

    pub fn has_solution(&self) -> bool {
        self.nu.is_some()
    }

    /// Number of accepted offers; changes whenever the bound improves.
    pub fn improvements(&self) -> usize {
        self.improvements
    }

    /// Replaces the incumbent if `value` is finite and strictly better.
    pub fn offer(&mut self, value: f64, nu: &Array1<f64>) -> bool {
        if !value.is_finite() || value >= self.upper_bound {
            return false;
        }
        debug!("incumbent improved: {} -> {}", self.upper_bound, value);
        self.upper_bound = value;
        self.nu = Some(nu.clone());
        self.improvements += 1;
        true
    }
}

/// Search counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    /// Nodes currently held by the tree.
    pub node_count: usize,
    pub nodes_created: usize,
    pub simplex_iterations: usize,
}
