pub mod matrix;
pub mod simplex;

pub use simplex::{Phase, Repair, Step, Tableau};

/// Numerical tolerances, one per class of test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances {
    /// A reduced cost at or above `-pivot_optimality` counts as non-negative.
    pub pivot_optimality: f64,
    /// Smallest column entry accepted as a pivot in the ratio test.
    pub pivot_entry: f64,
    /// A phase one objective within this distance of zero counts as feasible.
    pub phase_one_feasibility: f64,
    /// Distance to the nearest integer below which a relaxed coordinate is integral.
    pub integrality: f64,
    /// Slack allowed when checking an integer point against the constraints.
    pub feasibility: f64,
    /// Search stops once `upper / lower - 1` falls to this value.
    pub relative_gap: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            pivot_optimality: 1e-12,
            pivot_entry: 1e-12,
            phase_one_feasibility: 1e-10,
            integrality: 1e-9,
            feasibility: 1e-9,
            relative_gap: 1e-4,
        }
    }
}

/// Configuration shared by the tableau engine and the tree search.
#[derive(Debug, Clone)]
pub struct SolverSettings {
    pub tolerances: Tolerances,
    /// Maximum number of pivots for a single re-optimisation.
    pub max_pivots: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            tolerances: Tolerances::default(),
            max_pivots: 10_000,
        }
    }
}

impl SolverSettings {
    pub fn with_tolerances(mut self, tolerances: Tolerances) -> Self {
        self.tolerances = tolerances;
        self
    }

    pub fn with_max_pivots(mut self, max_pivots: usize) -> Self {
        self.max_pivots = max_pivots;
        self
    }

    pub fn with_relative_gap(mut self, gap: f64) -> Self {
        self.tolerances.relative_gap = gap;
        self
    }
}
