use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use ndarray::{Array1, Array2};
use num_traits::ToPrimitive;

use crate::error::Result;
use crate::optimization::SolverSettings;

pub mod branch_and_bound;
pub mod cube;
pub mod incumbent;
pub mod local_improve;
pub mod node;
pub mod parameters;
pub mod relaxation;
pub mod synthetic;
pub mod table_builder;
pub mod tighten;
pub mod worker;

#[cfg(test)]
mod tests;

pub use branch_and_bound::{BranchAndBoundSolver, SearchLimits};
pub use incumbent::{BestIntegerSolution, Stats};
pub use parameters::{Goal, ProblemParameters};
pub use relaxation::RelaxationSolver;
pub use worker::{spawn, spawn_with_control, SolveHandle};

/// Which flavour of the MAD model a statement asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProblemKind {
    /// Minimise risk over integer lots.
    #[default]
    MadMin,
    /// Maximise return under a risk cap over integer lots.
    MadMax,
    /// Minimise risk over fractional lots.
    MadMinLp,
    /// Maximise return under a risk cap over fractional lots.
    MadMaxLp,
}

impl ProblemKind {
    pub fn maximizes_return(&self) -> bool {
        matches!(self, ProblemKind::MadMax | ProblemKind::MadMaxLp)
    }

    pub fn is_relaxed(&self) -> bool {
        matches!(self, ProblemKind::MadMinLp | ProblemKind::MadMaxLp)
    }
}

/// Final or intermediate state of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolutionStatus {
    #[default]
    NotStarted,
    Started,
    OptimalFound,
    /// The constraints admit no integer point.
    IncorrectProblem,
    UnboundedProblem,
    IterationLimitReached,
    NodeLimitReached,
    TimeLimitReached,
    Interrupted,
    NumericalError,
    /// The relative gap fell below the configured threshold.
    SuboptimalFound,
    UserObjLimitReached,
    NotSupported,
}

impl SolutionStatus {
    /// True once the solver has stopped working on the problem.
    pub fn is_final(&self) -> bool {
        !matches!(self, SolutionStatus::NotStarted | SolutionStatus::Started)
    }
}

impl fmt::Display for SolutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SolutionStatus::NotStarted => "not started",
            SolutionStatus::Started => "started",
            SolutionStatus::OptimalFound => "optimal found",
            SolutionStatus::IncorrectProblem => "incorrect problem",
            SolutionStatus::UnboundedProblem => "unbounded problem",
            SolutionStatus::IterationLimitReached => "iteration limit reached",
            SolutionStatus::NodeLimitReached => "node limit reached",
            SolutionStatus::TimeLimitReached => "time limit reached",
            SolutionStatus::Interrupted => "interrupted",
            SolutionStatus::NumericalError => "numerical error",
            SolutionStatus::SuboptimalFound => "suboptimal found",
            SolutionStatus::UserObjLimitReached => "user objective limit reached",
            SolutionStatus::NotSupported => "not supported",
        };
        f.write_str(name)
    }
}

/// Input of a solve: market history, trading granularity and limits.
#[derive(Debug, Clone)]
pub struct MadStatement {
    /// Per-period return of every asset, assets by periods.
    pub time_rate: Array2<f64>,
    /// Largest fraction of capital a single asset may take.
    pub max_weight: Vec<f64>,
    /// Lower limit on the expected portfolio return.
    pub min_return: f64,
    /// Upper limit on the mean absolute deviation, used by the max-return kinds.
    pub max_risk: f64,
    pub lot_size: Vec<f64>,
    pub close: Vec<f64>,
    pub capital: f64,
    /// Smallest fraction of capital that has to be invested.
    pub min_size: f64,
    pub objective_user_limit: Option<f64>,
    pub iteration_limit: usize,
    pub node_limit: usize,
    pub time_limit: Duration,
}

impl MadStatement {
    /// Creates a statement with every asset capped at the full capital, no
    /// return floor, no minimum investment and generous limits.
    pub fn new(time_rate: Array2<f64>, close: Vec<f64>, lot_size: Vec<f64>, capital: f64) -> Self {
        let assets = time_rate.nrows();
        Self {
            time_rate,
            max_weight: vec![1.0; assets],
            min_return: f64::NEG_INFINITY,
            max_risk: f64::INFINITY,
            lot_size,
            close,
            capital,
            min_size: 0.0,
            objective_user_limit: None,
            iteration_limit: 100_000,
            node_limit: 1_000_000,
            time_limit: Duration::from_secs(60),
        }
    }

    pub fn with_max_weight(mut self, max_weight: Vec<f64>) -> Self {
        self.max_weight = max_weight;
        self
    }

    pub fn with_min_return(mut self, min_return: f64) -> Self {
        self.min_return = min_return;
        self
    }

    pub fn with_max_risk(mut self, max_risk: f64) -> Self {
        self.max_risk = max_risk;
        self
    }

    pub fn with_min_size(mut self, min_size: f64) -> Self {
        self.min_size = min_size;
        self
    }

    pub fn with_objective_limit(mut self, limit: f64) -> Self {
        self.objective_user_limit = Some(limit);
        self
    }

    pub fn with_iteration_limit(mut self, limit: usize) -> Self {
        self.iteration_limit = limit;
        self
    }

    pub fn with_node_limit(mut self, limit: usize) -> Self {
        self.node_limit = limit;
        self
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = limit;
        self
    }

    pub fn assets(&self) -> usize {
        self.time_rate.nrows()
    }

    pub fn periods(&self) -> usize {
        self.time_rate.ncols()
    }
}

/// Output of a solve.
#[derive(Debug, Clone, PartialEq)]
pub struct MadSolution {
    pub problem_kind: ProblemKind,
    pub status: SolutionStatus,
    /// Half the summed absolute deviation of the chosen portfolio, or its
    /// expected return for the max-return kinds.
    pub objective_value: f64,
    /// Capital spent on the chosen lots.
    pub total_cost: f64,
    pub lots: Vec<u32>,
    /// Fraction of capital per asset.
    pub weights: Vec<f64>,
    /// Mean absolute deviation of the portfolio return.
    pub risk_value: f64,
    /// Expected portfolio return.
    pub return_value: f64,
    /// Relative gap between the incumbent and the best bound.
    pub accuracy: f64,
    pub iterations: usize,
    pub nodes: usize,
    pub elapsed: Duration,
}

impl Default for MadSolution {
    fn default() -> Self {
        Self {
            problem_kind: ProblemKind::default(),
            status: SolutionStatus::NotStarted,
            objective_value: f64::INFINITY,
            total_cost: 0.0,
            lots: Vec::new(),
            weights: Vec::new(),
            risk_value: f64::INFINITY,
            return_value: 0.0,
            accuracy: f64::INFINITY,
            iterations: 0,
            nodes: 0,
            elapsed: Duration::ZERO,
        }
    }
}

impl MadSolution {
    pub fn new(problem_kind: ProblemKind, status: SolutionStatus) -> Self {
        let objective_value = if problem_kind.maximizes_return() {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
        Self {
            problem_kind,
            status,
            objective_value,
            ..Self::default()
        }
    }

    /// Fills the portfolio fields from a lot vector, which may be fractional
    /// for the relaxed kinds.
    pub fn describe(&mut self, params: &ProblemParameters, nu: &Array1<f64>) {
        let weights = &params.gr * nu;
        self.objective_value = params.reported_value(params.objective(nu));
        self.total_cost = params.capital * weights.sum();
        self.lots = nu
            .iter()
            .map(|v| v.floor().max(0.0).to_u32().unwrap_or(u32::MAX))
            .collect();
        self.weights = weights.to_vec();
        self.risk_value = params.risk(nu);
        self.return_value = params.expected_return(nu);
    }

    pub fn has_portfolio(&self) -> bool {
        !self.lots.is_empty()
    }
}

/// Shared state between a running solve and its supervisor.
///
/// The solver publishes progress snapshots and polls the interrupt flag once
/// per iteration; the supervisor may read snapshots at any time.
#[derive(Debug, Default)]
pub struct SolveControl {
    interrupted: AtomicBool,
    current: Mutex<MadSolution>,
}

impl SolveControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub fn publish(&self, snapshot: &MadSolution) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current = snapshot.clone();
    }

    /// Latest published snapshot.
    pub fn current(&self) -> MadSolution {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Common contract of every solver variant.
pub trait MadSolver {
    /// Runs the solve to completion, publishing progress through `control`.
    ///
    /// Only invalid input is reported as an error; every other outcome,
    /// infeasibility included, is a status of the returned solution.
    fn solve(&self, control: &SolveControl) -> Result<MadSolution>;
}

/// Solver chosen for a problem kind.
#[derive(Debug, Clone)]
pub enum Strategy {
    BranchAndBound(BranchAndBoundSolver),
    Relaxation(RelaxationSolver),
}

impl Strategy {
    /// Validates the statement and picks the solver for `kind`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for a bad statement, including a
    /// max-return kind without a finite `max_risk`.
    pub fn for_kind(
        kind: ProblemKind,
        statement: &MadStatement,
        settings: SolverSettings,
    ) -> Result<Self> {
        let params = ProblemParameters::for_kind(statement, kind)?;
        let strategy = if kind.is_relaxed() {
            Strategy::Relaxation(RelaxationSolver::new(params, settings))
        } else {
            let limits = SearchLimits::from_statement(statement);
            Strategy::BranchAndBound(BranchAndBoundSolver::new(params, settings, limits))
        };
        Ok(strategy)
    }

    pub fn kind(&self) -> ProblemKind {
        match self {
            Strategy::BranchAndBound(solver) => solver.kind(),
            Strategy::Relaxation(solver) => solver.kind(),
        }
    }
}

impl MadSolver for Strategy {
    fn solve(&self, control: &SolveControl) -> Result<MadSolution> {
        match self {
            Strategy::BranchAndBound(solver) => solver.solve(control),
            Strategy::Relaxation(solver) => solver.solve(control),
        }
    }
}
