use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::optimization::SolverSettings;
use crate::portfolio::node::{Node, SearchContext};
use crate::portfolio::{
    BestIntegerSolution, MadSolution, MadSolver, MadStatement, ProblemKind, ProblemParameters,
    SolutionStatus, SolveControl, Stats,
};

/// Stopping rules of the tree search besides a closed root.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchLimits {
    /// Maximum number of branchings.
    pub iterations: usize,
    /// Maximum number of nodes held by the tree.
    pub nodes: usize,
    pub time: Duration,
    /// Stop as soon as an integer point is known whose reported value is
    /// at or below this limit, or at or above it when maximising return.
    pub objective: Option<f64>,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            iterations: 100_000,
            nodes: 1_000_000,
            time: Duration::from_secs(60),
            objective: None,
        }
    }
}

impl SearchLimits {
    pub fn from_statement(statement: &MadStatement) -> Self {
        Self {
            iterations: statement.iteration_limit,
            nodes: statement.node_limit,
            time: statement.time_limit,
            objective: statement.objective_user_limit,
        }
    }
}

/// `(upper - lower) / |lower|`, zero once the bounds meet and infinite
/// while the lower bound is zero or unknown.
pub fn relative_gap(upper: f64, lower: f64) -> f64 {
    if upper <= lower {
        0.0
    } else if lower.is_finite() && lower != 0.0 {
        (upper - lower) / lower.abs()
    } else {
        f64::INFINITY
    }
}

/// Best-bound branch and bound over integer lot counts.
///
/// Every iteration walks to the open leaf with the smallest relaxation
/// bound, splits it on a fractional coordinate and pushes the new bounds
/// back up. Children re-optimise from their parent's tableau.
#[derive(Debug, Clone)]
pub struct BranchAndBoundSolver {
    params: ProblemParameters,
    settings: SolverSettings,
    limits: SearchLimits,
}

impl BranchAndBoundSolver {
    pub fn new(params: ProblemParameters, settings: SolverSettings, limits: SearchLimits) -> Self {
        Self {
            params,
            settings,
            limits,
        }
    }

    /// Validates the statement and derives risk-minimising parameters and
    /// limits from it.
    pub fn from_statement(statement: &MadStatement, settings: SolverSettings) -> Result<Self> {
        let params = ProblemParameters::from_statement(statement)?;
        Ok(Self::new(params, settings, SearchLimits::from_statement(statement)))
    }

    pub fn params(&self) -> &ProblemParameters {
        &self.params
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    pub fn limits(&self) -> &SearchLimits {
        &self.limits
    }

    pub fn kind(&self) -> ProblemKind {
        self.params.goal.kind(false)
    }
}

impl MadSolver for BranchAndBoundSolver {
    fn solve(&self, control: &SolveControl) -> Result<MadSolution> {
        let mut search = Search::new(self, control);
        control.publish(&search.snapshot(SolutionStatus::Started));

        let status = match search.run() {
            Ok(status) => status,
            Err(Error::Unbounded) => {
                warn!("relaxation reported unbounded");
                SolutionStatus::UnboundedProblem
            }
            Err(e) => {
                warn!("search aborted: {}", e);
                SolutionStatus::NumericalError
            }
        };

        let solution = search.snapshot(status);
        info!(
            "search finished: {} after {} iterations, {} nodes, {} pivots, objective {:.6e}, gap {:.3e}",
            solution.status,
            solution.iterations,
            search.stats.nodes_created,
            search.stats.simplex_iterations,
            solution.objective_value,
            solution.accuracy
        );
        control.publish(&solution);
        Ok(solution)
    }
}

/// Mutable state of one run.
struct Search<'a> {
    params: &'a ProblemParameters,
    settings: &'a SolverSettings,
    limits: &'a SearchLimits,
    control: &'a SolveControl,
    incumbent: BestIntegerSolution,
    stats: Stats,
    /// Root bound after the latest iteration.
    lower_bound: f64,
    iterations: usize,
    started: Instant,
}

impl<'a> Search<'a> {
    fn new(solver: &'a BranchAndBoundSolver, control: &'a SolveControl) -> Self {
        Self {
            params: &solver.params,
            settings: &solver.settings,
            limits: &solver.limits,
            control,
            incumbent: BestIntegerSolution::new(),
            stats: Stats::default(),
            lower_bound: f64::NEG_INFINITY,
            iterations: 0,
            started: Instant::now(),
        }
    }

    fn ctx(&mut self) -> SearchContext<'_> {
        SearchContext {
            params: self.params,
            settings: self.settings,
            incumbent: &mut self.incumbent,
            stats: &mut self.stats,
        }
    }

    fn run(&mut self) -> Result<SolutionStatus> {
        let mut root = Node::root(&mut self.ctx())?;
        self.lower_bound = root.lower_bound;
        debug!("root bound {:.6e}, state {:?}", root.lower_bound, root.state);

        let mut seen = 0;
        loop {
            if self.incumbent.improvements() != seen {
                seen = self.incumbent.improvements();
                root.update_by_upper_bound(self.incumbent.upper_bound(), &mut self.stats);
            }
            if let Some(status) = self.stop_status(&root) {
                return Ok(status);
            }

            self.iterations += 1;
            self.expand(&mut root)?;

            let tolerance = self.settings.tolerances.feasibility;
            if root.lower_bound < self.lower_bound - tolerance {
                warn!(
                    "root bound decreased from {} to {}",
                    self.lower_bound, root.lower_bound
                );
            }
            self.lower_bound = root.lower_bound;
            self.control.publish(&self.snapshot(SolutionStatus::Started));
        }
    }

    fn stop_status(&self, root: &Node) -> Option<SolutionStatus> {
        let upper_bound = self.incumbent.upper_bound();
        if root.is_closed() || root.lower_bound >= upper_bound {
            return Some(if self.incumbent.has_solution() {
                SolutionStatus::OptimalFound
            } else {
                SolutionStatus::IncorrectProblem
            });
        }
        if self.iterations >= self.limits.iterations {
            return Some(SolutionStatus::IterationLimitReached);
        }
        if self.started.elapsed() >= self.limits.time {
            return Some(SolutionStatus::TimeLimitReached);
        }
        if self.stats.node_count >= self.limits.nodes {
            return Some(SolutionStatus::NodeLimitReached);
        }
        if relative_gap(upper_bound, root.lower_bound) <= self.settings.tolerances.relative_gap {
            return Some(SolutionStatus::SuboptimalFound);
        }
        if let Some(limit) = self.limits.objective {
            let reached = self
                .params
                .goal
                .meets_limit(self.params.reported_value(upper_bound), limit);
            if self.incumbent.has_solution() && reached {
                return Some(SolutionStatus::UserObjLimitReached);
            }
        }
        if self.control.is_interrupted() {
            return Some(SolutionStatus::Interrupted);
        }
        None
    }

    /// Branches the most promising leaf and updates the bounds on its path.
    fn expand(&mut self, root: &mut Node) -> Result<()> {
        let path = root.find_min_path();
        let iteration = self.iterations;
        let mut ctx = self.ctx();
        let leaf = root
            .descend_mut(&path)
            .ok_or_else(|| Error::invalid_input("search path left the tree"))?;
        let integral = leaf.bifurcate(&mut ctx)?;
        trace!(
            "iteration {}: branched at depth {}, {} integral lots",
            iteration,
            path.len(),
            integral
        );

        for depth in (0..=path.len()).rev() {
            let node = root
                .descend_mut(&path[..depth])
                .ok_or_else(|| Error::invalid_input("search path left the tree"))?;
            if !node.update_node_value(ctx.stats) {
                break;
            }
        }
        Ok(())
    }

    fn snapshot(&self, status: SolutionStatus) -> MadSolution {
        let mut solution = MadSolution::new(self.params.goal.kind(false), status);
        if let Some(nu) = self.incumbent.nu() {
            solution.describe(self.params, nu);
        }
        solution.accuracy = relative_gap(self.incumbent.upper_bound(), self.lower_bound);
        solution.iterations = self.iterations;
        solution.nodes = self.stats.nodes_created;
        solution.elapsed = self.started.elapsed();
        solution
    }
}
