use std::time::Instant;

use log::{info, warn};
use ndarray::Array1;

use crate::error::{Error, Result};
use crate::optimization::{Phase, SolverSettings};
use crate::portfolio::table_builder::{build_table, relaxed_lots};
use crate::portfolio::{
    MadSolution, MadSolver, MadStatement, ProblemKind, ProblemParameters, SolutionStatus,
    SolveControl,
};

/// Solves the continuous relaxation on the full box `[0, numax]`.
///
/// The reported lots are the relaxed counts rounded down; objective, weights
/// and return describe the fractional optimum.
#[derive(Debug, Clone)]
pub struct RelaxationSolver {
    params: ProblemParameters,
    settings: SolverSettings,
}

impl RelaxationSolver {
    pub fn new(params: ProblemParameters, settings: SolverSettings) -> Self {
        Self { params, settings }
    }

    pub fn from_statement(statement: &MadStatement, settings: SolverSettings) -> Result<Self> {
        Ok(Self::new(ProblemParameters::from_statement(statement)?, settings))
    }

    pub fn params(&self) -> &ProblemParameters {
        &self.params
    }

    pub fn kind(&self) -> ProblemKind {
        self.params.goal.kind(true)
    }

    fn relaxed_optimum(&self, pivots: &mut usize) -> Result<Option<Array1<f64>>> {
        let params = &self.params;
        let lower = Array1::zeros(params.assets);
        let upper = params.numax.clone();
        let mut tableau = match build_table(params, &lower, &upper, &self.settings)? {
            Some(tableau) => tableau,
            None => return Ok(None),
        };
        let solved = tableau.optimize(Phase::Two, &self.settings);
        *pivots += tableau.take_pivots();
        solved?;
        tableau.clamp_basic_values();
        let free: Vec<usize> = (0..params.assets).filter(|&i| upper[i] > 0.0).collect();
        Ok(Some(relaxed_lots(&tableau, &free, &lower, &upper, params.periods)))
    }
}

impl MadSolver for RelaxationSolver {
    fn solve(&self, control: &SolveControl) -> Result<MadSolution> {
        let started = Instant::now();
        control.publish(&MadSolution::new(self.kind(), SolutionStatus::Started));

        let mut pivots = 0;
        let mut solution = MadSolution::new(self.kind(), SolutionStatus::Started);
        solution.status = if control.is_interrupted() {
            SolutionStatus::Interrupted
        } else {
            match self.relaxed_optimum(&mut pivots) {
                Ok(Some(nu)) => {
                    solution.describe(&self.params, &nu);
                    solution.accuracy = 0.0;
                    SolutionStatus::OptimalFound
                }
                Ok(None) => SolutionStatus::IncorrectProblem,
                Err(Error::Unbounded) => SolutionStatus::UnboundedProblem,
                Err(e) => {
                    warn!("relaxation aborted: {}", e);
                    SolutionStatus::NumericalError
                }
            }
        };
        solution.iterations = pivots;
        solution.elapsed = started.elapsed();
        info!(
            "relaxation finished: {} after {} pivots, objective {:.6e}",
            solution.status, pivots, solution.objective_value
        );
        control.publish(&solution);
        Ok(solution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_hedged_pair_has_zero_risk() {
        let params = ProblemParameters::new(
            array![[0.02, -0.02], [-0.02, 0.02]],
            array![0.3, 0.3],
            array![3.0, 3.0],
            -1.0,
            0.5,
            1.0,
        )
        .unwrap();
        let solver = RelaxationSolver::new(params, SolverSettings::default());
        let solution = solver.solve(&SolveControl::new()).unwrap();
        assert_eq!(solution.status, SolutionStatus::OptimalFound);
        assert_relative_eq!(solution.objective_value, 0.0, epsilon = 1e-12);
        assert_relative_eq!(solution.weights[0], solution.weights[1], epsilon = 1e-9);
        let invested: f64 = solution.weights.iter().sum();
        assert!(invested >= 0.5 - 1e-9 && invested <= 1.0 + 1e-9);
    }

    #[test]
    fn test_unreachable_minimum_weight() {
        let params = ProblemParameters::new(
            array![[0.02, -0.02], [-0.02, 0.02]],
            array![0.1, 0.1],
            array![1.0, 1.0],
            -1.0,
            0.5,
            1.0,
        )
        .unwrap();
        let solver = RelaxationSolver::new(params, SolverSettings::default());
        let solution = solver.solve(&SolveControl::new()).unwrap();
        assert_eq!(solution.status, SolutionStatus::IncorrectProblem);
        assert!(!solution.has_portfolio());
    }

    #[test]
    fn test_risk_cap_holds_at_fractional_optimum() {
        // the first asset earns more but swings harder against the second
        let params = ProblemParameters::new(
            array![[0.05, -0.01], [-0.01, 0.03]],
            array![0.1, 0.1],
            array![10.0, 10.0],
            -1.0,
            0.5,
            1.0,
        )
        .unwrap()
        .with_risk_cap(0.02)
        .unwrap();
        let solver = RelaxationSolver::new(params, SolverSettings::default());
        assert_eq!(solver.kind(), ProblemKind::MadMaxLp);
        let solution = solver.solve(&SolveControl::new()).unwrap();
        assert_eq!(solution.status, SolutionStatus::OptimalFound);
        assert_eq!(solution.problem_kind, ProblemKind::MadMaxLp);
        assert!(solution.risk_value <= 0.02 + 1e-9);
        assert_relative_eq!(solution.objective_value, solution.return_value, epsilon = 1e-12);
        // 3x - 2y = 2 and x + y = 10 in hundredths
        assert_relative_eq!(solution.return_value, 0.144, epsilon = 1e-9);
    }

    #[test]
    fn test_interrupted_before_start() {
        let params = ProblemParameters::new(
            array![[0.01], [0.03]],
            array![0.5],
            array![2.0],
            -1.0,
            0.0,
            1.0,
        )
        .unwrap();
        let control = SolveControl::new();
        control.interrupt();
        let solution = RelaxationSolver::new(params, SolverSettings::default())
            .solve(&control)
            .unwrap();
        assert_eq!(solution.status, SolutionStatus::Interrupted);
        assert_eq!(control.current(), solution);
    }
}
