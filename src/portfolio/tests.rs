use super::*;
use approx::assert_relative_eq;
use ndarray::array;
use std::error::Error as StdError;
use std::sync::Arc;

use crate::portfolio::synthetic::SyntheticMarket;

// two identical lots of 0.4 each and a single period, so every
// portfolio has zero deviation and only the weight window matters
fn toy(numax: Array1<f64>) -> BranchAndBoundSolver {
    let params =
        ProblemParameters::new(array![[0.01, 0.02]], array![0.4, 0.4], numax, -1.0, 0.5, 1.0)
            .unwrap();
    BranchAndBoundSolver::new(params, SolverSettings::default(), SearchLimits::default())
}

fn lots_of(solution: &MadSolution) -> Array1<f64> {
    solution.lots.iter().map(|&l| l as f64).collect()
}

/// Best objective over every integer point of the box.
fn brute_force(params: &ProblemParameters) -> Option<(f64, Array1<f64>)> {
    let mut best: Option<(f64, Array1<f64>)> = None;
    let mut nu = Array1::zeros(params.assets);
    loop {
        if params.is_feasible(&nu, 1e-9) {
            let value = params.objective(&nu);
            if best.as_ref().map_or(true, |(b, _)| value < *b) {
                best = Some((value, nu.clone()));
            }
        }
        let mut i = 0;
        while i < params.assets && nu[i] >= params.numax[i] {
            nu[i] = 0.0;
            i += 1;
        }
        if i == params.assets {
            return best;
        }
        nu[i] += 1.0;
    }
}

#[test]
fn test_toy_weight_window() -> Result<()> {
    let solution = toy(array![2.0, 2.0]).solve(&SolveControl::new())?;
    assert_eq!(solution.status, SolutionStatus::OptimalFound);
    assert_eq!(solution.lots.iter().sum::<u32>(), 2);
    assert_relative_eq!(solution.objective_value, 0.0, epsilon = 1e-12);
    assert_relative_eq!(solution.weights.iter().sum::<f64>(), 0.8, epsilon = 1e-12);
    assert_relative_eq!(solution.total_cost, 0.8, epsilon = 1e-12);
    Ok(())
}

#[test]
fn test_toy_single_asset_takes_two_lots() -> Result<()> {
    let solution = toy(array![3.0, 0.0]).solve(&SolveControl::new())?;
    assert_eq!(solution.status, SolutionStatus::OptimalFound);
    assert_eq!(solution.lots, vec![2, 0]);
    assert_relative_eq!(solution.total_cost, 0.8, epsilon = 1e-12);
    Ok(())
}

#[test]
fn test_toy_wide_box_keeps_weight_window() -> Result<()> {
    let solution = toy(array![3.0, 3.0]).solve(&SolveControl::new())?;
    assert_eq!(solution.status, SolutionStatus::OptimalFound);
    assert_eq!(solution.lots.iter().sum::<u32>(), 2);
    assert_relative_eq!(solution.objective_value, 0.0, epsilon = 1e-12);
    Ok(())
}

#[test]
fn test_toy_without_room_is_incorrect() -> Result<()> {
    let solution = toy(array![1.0, 0.0]).solve(&SolveControl::new())?;
    assert_eq!(solution.status, SolutionStatus::IncorrectProblem);
    assert!(!solution.has_portfolio());
    assert_eq!(solution.objective_value, f64::INFINITY);
    Ok(())
}

#[test]
fn test_matches_enumeration() -> std::result::Result<(), Box<dyn StdError>> {
    let market = SyntheticMarket::new(4, 12);
    for seed in [3, 7, 19] {
        let statement = market.statement(seed)?;
        let solver = BranchAndBoundSolver::from_statement(&statement, SolverSettings::default())?;
        let solution = solver.solve(&SolveControl::new())?;
        match brute_force(solver.params()) {
            Some((best, _)) => {
                assert!(matches!(
                    solution.status,
                    SolutionStatus::OptimalFound | SolutionStatus::SuboptimalFound
                ));
                let gap = solver.settings().tolerances.relative_gap;
                assert!(solution.objective_value >= best - 1e-9);
                assert!(solution.objective_value <= best * (1.0 + gap) + 1e-9);
                assert!(solver.params().is_feasible(&lots_of(&solution), 1e-9));
            }
            None => assert_eq!(solution.status, SolutionStatus::IncorrectProblem),
        }
    }
    Ok(())
}

#[test]
fn test_exact_gap_finds_enumerated_optimum() -> std::result::Result<(), Box<dyn StdError>> {
    let statement = SyntheticMarket::new(5, 16).statement(42)?;
    let settings = SolverSettings::default().with_relative_gap(0.0);
    let solver = BranchAndBoundSolver::from_statement(&statement, settings)?;
    let solution = solver.solve(&SolveControl::new())?;
    if let Some((best, _)) = brute_force(solver.params()) {
        assert_eq!(solution.status, SolutionStatus::OptimalFound);
        assert_relative_eq!(solution.objective_value, best, epsilon = 1e-9);
        assert_relative_eq!(
            solution.risk_value,
            2.0 * best / solver.params().periods as f64,
            epsilon = 1e-9
        );
    }
    Ok(())
}

#[test]
fn test_return_floor_is_respected() -> std::result::Result<(), Box<dyn StdError>> {
    let market = SyntheticMarket {
        drift_mean: 0.01,
        ..SyntheticMarket::new(4, 12)
    };
    let statement = market.statement(5)?.with_min_return(0.004);
    let solver = BranchAndBoundSolver::from_statement(&statement, SolverSettings::default())?;
    let solution = solver.solve(&SolveControl::new())?;
    if solution.has_portfolio() {
        assert!(solution.return_value >= solver.params().mu0 - 1e-9);
        assert!(solver.params().is_feasible(&lots_of(&solution), 1e-9));
    } else {
        assert!(brute_force(solver.params()).is_none());
    }
    Ok(())
}

// seed 1 on eight assets takes 34 branchings to close at a zero gap and
// seed 4 takes 10, so every limit below is hit before the search ends
fn open_search(seed: u64) -> Result<MadStatement> {
    SyntheticMarket::new(8, 20).statement(seed)
}

fn exact_solver(statement: &MadStatement) -> Result<BranchAndBoundSolver> {
    let settings = SolverSettings::default().with_relative_gap(0.0);
    BranchAndBoundSolver::from_statement(statement, settings)
}

#[test]
fn test_iteration_limit() -> Result<()> {
    let statement = open_search(1)?.with_iteration_limit(2);
    let solution = exact_solver(&statement)?.solve(&SolveControl::new())?;
    assert_eq!(solution.status, SolutionStatus::IterationLimitReached);
    assert_eq!(solution.iterations, 2);
    Ok(())
}

#[test]
fn test_node_limit_counts_the_root() -> Result<()> {
    let statement = open_search(1)?.with_node_limit(1);
    let solution = exact_solver(&statement)?.solve(&SolveControl::new())?;
    assert_eq!(solution.status, SolutionStatus::NodeLimitReached);
    assert_eq!(solution.iterations, 0);
    assert_eq!(solution.nodes, 1);
    Ok(())
}

#[test]
fn test_objective_limit_stops_on_first_incumbent() -> Result<()> {
    let statement = open_search(1)?.with_objective_limit(f64::MAX);
    let solution = exact_solver(&statement)?.solve(&SolveControl::new())?;
    assert_eq!(solution.status, SolutionStatus::UserObjLimitReached);
    assert!(solution.has_portfolio());
    assert!(solution.accuracy > 0.0);
    Ok(())
}

#[test]
fn test_interrupt_before_search() -> Result<()> {
    let control = SolveControl::new();
    control.interrupt();
    let solution = exact_solver(&open_search(4)?)?.solve(&control)?;
    assert_eq!(solution.status, SolutionStatus::Interrupted);
    assert_eq!(solution.iterations, 0);
    assert_eq!(control.current(), solution);
    Ok(())
}

#[test]
fn test_relaxation_bounds_integer_solution() -> Result<()> {
    let statement = SyntheticMarket::new(5, 16).statement(8)?;
    let settings = SolverSettings::default();
    let integer = Strategy::for_kind(ProblemKind::MadMin, &statement, settings.clone())?
        .solve(&SolveControl::new())?;
    let relaxed = Strategy::for_kind(ProblemKind::MadMinLp, &statement, settings)?
        .solve(&SolveControl::new())?;
    assert_eq!(relaxed.problem_kind, ProblemKind::MadMinLp);
    if integer.has_portfolio() {
        assert_eq!(relaxed.status, SolutionStatus::OptimalFound);
        assert!(relaxed.objective_value <= integer.objective_value + 1e-12);
    }
    Ok(())
}

/// Risk of the least risky integer point, if the box has one.
fn least_risk(statement: &MadStatement) -> Result<Option<f64>> {
    let params = ProblemParameters::from_statement(statement)?;
    Ok(brute_force(&params).map(|(_, nu)| params.risk(&nu)))
}

#[test]
fn test_max_return_matches_enumeration() -> std::result::Result<(), Box<dyn StdError>> {
    let market = SyntheticMarket::new(4, 12);
    let settings = SolverSettings::default().with_relative_gap(0.0);
    for seed in [3, 7, 19] {
        let floor = match least_risk(&market.statement(seed)?)? {
            Some(risk) => risk,
            None => continue,
        };
        let gamma = 2.0 * floor;
        let statement = market.statement(seed)?.with_max_risk(gamma);
        let strategy = Strategy::for_kind(ProblemKind::MadMax, &statement, settings.clone())?;
        assert_eq!(strategy.kind(), ProblemKind::MadMax);
        let solution = strategy.solve(&SolveControl::new())?;
        let params = ProblemParameters::for_kind(&statement, ProblemKind::MadMax)?;
        let (best, _) = brute_force(&params).ok_or("least risky point is under the cap")?;

        assert_eq!(solution.status, SolutionStatus::OptimalFound);
        assert_eq!(solution.problem_kind, ProblemKind::MadMax);
        assert_relative_eq!(solution.objective_value, -best, epsilon = 1e-9);
        assert_relative_eq!(solution.objective_value, solution.return_value, epsilon = 1e-12);
        assert!(solution.risk_value <= gamma + 1e-6);
        let nu = lots_of(&solution);
        assert!(params.risk(&nu) <= gamma + 1e-6);
        let weight = params.weight(&nu);
        assert!(weight >= params.wmin - 1e-6 && weight <= 1.0 + 1e-6);
    }
    Ok(())
}

#[test]
fn test_unreachable_risk_cap_is_incorrect() -> std::result::Result<(), Box<dyn StdError>> {
    let statement = SyntheticMarket::new(4, 12).statement(8)?.with_max_risk(1e-9);
    let solution = Strategy::for_kind(ProblemKind::MadMax, &statement, SolverSettings::default())?
        .solve(&SolveControl::new())?;
    let params = ProblemParameters::for_kind(&statement, ProblemKind::MadMax)?;
    match brute_force(&params) {
        Some((best, _)) => {
            assert_eq!(solution.status, SolutionStatus::OptimalFound);
            assert_relative_eq!(solution.objective_value, -best, epsilon = 1e-9);
        }
        None => {
            assert_eq!(solution.status, SolutionStatus::IncorrectProblem);
            assert!(!solution.has_portfolio());
            assert_eq!(solution.objective_value, f64::NEG_INFINITY);
        }
    }
    Ok(())
}

#[test]
fn test_max_return_relaxation_bounds_integer_solution() -> Result<()> {
    let market = SyntheticMarket::new(5, 16);
    let gamma = match least_risk(&market.statement(8)?)? {
        Some(risk) => 1.5 * risk,
        None => return Ok(()),
    };
    let statement = market.statement(8)?.with_max_risk(gamma);
    let settings = SolverSettings::default();
    let integer = Strategy::for_kind(ProblemKind::MadMax, &statement, settings.clone())?
        .solve(&SolveControl::new())?;
    let relaxed = Strategy::for_kind(ProblemKind::MadMaxLp, &statement, settings)?
        .solve(&SolveControl::new())?;
    assert_eq!(relaxed.problem_kind, ProblemKind::MadMaxLp);
    assert_eq!(relaxed.status, SolutionStatus::OptimalFound);
    assert!(relaxed.risk_value <= gamma + 1e-9);
    assert!(integer.has_portfolio());
    assert!(relaxed.objective_value >= integer.objective_value - 1e-12);
    Ok(())
}

#[test]
fn test_max_return_objective_limit() -> std::result::Result<(), Box<dyn StdError>> {
    let market = SyntheticMarket::new(4, 12);
    let gamma = 2.0 * least_risk(&market.statement(3)?)?.ok_or("box has a portfolio")?;
    let settings = SolverSettings::default().with_relative_gap(0.0);

    // no portfolio returns that much, so the search runs to the end
    let statement = market.statement(3)?.with_max_risk(gamma).with_objective_limit(f64::MAX);
    let exact = Strategy::for_kind(ProblemKind::MadMax, &statement, settings.clone())?
        .solve(&SolveControl::new())?;
    assert_eq!(exact.status, SolutionStatus::OptimalFound);

    let statement = market.statement(3)?.with_max_risk(gamma).with_objective_limit(f64::MIN);
    let early = Strategy::for_kind(ProblemKind::MadMax, &statement, settings)?
        .solve(&SolveControl::new())?;
    assert!(matches!(
        early.status,
        SolutionStatus::UserObjLimitReached | SolutionStatus::OptimalFound
    ));
    assert!(early.has_portfolio());
    assert!(early.objective_value <= exact.objective_value + 1e-12);
    Ok(())
}

#[test]
fn test_max_kinds_need_a_risk_cap() -> Result<()> {
    let statement = SyntheticMarket::new(3, 8).statement(0)?;
    for kind in [ProblemKind::MadMax, ProblemKind::MadMaxLp] {
        assert!(matches!(
            Strategy::for_kind(kind, &statement, SolverSettings::default()),
            Err(crate::error::Error::InvalidInput(_))
        ));
        let negative = statement.clone().with_max_risk(-0.1);
        assert!(Strategy::for_kind(kind, &negative, SolverSettings::default()).is_err());
    }
    Ok(())
}

#[test]
fn test_invalid_statement_is_an_error() {
    let statement = MadStatement::new(array![[0.01, 0.02]], vec![10.0], vec![1.0], 0.0);
    assert!(matches!(
        Strategy::for_kind(ProblemKind::MadMin, &statement, SolverSettings::default()),
        Err(crate::error::Error::InvalidInput(_))
    ));
}

#[test]
fn test_worker_reports_final_snapshot() -> Result<()> {
    let handle = spawn(toy(array![2.0, 2.0]));
    while !handle.is_finished() {
        std::thread::yield_now();
    }
    let published = handle.current();
    let solution = handle.join()?;
    assert_eq!(solution.status, SolutionStatus::OptimalFound);
    assert_eq!(published, solution);
    Ok(())
}

#[test]
fn test_worker_interrupt() -> Result<()> {
    let control = Arc::new(SolveControl::new());
    control.interrupt();
    let handle = spawn_with_control(exact_solver(&open_search(4)?)?, Arc::clone(&control));
    let solution = handle.join()?;
    assert_eq!(solution.status, SolutionStatus::Interrupted);
    assert_eq!(solution.iterations, 0);
    assert_eq!(control.current(), solution);
    Ok(())
}

#[test]
fn test_status_display_and_finality() {
    assert_eq!(SolutionStatus::OptimalFound.to_string(), "optimal found");
    assert!(!SolutionStatus::Started.is_final());
    assert!(SolutionStatus::NumericalError.is_final());
}
