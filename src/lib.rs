pub mod error;
pub mod optimization;
pub mod portfolio;

pub use error::{Error, Result};
pub use optimization::{SolverSettings, Tolerances};
pub use portfolio::{
    spawn, spawn_with_control, BranchAndBoundSolver, Goal, MadSolution, MadSolver, MadStatement,
    ProblemKind, RelaxationSolver, SolutionStatus, SolveControl, SolveHandle, Strategy,
};
