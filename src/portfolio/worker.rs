use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::debug;

use crate::error::{Error, Result};
use crate::portfolio::{MadSolution, MadSolver, SolveControl};

/// A solve running on its own thread.
///
/// The supervisor may read progress snapshots and request an interrupt at
/// any time; the solver notices the request at its next iteration.
#[derive(Debug)]
pub struct SolveHandle {
    control: Arc<SolveControl>,
    thread: JoinHandle<Result<MadSolution>>,
}

/// Starts `solver` on a new thread.
pub fn spawn<S>(solver: S) -> SolveHandle
where
    S: MadSolver + Send + 'static,
{
    spawn_with_control(solver, Arc::new(SolveControl::new()))
}

/// Starts `solver` on a new thread that reports through `control`.
///
/// An interrupt already set on `control` is seen before the first branching.
pub fn spawn_with_control<S>(solver: S, control: Arc<SolveControl>) -> SolveHandle
where
    S: MadSolver + Send + 'static,
{
    let shared = Arc::clone(&control);
    let thread = thread::spawn(move || solver.solve(&shared));
    debug!("solver thread started");
    SolveHandle { control, thread }
}

impl SolveHandle {
    pub fn control(&self) -> &SolveControl {
        &self.control
    }

    /// Latest snapshot published by the solver.
    pub fn current(&self) -> MadSolution {
        self.control.current()
    }

    pub fn interrupt(&self) {
        self.control.interrupt();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the solver and returns its final solution.
    pub fn join(self) -> Result<MadSolution> {
        self.thread.join().map_err(|_| Error::WorkerPanicked)?
    }
}
