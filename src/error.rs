use thiserror::Error as ThisError;

/// Errors raised by the tableau engine and by statement validation.
///
/// Infeasibility is not an error: infeasible nodes are closed and an
/// infeasible problem is reported through the solution status.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("linear program is unbounded")]
    Unbounded,
    #[error("pivot limit of {0} reached")]
    PivotLimit(usize),
    #[error("basis is singular at position {0}")]
    SingularBasis(usize),
    #[error("matrix shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("solver thread panicked")]
    WorkerPanicked,
}

impl Error {
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// True for failures caused by floating point breakdown rather than by the
    /// problem itself.
    pub fn is_numerical(&self) -> bool {
        matches!(self, Error::PivotLimit(_) | Error::SingularBasis(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
