use std::path::PathBuf;

use thiserror::Error;

/// Errors that propagate to the caller of the backend.
///
/// Numerical failures of a power flow are not part of this type, see
/// [`ConvergenceFailure`].
#[derive(Debug, Error)]
pub enum BackendError {
    /// The grid file or folder does not exist.
    #[error("there is no powergrid at \"{0}\"")]
    GridNotFound(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    /// The tables were read but do not describe a usable grid.
    #[error("malformed grid: {0}")]
    MalformedGrid(String),
    /// No external grid row could be mapped back to a bus without generator.
    #[error("no reference bus candidate found for the slack generator")]
    NoReferenceBus,
    /// More than one external grid row could host the synthesized slack generator.
    #[error("impossible to recognize the powergrid: reference bus candidates {0:?}")]
    AmbiguousReferenceBus(Vec<usize>),
    /// The power flow run while loading the grid failed.
    #[error("initial power flow failed: {0}")]
    InitialPowerFlow(ConvergenceFailure),
    /// A bus selector outside of {-1, 1, 2}.
    #[error("bus selector must be -1, 1 or 2, got {0}")]
    InvalidBus(i32),
    /// The action does not match the dimensions of the loaded grid.
    #[error("invalid action: {0}")]
    InvalidAction(String),
    /// An element sits on a bus that belongs to neither physical bus of its substation.
    #[error("{element} is on bus {bus}, expected {original} or {split}")]
    InconsistentBus {
        element: String,
        bus: i64,
        original: i64,
        split: i64,
    },
}

/// Reasons for a power flow to be reported as non convergent.
///
/// These are absorbed by [`crate::backend::PandaPowerBackend::run_pf`] and
/// never reach the caller as an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvergenceFailure {
    #[error("power flow did not converge after {0} iterations")]
    Diverged(usize),
    #[error("singular jacobian: {0}")]
    Singular(&'static str),
    #[error("isolated load")]
    IsolatedLoad,
    #[error("isolated gen")]
    IsolatedGen,
    #[error("non finite result in {0}")]
    NonFiniteResult(&'static str),
    #[error("no in-service reference bus")]
    NoReferenceBus,
}

pub type Result<T> = std::result::Result<T, BackendError>;
