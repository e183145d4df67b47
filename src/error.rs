//! Module containing the universal error type
use thiserror::Error;

/// Universal error type for this crate
#[derive(Error, Debug)]
pub enum Error {
    /// The Jacobi eigen-decomposition produced non-finite values
    #[error("eigen-decomposition diverged after {0} sweeps")]
    EigenSolverDiverged(u8),

    /// A `Settings` field is outside its legal range
    #[error("invalid settings: {0}")]
    InvalidSettings(&'static str),

    /// IO error; see inner code for details
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}
