//! Error types for the branch-and-bound engine.
//!
//! Only fatal conditions surface as errors. Recoverable events during the
//! search (an infeasible relaxation, an iteration or time limit on a
//! single relaxation, a stale warm start) are handled in place and never
//! reach the caller; the engine always returns a [`Status`] for them.
//!
//! [`Status`]: crate::model::Status

use thiserror::Error;

/// Fatal errors from the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Problem or settings rejected during setup.
    #[error("setup rejected: {0}")]
    Setup(String),

    /// Non-PSD quadratic term or non-finite coefficients.
    #[error("numerical error: {0}")]
    Numerical(String),

    /// Resource exhaustion (worker spawn, allocation).
    #[error("resource error: {0}")]
    Resource(String),

    /// Unexpected backend failure on an otherwise valid call.
    #[error("subsolver error: {0}")]
    Subsolver(String),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<solver_qp::QpError> for EngineError {
    fn from(err: solver_qp::QpError) -> Self {
        match err {
            solver_qp::QpError::Invalid(msg) => EngineError::Setup(msg),
            solver_qp::QpError::Factorization(msg) => EngineError::Numerical(msg),
        }
    }
}
