//! Dense operator-splitting (ADMM) solver for convex quadratic programs.
//!
//! Solves problems of the form
//!
//! ```text
//! minimize    0.5 x' P x + q' x
//! subject to  row_lo <= A x <= row_up
//!             var_lo <=   x <= var_up
//! ```
//!
//! with `P` symmetric positive semidefinite. The solver stacks the
//! constraint rows and an implicit identity block for the variable box,
//! then alternates a regularized equality-constrained QP step (Cholesky),
//! a box projection, and a dual ascent step. Primal and dual
//! infeasibility are certified from the accumulated iterate deltas.
//!
//! The workspace persists its iterates between solves, so a bound update
//! followed by a re-solve warm-starts from the previous optimum. This is
//! what makes the solver usable as the relaxation backend of a
//! branch-and-bound search, where consecutive solves differ only in a
//! handful of variable bounds.

#![warn(missing_docs)]

pub mod admm;
pub mod problem;

pub use admm::QpWorkspace;
pub use problem::{
    check_psd, QpError, QpProblem, QpResult, QpSettings, QpSolution, QpStatus,
};
