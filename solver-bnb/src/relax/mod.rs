//! Abstract continuous-relaxation backend.
//!
//! The engine never touches a subsolver directly; everything flows
//! through the [`SubWorkspace`] trait. One workspace is built per worker
//! at startup and exclusively owned by that worker for the whole run.

mod qp;

use std::time::Duration;

pub use qp::QpRelaxation;
use solver_qp::QpSettings;

use crate::error::EngineResult;
use crate::model::{ConstraintSet, Problem};
use crate::settings::SubSolverKind;

/// Outcome classification of a relaxation solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaxStatus {
    /// Solved to optimality.
    Optimal,

    /// Certified primal infeasible.
    Infeasible,

    /// Certified unbounded below.
    Unbounded,

    /// Stopped at the iteration limit.
    IterationLimit,

    /// Stopped at the time limit.
    TimeLimit,

    /// The backend failed in an unexpected way.
    Error,
}

/// Result of one relaxation solve.
#[derive(Debug, Clone)]
pub struct RelaxSolution {
    /// Outcome classification.
    pub status: RelaxStatus,
    /// Objective value (`+inf` when infeasible, `-inf` when unusable).
    pub objective: f64,
    /// Primal assignment.
    pub primal: Vec<f64>,
    /// Duals of the constraint rows.
    pub dual: Vec<f64>,
    /// The backend certifies dual feasibility of the result.
    pub dual_feasible: bool,
}

impl RelaxSolution {
    /// Whether `objective` is a certified lower bound on the relaxation
    /// optimum: the solve ended regularly and the dual side is feasible.
    pub fn certified_bound(&self) -> bool {
        self.dual_feasible
            && matches!(
                self.status,
                RelaxStatus::Optimal | RelaxStatus::IterationLimit
            )
    }

    /// A result for a relaxation proven infeasible.
    pub fn infeasible() -> Self {
        Self {
            status: RelaxStatus::Infeasible,
            objective: f64::INFINITY,
            primal: Vec::new(),
            dual: Vec::new(),
            dual_feasible: true,
        }
    }

    /// A placeholder result after a backend failure.
    pub fn failed() -> Self {
        Self {
            status: RelaxStatus::Error,
            objective: f64::NEG_INFINITY,
            primal: Vec::new(),
            dual: Vec::new(),
            dual_feasible: false,
        }
    }
}

/// One worker's handle on a continuous relaxation solver.
///
/// Mutating operations keep whatever warm-start state the backend has;
/// the contract only requires that a `solve` after `update_bounds`
/// reflects the new bounds.
pub trait SubWorkspace: Send {
    /// Solve the current relaxation to `primal_tol`, optionally bounded
    /// in wall-clock time.
    fn solve(&mut self, primal_tol: f64, time_limit: Option<Duration>) -> RelaxSolution;

    /// Overwrite the variable bounds.
    fn update_bounds(&mut self, var_lo: &[f64], var_up: &[f64]) -> EngineResult<()>;

    /// Overwrite the constraint row bounds.
    fn update_constraint_bounds(&mut self, lo: &[f64], up: &[f64]) -> EngineResult<()>;

    /// Replace the backend settings.
    fn update_settings(&mut self, settings: &QpSettings);

    /// Current backend settings.
    fn settings(&self) -> QpSettings;

    /// Insert constraint rows before position `at`.
    fn insert_constraints(&mut self, at: usize, rows: &ConstraintSet) -> EngineResult<()>;

    /// Remove constraint rows by index.
    fn remove_constraints(&mut self, indices: &[usize]) -> EngineResult<()>;

    /// Reorder constraint rows so that new row `i` is old row `perm[i]`.
    fn permute_constraints(&mut self, perm: &[usize]) -> EngineResult<()>;

    /// Extend the workspace with an independent subproblem.
    ///
    /// Returns `false` iff the extension invalidates lower bounds
    /// computed before it, detected by re-solving the appended slice and
    /// finding an objective below `-tol`.
    fn append_problem(&mut self, sub: &Problem, tol: f64) -> EngineResult<bool>;

    /// Number of variables currently installed.
    fn num_vars(&self) -> usize;

    /// Number of constraint rows currently installed.
    fn num_constraints(&self) -> usize;
}

/// Build the backend selected by the settings.
pub fn build(
    kind: SubSolverKind,
    problem: &Problem,
    settings: &QpSettings,
) -> EngineResult<Box<dyn SubWorkspace>> {
    match kind {
        SubSolverKind::Admm => Ok(Box::new(QpRelaxation::setup(problem, settings.clone())?)),
    }
}
