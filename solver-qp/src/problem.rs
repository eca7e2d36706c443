//! Problem data, settings and result types for the QP solver.

use nalgebra::DMatrix;
use thiserror::Error;

/// Errors produced while building or solving a QP.
#[derive(Error, Debug)]
pub enum QpError {
    /// Problem data rejected during validation.
    #[error("invalid problem: {0}")]
    Invalid(String),

    /// The regularized KKT matrix could not be factorized.
    #[error("factorization failed: {0}")]
    Factorization(String),
}

/// Result type for QP operations.
pub type QpResult<T> = Result<T, QpError>;

/// A dense convex QP with row and variable box constraints.
///
/// `p` and `a` are row-major dense matrices of dimension `n x n` and
/// `m x n`. `p` must be symmetric positive semidefinite; only its values
/// as stored are used (no symmetrization is applied).
#[derive(Debug, Clone, PartialEq)]
pub struct QpProblem {
    /// Number of variables.
    pub n: usize,
    /// Number of constraint rows (excluding the variable box).
    pub m: usize,
    /// Quadratic term, row-major `n x n`. All zeros for an LP.
    pub p: Vec<f64>,
    /// Linear term, length `n`.
    pub q: Vec<f64>,
    /// Constraint matrix, row-major `m x n`.
    pub a: Vec<f64>,
    /// Row lower bounds, length `m`.
    pub row_lo: Vec<f64>,
    /// Row upper bounds, length `m`.
    pub row_up: Vec<f64>,
    /// Variable lower bounds, length `n`.
    pub var_lo: Vec<f64>,
    /// Variable upper bounds, length `n`.
    pub var_up: Vec<f64>,
}

impl QpProblem {
    /// Create a problem with no constraint rows and a free box.
    pub fn unconstrained(p: Vec<f64>, q: Vec<f64>) -> Self {
        let n = q.len();
        Self {
            n,
            m: 0,
            p,
            q,
            a: Vec::new(),
            row_lo: Vec::new(),
            row_up: Vec::new(),
            var_lo: vec![f64::NEG_INFINITY; n],
            var_up: vec![f64::INFINITY; n],
        }
    }

    /// Check dimensions and finiteness of the data.
    ///
    /// Bounds may be infinite; everything else must be finite, and every
    /// lower bound must not exceed its upper bound.
    pub fn validate(&self) -> QpResult<()> {
        if self.n == 0 {
            return Err(QpError::Invalid("problem has no variables".into()));
        }
        if self.p.len() != self.n * self.n {
            return Err(QpError::Invalid(format!(
                "P has {} entries, expected {}",
                self.p.len(),
                self.n * self.n
            )));
        }
        if self.q.len() != self.n {
            return Err(QpError::Invalid(format!(
                "q has length {}, expected {}",
                self.q.len(),
                self.n
            )));
        }
        if self.a.len() != self.m * self.n {
            return Err(QpError::Invalid(format!(
                "A has {} entries, expected {}",
                self.a.len(),
                self.m * self.n
            )));
        }
        if self.row_lo.len() != self.m || self.row_up.len() != self.m {
            return Err(QpError::Invalid("row bound length mismatch".into()));
        }
        if self.var_lo.len() != self.n || self.var_up.len() != self.n {
            return Err(QpError::Invalid("variable bound length mismatch".into()));
        }
        let finite = self
            .p
            .iter()
            .chain(self.q.iter())
            .chain(self.a.iter())
            .all(|v| v.is_finite());
        if !finite {
            return Err(QpError::Invalid("non-finite coefficient".into()));
        }
        let bounds_ok = self
            .row_lo
            .iter()
            .zip(&self.row_up)
            .chain(self.var_lo.iter().zip(&self.var_up))
            .all(|(lo, up)| !lo.is_nan() && !up.is_nan() && lo <= up);
        if !bounds_ok {
            return Err(QpError::Invalid("inconsistent or NaN bounds".into()));
        }
        Ok(())
    }

    /// Objective value `0.5 x' P x + q' x` at a point.
    pub fn objective(&self, x: &[f64]) -> f64 {
        let mut obj = 0.0;
        for (qi, xi) in self.q.iter().zip(x) {
            obj += qi * xi;
        }
        let mut quad = 0.0;
        for i in 0..self.n {
            let row = &self.p[i * self.n..(i + 1) * self.n];
            let mut acc = 0.0;
            for (pij, xj) in row.iter().zip(x) {
                acc += pij * xj;
            }
            quad += x[i] * acc;
        }
        obj + 0.5 * quad
    }
}

/// Check that a dense symmetric matrix is positive semidefinite.
///
/// Attempts a Cholesky factorization after a small diagonal shift scaled
/// to the matrix magnitude, which tolerates rank-deficient PSD matrices.
pub fn check_psd(p: &[f64], n: usize) -> bool {
    if p.len() != n * n {
        return false;
    }
    if n == 0 {
        return true;
    }
    let max_diag = (0..n).map(|i| p[i * n + i].abs()).fold(0.0_f64, f64::max);
    let shift = 1e-9 * (1.0 + max_diag);
    let mut shifted = DMatrix::from_row_slice(n, n, p);
    for i in 0..n {
        shifted[(i, i)] += shift;
    }
    shifted.cholesky().is_some()
}

/// Solver settings.
#[derive(Debug, Clone)]
pub struct QpSettings {
    /// Absolute residual tolerance.
    pub eps_abs: f64,
    /// Relative residual tolerance.
    pub eps_rel: f64,
    /// Infeasibility certificate tolerance.
    pub eps_infeas: f64,
    /// Maximum ADMM iterations per solve.
    pub max_iter: usize,
    /// Initial penalty parameter.
    pub rho: f64,
    /// Adapt `rho` from the residual ratio.
    pub adaptive_rho: bool,
    /// Residual / certificate check interval, in iterations.
    pub check_every: usize,
    /// Wall-clock limit per solve, in milliseconds.
    pub time_limit_ms: Option<u64>,
}

impl Default for QpSettings {
    fn default() -> Self {
        Self {
            eps_abs: 1e-7,
            eps_rel: 1e-7,
            eps_infeas: 1e-5,
            max_iter: 20_000,
            rho: 0.1,
            adaptive_rho: true,
            check_every: 25,
            time_limit_ms: None,
        }
    }
}

/// Exit status of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QpStatus {
    /// Converged to the requested tolerance. The primal-dual gap is
    /// closed, so the objective is a certified optimum.
    Optimal,

    /// A primal infeasibility certificate was found.
    PrimalInfeasible,

    /// A dual infeasibility certificate was found (problem unbounded).
    DualInfeasible,

    /// Iteration limit reached before convergence.
    MaxIterations,

    /// Time limit reached before convergence.
    TimeLimit,
}

/// Result of a solve.
#[derive(Debug, Clone)]
pub struct QpSolution {
    /// Exit status.
    pub status: QpStatus,
    /// Primal iterate, length `n`.
    pub x: Vec<f64>,
    /// Duals for the constraint rows, length `m`.
    pub row_duals: Vec<f64>,
    /// Duals for the variable box, length `n`.
    pub bound_duals: Vec<f64>,
    /// Primal objective at `x`.
    pub objective: f64,
    /// Iterations taken.
    pub iterations: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_dimensions() {
        let mut prob = QpProblem::unconstrained(vec![1.0], vec![0.0]);
        assert!(prob.validate().is_ok());

        prob.q.push(1.0);
        assert!(prob.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_nan() {
        let mut prob = QpProblem::unconstrained(vec![1.0], vec![f64::NAN]);
        assert!(prob.validate().is_err());

        prob.q[0] = 0.0;
        prob.var_lo[0] = 2.0;
        prob.var_up[0] = 1.0;
        assert!(prob.validate().is_err());
    }

    #[test]
    fn test_objective_value() {
        // 0.5 * 2x^2 + 3x at x = 2 -> 4 + 6 = 10
        let prob = QpProblem::unconstrained(vec![2.0], vec![3.0]);
        assert!((prob.objective(&[2.0]) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_psd_check() {
        // Identity is PSD.
        assert!(check_psd(&[1.0, 0.0, 0.0, 1.0], 2));
        // Rank-one PSD matrix.
        assert!(check_psd(&[1.0, 1.0, 1.0, 1.0], 2));
        // Indefinite matrix.
        assert!(!check_psd(&[1.0, 0.0, 0.0, -1.0], 2));
    }
}
