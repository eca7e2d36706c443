//! Problem definition: objective, constraints, validation.

use sprs::CsMat;

use crate::error::{EngineError, EngineResult};
use crate::model::VariableSet;

/// Objective function variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Objective {
    /// Feasibility problem.
    Null,

    /// `l' x`
    Linear {
        /// Linear coefficients.
        l: Vec<f64>,
    },

    /// `0.5 x' Q x + l' x` with `Q` symmetric PSD.
    Quadratic {
        /// Quadratic term.
        q: CsMat<f64>,
        /// Linear term.
        l: Vec<f64>,
    },
}

impl Objective {
    /// Objective value at a point.
    pub fn value(&self, x: &[f64]) -> f64 {
        match self {
            Objective::Null => 0.0,
            Objective::Linear { l } => dot(l, x),
            Objective::Quadratic { q, l } => {
                let mut quad = 0.0;
                for (&v, (r, c)) in q.iter() {
                    quad += v * x[r] * x[c];
                }
                0.5 * quad + dot(l, x)
            }
        }
    }

    fn check_dims(&self, n: usize) -> EngineResult<()> {
        match self {
            Objective::Null => Ok(()),
            Objective::Linear { l } => {
                if l.len() != n {
                    return Err(EngineError::Setup(format!(
                        "objective has {} coefficients for {} variables",
                        l.len(),
                        n
                    )));
                }
                Ok(())
            }
            Objective::Quadratic { q, l } => {
                if l.len() != n || q.rows() != n || q.cols() != n {
                    return Err(EngineError::Setup(
                        "quadratic objective dimension mismatch".into(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Linear constraint set variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintSet {
    /// No row constraints.
    Null,

    /// `lo <= A x <= up`
    Linear {
        /// Row matrix.
        a: CsMat<f64>,
        /// Row lower bounds.
        lo: Vec<f64>,
        /// Row upper bounds.
        up: Vec<f64>,
    },
}

impl ConstraintSet {
    /// Number of constraint rows.
    pub fn num_rows(&self) -> usize {
        match self {
            ConstraintSet::Null => 0,
            ConstraintSet::Linear { lo, .. } => lo.len(),
        }
    }

    fn check_dims(&self, n: usize) -> EngineResult<()> {
        match self {
            ConstraintSet::Null => Ok(()),
            ConstraintSet::Linear { a, lo, up } => {
                if a.cols() != n {
                    return Err(EngineError::Setup(format!(
                        "constraint matrix has {} columns for {} variables",
                        a.cols(),
                        n
                    )));
                }
                if lo.len() != a.rows() || up.len() != a.rows() {
                    return Err(EngineError::Setup("row bound length mismatch".into()));
                }
                for (l, u) in lo.iter().zip(up) {
                    if l.is_nan() || u.is_nan() || l > u {
                        return Err(EngineError::Setup("inconsistent row bounds".into()));
                    }
                }
                Ok(())
            }
        }
    }

    /// Interval of attainable row activities over a variable box.
    ///
    /// Returns `(act_lo, act_up)` where row `i` of `A x` lies within
    /// `[act_lo[i], act_up[i]]` for every `x` in the box. Used to fathom
    /// nodes whose branch bounds already contradict a row.
    pub fn activity_bounds(&self, var_lo: &[f64], var_up: &[f64]) -> (Vec<f64>, Vec<f64>) {
        match self {
            ConstraintSet::Null => (Vec::new(), Vec::new()),
            ConstraintSet::Linear { a, lo, .. } => {
                let m = lo.len();
                let mut act_lo = vec![0.0; m];
                let mut act_up = vec![0.0; m];
                for (&v, (r, c)) in a.iter() {
                    if v == 0.0 {
                        continue;
                    }
                    let (t1, t2) = (v * var_lo[c], v * var_up[c]);
                    act_lo[r] += t1.min(t2);
                    act_up[r] += t1.max(t2);
                }
                (act_lo, act_up)
            }
        }
    }

    /// True when some row activity interval misses its bounds entirely.
    pub fn provably_infeasible(&self, var_lo: &[f64], var_up: &[f64], tol: f64) -> bool {
        match self {
            ConstraintSet::Null => false,
            ConstraintSet::Linear { lo, up, .. } => {
                let (act_lo, act_up) = self.activity_bounds(var_lo, var_up);
                act_lo
                    .iter()
                    .zip(&act_up)
                    .zip(lo.iter().zip(up))
                    .any(|((alo, aup), (rlo, rup))| *aup < rlo - tol || *alo > rup + tol)
            }
        }
    }

    /// True when `x` satisfies every row within `tol`.
    pub fn satisfied(&self, x: &[f64], tol: f64) -> bool {
        match self {
            ConstraintSet::Null => true,
            ConstraintSet::Linear { a, lo, up } => {
                let mut act = vec![0.0; lo.len()];
                for (&v, (r, c)) in a.iter() {
                    act[r] += v * x[c];
                }
                act.iter()
                    .zip(lo.iter().zip(up))
                    .all(|(ai, (l, u))| *ai >= l - tol && *ai <= u + tol)
            }
        }
    }
}

/// A mixed-integer problem: objective, constraints and variables.
///
/// The engine holds a read-only handle to the problem for the whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct Problem {
    /// Objective function.
    pub objective: Objective,
    /// Row constraints.
    pub constraints: ConstraintSet,
    /// Variables.
    pub variables: VariableSet,
}

impl Problem {
    /// Assemble a problem, checking dimensional consistency.
    pub fn new(
        objective: Objective,
        constraints: ConstraintSet,
        variables: VariableSet,
    ) -> EngineResult<Self> {
        let n = variables.len();
        if n == 0 {
            return Err(EngineError::Setup("problem has no variables".into()));
        }
        objective.check_dims(n)?;
        constraints.check_dims(n)?;
        Ok(Self {
            objective,
            constraints,
            variables,
        })
    }

    /// Number of variables.
    pub fn num_vars(&self) -> usize {
        self.variables.len()
    }

    /// Number of constraint rows.
    pub fn num_constraints(&self) -> usize {
        self.constraints.num_rows()
    }

    /// Objective value at a point.
    pub fn objective_value(&self, x: &[f64]) -> f64 {
        self.objective.value(x)
    }

    /// True when `x` satisfies rows and variable bounds within `tol`.
    pub fn feasible(&self, x: &[f64], tol: f64) -> bool {
        let (lo, up) = self.variables.bounds();
        let in_box = x
            .iter()
            .zip(lo.iter().zip(up))
            .all(|(xi, (l, u))| *xi >= l - tol && *xi <= u + tol);
        in_box && self.constraints.satisfied(x, tol)
    }

    /// Numerical validation: finite coefficients and a PSD quadratic term.
    ///
    /// Fatal on failure (`NumericalError` in the engine's taxonomy).
    pub fn validate_numerics(&self) -> EngineResult<()> {
        match &self.objective {
            Objective::Null => {}
            Objective::Linear { l } => check_finite(l)?,
            Objective::Quadratic { q, l } => {
                check_finite(l)?;
                let n = q.rows();
                let dense = csmat_to_dense(q);
                check_finite(&dense)?;
                for i in 0..n {
                    for j in (i + 1)..n {
                        if (dense[i * n + j] - dense[j * n + i]).abs()
                            > 1e-10 * (1.0 + dense[i * n + j].abs())
                        {
                            return Err(EngineError::Numerical(
                                "quadratic term is not symmetric".into(),
                            ));
                        }
                    }
                }
                if !solver_qp::check_psd(&dense, n) {
                    return Err(EngineError::Numerical(
                        "quadratic term is not positive semidefinite".into(),
                    ));
                }
            }
        }
        if let ConstraintSet::Linear { a, .. } = &self.constraints {
            for (&v, _) in a.iter() {
                if !v.is_finite() {
                    return Err(EngineError::Numerical(
                        "non-finite constraint coefficient".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Scatter a sparse matrix into a row-major dense buffer.
pub(crate) fn csmat_to_dense(mat: &CsMat<f64>) -> Vec<f64> {
    let (rows, cols) = (mat.rows(), mat.cols());
    let mut dense = vec![0.0; rows * cols];
    for (&v, (r, c)) in mat.iter() {
        dense[r * cols + c] = v;
    }
    dense
}

fn check_finite(v: &[f64]) -> EngineResult<()> {
    if v.iter().any(|x| !x.is_finite()) {
        return Err(EngineError::Numerical("non-finite coefficient".into()));
    }
    Ok(())
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_binaries() -> VariableSet {
        VariableSet::new(vec![0.0, 0.0], vec![1.0, 1.0])
            .unwrap()
            .with_discrete(vec![0, 1])
            .unwrap()
    }

    fn row_ge(coefs: Vec<f64>, rhs: f64) -> ConstraintSet {
        let n = coefs.len();
        let a = CsMat::new_csc(
            (1, n),
            (0..=n).collect(),
            vec![0; n],
            coefs,
        );
        ConstraintSet::Linear {
            a,
            lo: vec![rhs],
            up: vec![f64::INFINITY],
        }
    }

    #[test]
    fn test_problem_dimensions() {
        let prob = Problem::new(
            Objective::Linear { l: vec![1.0, 1.0] },
            row_ge(vec![1.0, 1.0], 1.5),
            two_binaries(),
        )
        .unwrap();
        assert_eq!(prob.num_vars(), 2);
        assert_eq!(prob.num_constraints(), 1);

        let bad = Problem::new(
            Objective::Linear { l: vec![1.0] },
            ConstraintSet::Null,
            two_binaries(),
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_objective_value() {
        let q = CsMat::new_csc((1, 1), vec![0, 1], vec![0], vec![2.0]);
        let obj = Objective::Quadratic {
            q,
            l: vec![1.0],
        };
        // 0.5 * 2 * 9 + 3 = 12
        assert!((obj.value(&[3.0]) - 12.0).abs() < 1e-12);
        assert_eq!(Objective::Null.value(&[3.0]), 0.0);
    }

    #[test]
    fn test_activity_infeasibility() {
        // x0 + x1 >= 3 with x in [0,1]^2 is hopeless.
        let cons = row_ge(vec![1.0, 1.0], 3.0);
        assert!(cons.provably_infeasible(&[0.0, 0.0], &[1.0, 1.0], 1e-9));
        // x0 + x1 >= 1.5 is fine.
        let cons = row_ge(vec![1.0, 1.0], 1.5);
        assert!(!cons.provably_infeasible(&[0.0, 0.0], &[1.0, 1.0], 1e-9));
    }

    #[test]
    fn test_feasibility_check() {
        let prob = Problem::new(
            Objective::Linear { l: vec![1.0, 1.0] },
            row_ge(vec![1.0, 1.0], 1.5),
            two_binaries(),
        )
        .unwrap();
        assert!(prob.feasible(&[1.0, 1.0], 1e-9));
        assert!(!prob.feasible(&[1.0, 0.0], 1e-9));
        assert!(!prob.feasible(&[2.0, 1.0], 1e-9));
    }

    #[test]
    fn test_validate_numerics() {
        let q_bad = CsMat::new_csc((1, 1), vec![0, 1], vec![0], vec![-1.0]);
        let prob = Problem::new(
            Objective::Quadratic {
                q: q_bad,
                l: vec![0.0],
            },
            ConstraintSet::Null,
            VariableSet::new(vec![0.0], vec![1.0]).unwrap(),
        )
        .unwrap();
        assert!(matches!(
            prob.validate_numerics(),
            Err(EngineError::Numerical(_))
        ));
    }
}
