//! Relaxation backend over the bundled ADMM QP solver.

use std::time::Duration;

use solver_qp::{QpProblem, QpSettings, QpStatus, QpWorkspace};

use crate::error::{EngineError, EngineResult};
use crate::model::{csmat_to_dense, ConstraintSet, Objective, Problem};
use crate::relax::{RelaxSolution, RelaxStatus, SubWorkspace};

/// `SubWorkspace` implementation backed by `solver_qp::QpWorkspace`.
pub struct QpRelaxation {
    ws: QpWorkspace,
}

impl QpRelaxation {
    /// Install a problem's continuous relaxation into a fresh workspace.
    pub fn setup(problem: &Problem, settings: QpSettings) -> EngineResult<Self> {
        let qp = lower_problem(problem)?;
        let ws = QpWorkspace::new(qp, settings)?;
        Ok(Self { ws })
    }
}

/// Translate the engine-level problem into the backend's dense form,
/// dropping integrality and SOS1 (that is the relaxation).
fn lower_problem(problem: &Problem) -> EngineResult<QpProblem> {
    let n = problem.num_vars();
    let (p, q) = match &problem.objective {
        Objective::Null => (vec![0.0; n * n], vec![0.0; n]),
        Objective::Linear { l } => (vec![0.0; n * n], l.clone()),
        Objective::Quadratic { q, l } => (csmat_to_dense(q), l.clone()),
    };
    let (a, row_lo, row_up) = match &problem.constraints {
        ConstraintSet::Null => (Vec::new(), Vec::new(), Vec::new()),
        ConstraintSet::Linear { a, lo, up } => (csmat_to_dense(a), lo.clone(), up.clone()),
    };
    let (var_lo, var_up) = problem.variables.bounds();
    Ok(QpProblem {
        n,
        m: row_lo.len(),
        p,
        q,
        a,
        row_lo,
        row_up,
        var_lo: var_lo.to_vec(),
        var_up: var_up.to_vec(),
    })
}

impl SubWorkspace for QpRelaxation {
    fn solve(&mut self, primal_tol: f64, time_limit: Option<Duration>) -> RelaxSolution {
        let mut settings = self.ws.settings().clone();
        settings.eps_abs = settings.eps_abs.min(primal_tol);
        settings.time_limit_ms = time_limit.map(|d| (d.as_millis() as u64).max(1));
        self.ws.update_settings(settings);

        let sol = match self.ws.solve() {
            Ok(sol) => sol,
            Err(err) => {
                log::warn!("relaxation backend failed: {}", err);
                return RelaxSolution::failed();
            }
        };
        match sol.status {
            QpStatus::Optimal => RelaxSolution {
                status: RelaxStatus::Optimal,
                objective: sol.objective,
                primal: sol.x,
                dual: sol.row_duals,
                dual_feasible: true,
            },
            QpStatus::PrimalInfeasible => RelaxSolution::infeasible(),
            QpStatus::DualInfeasible => RelaxSolution {
                status: RelaxStatus::Unbounded,
                objective: f64::NEG_INFINITY,
                primal: sol.x,
                dual: sol.row_duals,
                dual_feasible: false,
            },
            QpStatus::MaxIterations => RelaxSolution {
                status: RelaxStatus::IterationLimit,
                objective: sol.objective,
                primal: sol.x,
                dual: sol.row_duals,
                dual_feasible: false,
            },
            QpStatus::TimeLimit => RelaxSolution {
                status: RelaxStatus::TimeLimit,
                objective: sol.objective,
                primal: sol.x,
                dual: sol.row_duals,
                dual_feasible: false,
            },
        }
    }

    fn update_bounds(&mut self, var_lo: &[f64], var_up: &[f64]) -> EngineResult<()> {
        self.ws.update_var_bounds(var_lo, var_up)?;
        Ok(())
    }

    fn update_constraint_bounds(&mut self, lo: &[f64], up: &[f64]) -> EngineResult<()> {
        self.ws.update_row_bounds(lo, up)?;
        Ok(())
    }

    fn update_settings(&mut self, settings: &QpSettings) {
        self.ws.update_settings(settings.clone());
    }

    fn settings(&self) -> QpSettings {
        self.ws.settings().clone()
    }

    fn insert_constraints(&mut self, at: usize, rows: &ConstraintSet) -> EngineResult<()> {
        match rows {
            ConstraintSet::Null => Ok(()),
            ConstraintSet::Linear { a, lo, up } => {
                if a.cols() != self.ws.num_vars() {
                    return Err(EngineError::Setup(
                        "inserted rows have the wrong width".into(),
                    ));
                }
                let dense = csmat_to_dense(a);
                self.ws.insert_rows(at, &dense, lo, up)?;
                Ok(())
            }
        }
    }

    fn remove_constraints(&mut self, indices: &[usize]) -> EngineResult<()> {
        self.ws.remove_rows(indices)?;
        Ok(())
    }

    fn permute_constraints(&mut self, perm: &[usize]) -> EngineResult<()> {
        self.ws.permute_rows(perm)?;
        Ok(())
    }

    fn append_problem(&mut self, sub: &Problem, tol: f64) -> EngineResult<bool> {
        let qp = lower_problem(sub)?;
        let reliable = self.ws.append(&qp, tol)?;
        Ok(reliable)
    }

    fn num_vars(&self) -> usize {
        self.ws.num_vars()
    }

    fn num_constraints(&self) -> usize {
        self.ws.num_rows()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VariableSet;
    use sprs::CsMat;

    fn knapsack_relaxation() -> QpRelaxation {
        // min -x0 - x1 s.t. x0 + x1 <= 1.5, x in [0,1]^2
        let a = CsMat::new_csc((1, 2), vec![0, 1, 2], vec![0, 0], vec![1.0, 1.0]);
        let problem = Problem::new(
            Objective::Linear {
                l: vec![-1.0, -1.0],
            },
            ConstraintSet::Linear {
                a,
                lo: vec![f64::NEG_INFINITY],
                up: vec![1.5],
            },
            VariableSet::new(vec![0.0, 0.0], vec![1.0, 1.0])
                .unwrap()
                .with_discrete(vec![0, 1])
                .unwrap(),
        )
        .unwrap();
        QpRelaxation::setup(&problem, QpSettings::default()).unwrap()
    }

    #[test]
    fn test_relaxation_solve() {
        let mut relax = knapsack_relaxation();
        let sol = relax.solve(1e-7, None);
        assert_eq!(sol.status, RelaxStatus::Optimal);
        assert!(sol.certified_bound());
        assert!((sol.objective + 1.5).abs() < 1e-4, "obj = {}", sol.objective);
    }

    #[test]
    fn test_bound_update_changes_optimum() {
        let mut relax = knapsack_relaxation();
        let _ = relax.solve(1e-7, None);

        // Branch x0 up to 1: optimum becomes (1, 0.5), objective -1.5;
        // then cap x1 at 0: objective -1.
        relax.update_bounds(&[1.0, 0.0], &[1.0, 0.0]).unwrap();
        let sol = relax.solve(1e-7, None);
        assert_eq!(sol.status, RelaxStatus::Optimal);
        assert!((sol.objective + 1.0).abs() < 1e-4, "obj = {}", sol.objective);
    }

    #[test]
    fn test_row_surgery_via_trait() {
        let mut relax = knapsack_relaxation();
        let extra = CsMat::new_csc((1, 2), vec![0, 1, 1], vec![0], vec![1.0]);
        relax
            .insert_constraints(
                1,
                &ConstraintSet::Linear {
                    a: extra,
                    lo: vec![f64::NEG_INFINITY],
                    up: vec![0.25],
                },
            )
            .unwrap();
        assert_eq!(relax.num_constraints(), 2);

        let sol = relax.solve(1e-7, None);
        assert_eq!(sol.status, RelaxStatus::Optimal);
        // x0 <= 0.25 now binds: optimum -(0.25 + 1) = -1.25.
        assert!((sol.objective + 1.25).abs() < 1e-3, "obj = {}", sol.objective);

        relax.permute_constraints(&[1, 0]).unwrap();
        relax.remove_constraints(&[0]).unwrap();
        assert_eq!(relax.num_constraints(), 1);
        let sol = relax.solve(1e-7, None);
        assert!((sol.objective + 1.5).abs() < 1e-3, "obj = {}", sol.objective);
    }

    #[test]
    fn test_append_problem_reliability() {
        let mut relax = knapsack_relaxation();
        let _ = relax.solve(1e-7, None);

        // An appended slice whose optimum is negative invalidates bounds.
        let sub = Problem::new(
            Objective::Linear { l: vec![-1.0] },
            ConstraintSet::Null,
            VariableSet::new(vec![0.0], vec![1.0]).unwrap(),
        )
        .unwrap();
        let reliable = relax.append_problem(&sub, 1e-6).unwrap();
        assert!(!reliable);
        assert_eq!(relax.num_vars(), 3);

        // A neutral slice keeps them valid.
        let mut relax = knapsack_relaxation();
        let sub = Problem::new(
            Objective::Null,
            ConstraintSet::Null,
            VariableSet::new(vec![0.0], vec![1.0]).unwrap(),
        )
        .unwrap();
        let reliable = relax.append_problem(&sub, 1e-6).unwrap();
        assert!(reliable);
    }
}
