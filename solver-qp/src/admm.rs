//! ADMM iteration over the stacked constraint operator.

use std::time::{Duration, Instant};

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

use crate::problem::{QpError, QpProblem, QpResult, QpSettings, QpSolution, QpStatus};

/// Persistent solver state for one QP.
///
/// The workspace owns the problem data, the `A'A` product, the cached
/// Cholesky factor of `P + rho (A'A + I)` and the ADMM iterates. Bound
/// updates keep the iterates, so the following solve warm-starts;
/// structural edits (row insertion/removal, appends) reset them.
pub struct QpWorkspace {
    prob: QpProblem,
    settings: QpSettings,

    /// `A'A`, row-major `n x n`. Rebuilt on structural edits.
    ata: Vec<f64>,

    /// Cached factor of `P + rho (A'A + I)` with the `rho` it was built for.
    chol: Option<(f64, Cholesky<f64, Dyn>)>,

    /// Current penalty parameter. Persists across solves.
    rho: f64,

    // Iterates. `z` and `y` run over the stacked rows: constraint rows
    // first, then the variable box.
    x: Vec<f64>,
    z: Vec<f64>,
    y: Vec<f64>,
}

impl QpWorkspace {
    /// Build a workspace for a validated problem.
    pub fn new(prob: QpProblem, settings: QpSettings) -> QpResult<Self> {
        prob.validate()?;
        let n = prob.n;
        let mt = prob.m + n;
        let rho = settings.rho;
        let mut ws = Self {
            ata: compute_ata(&prob.a, prob.m, n),
            chol: None,
            rho,
            x: vec![0.0; n],
            z: vec![0.0; mt],
            y: vec![0.0; mt],
            prob,
            settings,
        };
        ws.reset_iterates();
        Ok(ws)
    }

    /// Number of variables.
    pub fn num_vars(&self) -> usize {
        self.prob.n
    }

    /// Number of constraint rows (excluding the variable box).
    pub fn num_rows(&self) -> usize {
        self.prob.m
    }

    /// The problem as currently installed.
    pub fn problem(&self) -> &QpProblem {
        &self.prob
    }

    /// Current settings.
    pub fn settings(&self) -> &QpSettings {
        &self.settings
    }

    /// Replace the settings. The factor survives unless `rho` changed.
    pub fn update_settings(&mut self, settings: QpSettings) {
        if (settings.rho - self.settings.rho).abs() > 0.0 && !settings.adaptive_rho {
            self.rho = settings.rho;
        }
        self.settings = settings;
    }

    /// Overwrite the variable box. Iterates are kept for warm starting.
    pub fn update_var_bounds(&mut self, lo: &[f64], up: &[f64]) -> QpResult<()> {
        if lo.len() != self.prob.n || up.len() != self.prob.n {
            return Err(QpError::Invalid("variable bound length mismatch".into()));
        }
        self.prob.var_lo.copy_from_slice(lo);
        self.prob.var_up.copy_from_slice(up);
        Ok(())
    }

    /// Overwrite the row bounds. Iterates are kept for warm starting.
    pub fn update_row_bounds(&mut self, lo: &[f64], up: &[f64]) -> QpResult<()> {
        if lo.len() != self.prob.m || up.len() != self.prob.m {
            return Err(QpError::Invalid("row bound length mismatch".into()));
        }
        self.prob.row_lo.copy_from_slice(lo);
        self.prob.row_up.copy_from_slice(up);
        Ok(())
    }

    /// Insert constraint rows before position `at`.
    ///
    /// `rows` is row-major `k x n`. Resets the iterates and the factor.
    pub fn insert_rows(
        &mut self,
        at: usize,
        rows: &[f64],
        lo: &[f64],
        up: &[f64],
    ) -> QpResult<()> {
        let n = self.prob.n;
        if rows.len() % n != 0 {
            return Err(QpError::Invalid("row data is not a multiple of n".into()));
        }
        let k = rows.len() / n;
        if lo.len() != k || up.len() != k || at > self.prob.m {
            return Err(QpError::Invalid("row insertion out of range".into()));
        }
        let split = at * n;
        self.prob.a.splice(split..split, rows.iter().copied());
        self.prob.row_lo.splice(at..at, lo.iter().copied());
        self.prob.row_up.splice(at..at, up.iter().copied());
        self.prob.m += k;
        self.structural_reset();
        Ok(())
    }

    /// Remove constraint rows by index.
    pub fn remove_rows(&mut self, indices: &[usize]) -> QpResult<()> {
        let n = self.prob.n;
        if indices.iter().any(|&i| i >= self.prob.m) {
            return Err(QpError::Invalid("row removal out of range".into()));
        }
        let mut sorted: Vec<usize> = indices.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        for &i in sorted.iter().rev() {
            self.prob.a.drain(i * n..(i + 1) * n);
            self.prob.row_lo.remove(i);
            self.prob.row_up.remove(i);
            self.prob.m -= 1;
        }
        self.structural_reset();
        Ok(())
    }

    /// Reorder the constraint rows so that new row `i` is old row `perm[i]`.
    pub fn permute_rows(&mut self, perm: &[usize]) -> QpResult<()> {
        let m = self.prob.m;
        let n = self.prob.n;
        if perm.len() != m {
            return Err(QpError::Invalid("permutation length mismatch".into()));
        }
        let mut seen = vec![false; m];
        for &p in perm {
            if p >= m || seen[p] {
                return Err(QpError::Invalid("not a permutation".into()));
            }
            seen[p] = true;
        }
        let old_a = self.prob.a.clone();
        let old_lo = self.prob.row_lo.clone();
        let old_up = self.prob.row_up.clone();
        let old_z: Vec<f64> = self.z[..m].to_vec();
        let old_y: Vec<f64> = self.y[..m].to_vec();
        for (i, &p) in perm.iter().enumerate() {
            self.prob.a[i * n..(i + 1) * n].copy_from_slice(&old_a[p * n..(p + 1) * n]);
            self.prob.row_lo[i] = old_lo[p];
            self.prob.row_up[i] = old_up[p];
            self.z[i] = old_z[p];
            self.y[i] = old_y[p];
        }
        // A'A is permutation invariant; the factor survives.
        Ok(())
    }

    /// Append an independent subproblem block-diagonally.
    ///
    /// The appended slice is first solved in isolation; the returned flag
    /// is `false` iff that solve certifies an optimum below `-tol` (or
    /// fails to certify one at all), meaning lower bounds computed from
    /// this workspace before the append are no longer valid.
    pub fn append(&mut self, sub: &QpProblem, tol: f64) -> QpResult<bool> {
        sub.validate()?;
        let mut probe = QpWorkspace::new(sub.clone(), self.settings.clone())?;
        let probe_sol = probe.solve()?;
        let reliable =
            probe_sol.status == QpStatus::Optimal && probe_sol.objective >= -tol;

        let n1 = self.prob.n;
        let n2 = sub.n;
        let n = n1 + n2;

        // Block-diagonal P.
        let mut p = vec![0.0; n * n];
        for i in 0..n1 {
            p[i * n..i * n + n1].copy_from_slice(&self.prob.p[i * n1..(i + 1) * n1]);
        }
        for i in 0..n2 {
            let dst = (n1 + i) * n + n1;
            p[dst..dst + n2].copy_from_slice(&sub.p[i * n2..(i + 1) * n2]);
        }

        // Block-diagonal A.
        let m1 = self.prob.m;
        let m2 = sub.m;
        let mut a = vec![0.0; (m1 + m2) * n];
        for i in 0..m1 {
            a[i * n..i * n + n1].copy_from_slice(&self.prob.a[i * n1..(i + 1) * n1]);
        }
        for i in 0..m2 {
            let dst = (m1 + i) * n + n1;
            a[dst..dst + n2].copy_from_slice(&sub.a[i * n2..(i + 1) * n2]);
        }

        self.prob.q.extend_from_slice(&sub.q);
        self.prob.row_lo.extend_from_slice(&sub.row_lo);
        self.prob.row_up.extend_from_slice(&sub.row_up);
        self.prob.var_lo.extend_from_slice(&sub.var_lo);
        self.prob.var_up.extend_from_slice(&sub.var_up);
        self.prob.p = p;
        self.prob.a = a;
        self.prob.n = n;
        self.prob.m = m1 + m2;
        self.structural_reset();
        Ok(reliable)
    }

    /// Run the ADMM iteration from the current iterates.
    pub fn solve(&mut self) -> QpResult<QpSolution> {
        let n = self.prob.n;
        let m = self.prob.m;
        let mt = m + n;
        let start = Instant::now();
        let deadline = self
            .settings
            .time_limit_ms
            .map(|ms| start + Duration::from_millis(ms));

        let mut rho = self.rho;
        let mut status = QpStatus::MaxIterations;
        let mut iterations = self.settings.max_iter;

        let mut mx = vec![0.0; mt];
        let mut rhs = vec![0.0; n];
        let mut z_old = vec![0.0; mt];
        let mut tmp_rows = vec![0.0; mt];
        let mut tmp_vars = vec![0.0; n];
        let mut x_ckpt = self.x.clone();
        let mut y_ckpt = self.y.clone();

        // The factor is moved out of `self` for the duration of the loop
        // so the iterate updates can borrow freely.
        let mut factor = self.chol.take();

        for iter in 0..self.settings.max_iter {
            let stale = factor
                .as_ref()
                .map_or(true, |(r, _)| (r - rho).abs() > 1e-12 * (1.0 + rho));
            if stale {
                factor = Some((rho, self.build_factor(rho)?));
            }
            let chol = match &factor {
                Some((_, c)) => c,
                None => {
                    return Err(QpError::Factorization("factor unavailable".into()));
                }
            };

            // x-step: (P + rho (A'A + I)) x = -q + M' (rho z - y)
            for i in 0..mt {
                tmp_rows[i] = rho * self.z[i] - self.y[i];
            }
            self.mul_mt(&tmp_rows, &mut rhs);
            for j in 0..n {
                rhs[j] -= self.prob.q[j];
            }
            let xv = chol.solve(&DVector::from_column_slice(&rhs));
            self.x.copy_from_slice(xv.as_slice());

            // z-step: project onto the stacked box.
            self.mul_m(&self.x, &mut mx);
            z_old.copy_from_slice(&self.z);
            for i in 0..mt {
                let lo = self.stacked_lo(i);
                let up = self.stacked_up(i);
                let v = mx[i] + self.y[i] / rho;
                self.z[i] = v.clamp(lo, up);
            }

            // Dual ascent.
            for i in 0..mt {
                self.y[i] += rho * (mx[i] - self.z[i]);
            }

            let last = iter + 1 == self.settings.max_iter;
            if (iter + 1) % self.settings.check_every != 0 && !last {
                continue;
            }

            // Residuals.
            let mut r_prim = 0.0_f64;
            for i in 0..mt {
                r_prim = r_prim.max((mx[i] - self.z[i]).abs());
            }
            for i in 0..mt {
                tmp_rows[i] = rho * (z_old[i] - self.z[i]);
            }
            self.mul_mt(&tmp_rows, &mut tmp_vars);
            let r_dual = inf_norm(&tmp_vars);

            let eps_prim = self.settings.eps_abs
                + self.settings.eps_rel * inf_norm(&mx).max(inf_norm(&self.z));
            self.mul_mt(&self.y, &mut tmp_vars);
            let eps_dual = self.settings.eps_abs
                + self.settings.eps_rel
                    * inf_norm(&tmp_vars).max(inf_norm(&self.prob.q));

            if r_prim <= eps_prim && r_dual <= eps_dual {
                status = QpStatus::Optimal;
                iterations = iter + 1;
                break;
            }

            // Infeasibility certificates from the deltas accumulated
            // since the previous check.
            for i in 0..mt {
                tmp_rows[i] = self.y[i] - y_ckpt[i];
            }
            if self.primal_certificate(&tmp_rows) {
                status = QpStatus::PrimalInfeasible;
                iterations = iter + 1;
                break;
            }
            for j in 0..n {
                tmp_vars[j] = self.x[j] - x_ckpt[j];
            }
            if self.dual_certificate(&tmp_vars) {
                status = QpStatus::DualInfeasible;
                iterations = iter + 1;
                break;
            }
            x_ckpt.copy_from_slice(&self.x);
            y_ckpt.copy_from_slice(&self.y);

            if let Some(d) = deadline {
                if Instant::now() >= d {
                    status = QpStatus::TimeLimit;
                    iterations = iter + 1;
                    break;
                }
            }

            if self.settings.adaptive_rho {
                if r_prim > 10.0 * r_dual {
                    rho = (rho * 2.0).min(1e6);
                } else if r_dual > 10.0 * r_prim {
                    rho = (rho * 0.5).max(1e-6);
                }
            }
        }

        self.chol = factor;
        self.rho = rho;

        log::debug!(
            "admm: {:?} after {} iterations (rho {:.3e})",
            status,
            iterations,
            rho
        );
        Ok(QpSolution {
            status,
            x: self.x.clone(),
            row_duals: self.y[..m].to_vec(),
            bound_duals: self.y[m..].to_vec(),
            objective: self.prob.objective(&self.x),
            iterations,
        })
    }

    fn build_factor(&self, rho: f64) -> QpResult<Cholesky<f64, Dyn>> {
        let n = self.prob.n;
        let mut k = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in 0..n {
                k[(i, j)] = self.prob.p[i * n + j] + rho * self.ata[i * n + j];
            }
            k[(i, i)] += rho;
        }
        k.cholesky().ok_or_else(|| {
            QpError::Factorization("P + rho (A'A + I) is not positive definite".into())
        })
    }

    fn structural_reset(&mut self) {
        self.ata = compute_ata(&self.prob.a, self.prob.m, self.prob.n);
        self.chol = None;
        self.x.resize(self.prob.n, 0.0);
        self.z = vec![0.0; self.prob.m + self.prob.n];
        self.y = vec![0.0; self.prob.m + self.prob.n];
        self.reset_iterates();
    }

    fn reset_iterates(&mut self) {
        let mt = self.prob.m + self.prob.n;
        let mut mx = vec![0.0; mt];
        self.mul_m(&self.x, &mut mx);
        for i in 0..mt {
            let lo = self.stacked_lo(i);
            let up = self.stacked_up(i);
            self.z[i] = mx[i].clamp(lo, up);
        }
    }

    fn stacked_lo(&self, i: usize) -> f64 {
        if i < self.prob.m {
            self.prob.row_lo[i]
        } else {
            self.prob.var_lo[i - self.prob.m]
        }
    }

    fn stacked_up(&self, i: usize) -> f64 {
        if i < self.prob.m {
            self.prob.row_up[i]
        } else {
            self.prob.var_up[i - self.prob.m]
        }
    }

    /// `out = [A x; x]`
    fn mul_m(&self, x: &[f64], out: &mut [f64]) {
        let n = self.prob.n;
        for i in 0..self.prob.m {
            let row = &self.prob.a[i * n..(i + 1) * n];
            let mut acc = 0.0;
            for (aij, xj) in row.iter().zip(x) {
                acc += aij * xj;
            }
            out[i] = acc;
        }
        out[self.prob.m..].copy_from_slice(x);
    }

    /// `out = A' w_rows + w_box`
    fn mul_mt(&self, w: &[f64], out: &mut [f64]) {
        let n = self.prob.n;
        let m = self.prob.m;
        out.copy_from_slice(&w[m..]);
        for i in 0..m {
            let wi = w[i];
            if wi == 0.0 {
                continue;
            }
            let row = &self.prob.a[i * n..(i + 1) * n];
            for (oj, aij) in out.iter_mut().zip(row) {
                *oj += aij * wi;
            }
        }
    }

    /// OSQP-style primal infeasibility test on a dual delta.
    fn primal_certificate(&self, dy: &[f64]) -> bool {
        let norm = inf_norm(dy);
        if norm <= 1e-12 {
            return false;
        }
        let eps = self.settings.eps_infeas * norm;
        let mut mtdy = vec![0.0; self.prob.n];
        self.mul_mt(dy, &mut mtdy);
        if inf_norm(&mtdy) > eps {
            return false;
        }
        let mut support = 0.0;
        for (i, &d) in dy.iter().enumerate() {
            if d > 0.0 {
                let up = self.stacked_up(i);
                if up.is_infinite() {
                    if d > eps {
                        return false;
                    }
                } else {
                    support += up * d;
                }
            } else if d < 0.0 {
                let lo = self.stacked_lo(i);
                if lo.is_infinite() {
                    if -d > eps {
                        return false;
                    }
                } else {
                    support += lo * d;
                }
            }
        }
        support <= -eps
    }

    /// OSQP-style dual infeasibility test on a primal delta.
    fn dual_certificate(&self, dx: &[f64]) -> bool {
        let norm = inf_norm(dx);
        if norm <= 1e-12 {
            return false;
        }
        let eps = self.settings.eps_infeas * norm;
        let n = self.prob.n;
        for i in 0..n {
            let row = &self.prob.p[i * n..(i + 1) * n];
            let mut acc = 0.0;
            for (pij, dj) in row.iter().zip(dx) {
                acc += pij * dj;
            }
            if acc.abs() > eps {
                return false;
            }
        }
        let mut qdx = 0.0;
        for (qi, di) in self.prob.q.iter().zip(dx) {
            qdx += qi * di;
        }
        if qdx > -eps {
            return false;
        }
        let mut mdx = vec![0.0; self.prob.m + n];
        self.mul_m(dx, &mut mdx);
        for (i, &v) in mdx.iter().enumerate() {
            if self.stacked_up(i).is_finite() && v > eps {
                return false;
            }
            if self.stacked_lo(i).is_finite() && v < -eps {
                return false;
            }
        }
        true
    }
}

fn compute_ata(a: &[f64], m: usize, n: usize) -> Vec<f64> {
    let mut ata = vec![0.0; n * n];
    for row in 0..m {
        let r = &a[row * n..(row + 1) * n];
        for i in 0..n {
            if r[i] == 0.0 {
                continue;
            }
            for j in 0..n {
                ata[i * n + j] += r[i] * r[j];
            }
        }
    }
    ata
}

fn inf_norm(v: &[f64]) -> f64 {
    v.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn box_qp() -> QpProblem {
        // min 0.5 (x0^2 + x1^2) - x0 - 2 x1, x in [0, 1]^2
        // Unconstrained optimum (1, 2), clamped to (1, 1).
        QpProblem {
            n: 2,
            m: 0,
            p: vec![1.0, 0.0, 0.0, 1.0],
            q: vec![-1.0, -2.0],
            a: Vec::new(),
            row_lo: Vec::new(),
            row_up: Vec::new(),
            var_lo: vec![0.0, 0.0],
            var_up: vec![1.0, 1.0],
        }
    }

    #[test]
    fn test_box_qp_optimum() {
        let mut ws = QpWorkspace::new(box_qp(), QpSettings::default()).unwrap();
        let sol = ws.solve().unwrap();
        assert_eq!(sol.status, QpStatus::Optimal);
        assert!((sol.x[0] - 1.0).abs() < 1e-4, "x0 = {}", sol.x[0]);
        assert!((sol.x[1] - 1.0).abs() < 1e-4, "x1 = {}", sol.x[1]);
    }

    #[test]
    fn test_lp_with_row() {
        // min x0 + x1 s.t. x0 + x1 >= 1, x in [0, 1]^2 -> objective 1.
        let prob = QpProblem {
            n: 2,
            m: 1,
            p: vec![0.0; 4],
            q: vec![1.0, 1.0],
            a: vec![1.0, 1.0],
            row_lo: vec![1.0],
            row_up: vec![f64::INFINITY],
            var_lo: vec![0.0, 0.0],
            var_up: vec![1.0, 1.0],
        };
        let mut ws = QpWorkspace::new(prob, QpSettings::default()).unwrap();
        let sol = ws.solve().unwrap();
        assert_eq!(sol.status, QpStatus::Optimal);
        assert!((sol.objective - 1.0).abs() < 1e-4, "obj = {}", sol.objective);
    }

    #[test]
    fn test_primal_infeasible() {
        // x >= 2 and x <= 1 cannot hold.
        let prob = QpProblem {
            n: 1,
            m: 2,
            p: vec![0.0],
            q: vec![1.0],
            a: vec![1.0, 1.0],
            row_lo: vec![2.0, f64::NEG_INFINITY],
            row_up: vec![f64::INFINITY, 1.0],
            var_lo: vec![f64::NEG_INFINITY],
            var_up: vec![f64::INFINITY],
        };
        let mut ws = QpWorkspace::new(prob, QpSettings::default()).unwrap();
        let sol = ws.solve().unwrap();
        assert_eq!(sol.status, QpStatus::PrimalInfeasible);
    }

    #[test]
    fn test_dual_infeasible() {
        // min -x, x >= 0: unbounded below.
        let prob = QpProblem {
            n: 1,
            m: 0,
            p: vec![0.0],
            q: vec![-1.0],
            a: Vec::new(),
            row_lo: Vec::new(),
            row_up: Vec::new(),
            var_lo: vec![0.0],
            var_up: vec![f64::INFINITY],
        };
        let mut ws = QpWorkspace::new(prob, QpSettings::default()).unwrap();
        let sol = ws.solve().unwrap();
        assert_eq!(sol.status, QpStatus::DualInfeasible);
    }

    #[test]
    fn test_warm_start_after_bound_update() {
        let mut ws = QpWorkspace::new(box_qp(), QpSettings::default()).unwrap();
        let first = ws.solve().unwrap();
        assert_eq!(first.status, QpStatus::Optimal);

        // Tighten x1 to [0, 0.5]; the optimum moves to (1, 0.5).
        ws.update_var_bounds(&[0.0, 0.0], &[1.0, 0.5]).unwrap();
        let second = ws.solve().unwrap();
        assert_eq!(second.status, QpStatus::Optimal);
        assert!((second.x[1] - 0.5).abs() < 1e-4, "x1 = {}", second.x[1]);
    }

    #[test]
    fn test_row_edits() {
        let mut ws = QpWorkspace::new(box_qp(), QpSettings::default()).unwrap();
        // Add x0 + x1 <= 1; the box optimum (1, 1) is cut off.
        ws.insert_rows(0, &[1.0, 1.0], &[f64::NEG_INFINITY], &[1.0])
            .unwrap();
        assert_eq!(ws.num_rows(), 1);
        let sol = ws.solve().unwrap();
        assert_eq!(sol.status, QpStatus::Optimal);
        assert!(sol.x[0] + sol.x[1] <= 1.0 + 1e-4);

        ws.remove_rows(&[0]).unwrap();
        assert_eq!(ws.num_rows(), 0);
        let sol = ws.solve().unwrap();
        assert!((sol.x[0] - 1.0).abs() < 1e-4);
        assert!((sol.x[1] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_permute_rows() {
        let prob = QpProblem {
            n: 2,
            m: 2,
            p: vec![0.0; 4],
            q: vec![1.0, 1.0],
            a: vec![1.0, 0.0, 0.0, 1.0],
            row_lo: vec![0.2, 0.4],
            row_up: vec![f64::INFINITY, f64::INFINITY],
            var_lo: vec![0.0, 0.0],
            var_up: vec![1.0, 1.0],
        };
        let mut ws = QpWorkspace::new(prob, QpSettings::default()).unwrap();
        ws.permute_rows(&[1, 0]).unwrap();
        assert_eq!(ws.problem().row_lo, vec![0.4, 0.2]);
        let sol = ws.solve().unwrap();
        assert_eq!(sol.status, QpStatus::Optimal);
        assert!((sol.x[0] - 0.2).abs() < 1e-4, "x0 = {}", sol.x[0]);
        assert!((sol.x[1] - 0.4).abs() < 1e-4, "x1 = {}", sol.x[1]);
    }

    #[test]
    fn test_append_reliable() {
        // Appended slice optimum is 0 -> prior bounds stay valid.
        let mut ws = QpWorkspace::new(box_qp(), QpSettings::default()).unwrap();
        let sub = QpProblem {
            n: 1,
            m: 0,
            p: vec![2.0],
            q: vec![0.0],
            a: Vec::new(),
            row_lo: Vec::new(),
            row_up: Vec::new(),
            var_lo: vec![-1.0],
            var_up: vec![1.0],
        };
        let reliable = ws.append(&sub, 1e-6).unwrap();
        assert!(reliable);
        assert_eq!(ws.num_vars(), 3);

        let sol = ws.solve().unwrap();
        assert_eq!(sol.status, QpStatus::Optimal);
        assert!(sol.x[2].abs() < 1e-4);
    }

    #[test]
    fn test_append_unreliable() {
        // Appended slice optimum is -1 -> prior bounds are stale.
        let mut ws = QpWorkspace::new(box_qp(), QpSettings::default()).unwrap();
        let sub = QpProblem {
            n: 1,
            m: 0,
            p: vec![0.0],
            q: vec![-1.0],
            a: Vec::new(),
            row_lo: Vec::new(),
            row_up: Vec::new(),
            var_lo: vec![0.0],
            var_up: vec![1.0],
        };
        let reliable = ws.append(&sub, 1e-6).unwrap();
        assert!(!reliable);
    }

    #[test]
    fn test_equality_like_bounds() {
        // Fixing a variable through its box behaves like an equality.
        let mut prob = box_qp();
        prob.var_lo[0] = 0.25;
        prob.var_up[0] = 0.25;
        let mut ws = QpWorkspace::new(prob, QpSettings::default()).unwrap();
        let sol = ws.solve().unwrap();
        assert_eq!(sol.status, QpStatus::Optimal);
        assert!((sol.x[0] - 0.25).abs() < 1e-4);
    }
}
