//! Per-variable objective-degradation statistics.

use crate::error::{EngineError, EngineResult};
use crate::search::node::{fractionality, Direction};

/// One learning event: branching discrete position `pos` in direction
/// `dir` degraded the relaxation objective by `degradation` per unit of
/// fractional distance.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Discrete position (index into the discrete list).
    pub pos: usize,
    /// Branch direction.
    pub dir: Direction,
    /// Objective degradation per unit of rounding.
    pub degradation: f64,
}

/// Running averages of per-unit objective degradation, one `|D| x 2`
/// matrix of costs and one of observation counts (column 0 down, 1 up).
#[derive(Debug, Clone, PartialEq)]
pub struct PseudoCosts {
    costs: Vec<[f64; 2]>,
    counts: Vec<[f64; 2]>,
}

impl PseudoCosts {
    /// All-zero statistics.
    pub fn new(num_discrete: usize) -> Self {
        Self {
            costs: vec![[0.0; 2]; num_discrete],
            counts: vec![[0.0; 2]; num_discrete],
        }
    }

    /// Costs filled with a small positive constant, zero observations.
    pub fn uniform(num_discrete: usize) -> Self {
        Self {
            costs: vec![[1e-4; 2]; num_discrete],
            counts: vec![[0.0; 2]; num_discrete],
        }
    }

    /// Rebuild from the flat `|D| x 2` layout carried on a variable set.
    pub fn from_raw(costs: &[f64], counts: &[f64]) -> EngineResult<Self> {
        if costs.len() != counts.len() || costs.len() % 2 != 0 {
            return Err(EngineError::Setup("pseudo-cost layout mismatch".into()));
        }
        let d = costs.len() / 2;
        Ok(Self {
            costs: (0..d).map(|i| [costs[2 * i], costs[2 * i + 1]]).collect(),
            counts: (0..d).map(|i| [counts[2 * i], counts[2 * i + 1]]).collect(),
        })
    }

    /// Flatten into the `|D| x 2` carry layout.
    pub fn to_raw(&self) -> (Vec<f64>, Vec<f64>) {
        let flat = |m: &Vec<[f64; 2]>| m.iter().flat_map(|r| r.iter().copied()).collect();
        (flat(&self.costs), flat(&self.counts))
    }

    /// Number of discrete variables tracked.
    pub fn len(&self) -> usize {
        self.costs.len()
    }

    /// True when no variables are tracked.
    pub fn is_empty(&self) -> bool {
        self.costs.is_empty()
    }

    /// Fold one observation into the running average.
    pub fn record(&mut self, obs: &Observation) {
        if !obs.degradation.is_finite() || obs.pos >= self.len() {
            return;
        }
        let d = obs.dir.index();
        let n = self.counts[obs.pos][d];
        self.costs[obs.pos][d] = (self.costs[obs.pos][d] * n + obs.degradation.max(0.0)) / (n + 1.0);
        self.counts[obs.pos][d] = n + 1.0;
    }

    /// Average per-unit degradation in one direction.
    pub fn cost(&self, pos: usize, dir: Direction) -> f64 {
        self.costs[pos][dir.index()]
    }

    /// Observation count in one direction.
    pub fn count(&self, pos: usize, dir: Direction) -> f64 {
        self.counts[pos][dir.index()]
    }

    /// True once either direction has at least one observation.
    pub fn observed(&self, pos: usize) -> bool {
        self.counts[pos][0] + self.counts[pos][1] > 0.0
    }

    /// True once both directions reach the observation threshold.
    pub fn is_reliable(&self, pos: usize, threshold: u64) -> bool {
        self.counts[pos][0] >= threshold as f64 && self.counts[pos][1] >= threshold as f64
    }

    /// Expected degradation of both children of branching at `value`:
    /// `(down_cost * f, up_cost * (1 - f))` with `f = value - floor(value)`.
    pub fn estimates(&self, pos: usize, value: f64) -> (f64, f64) {
        let f = value - value.floor();
        (
            self.costs[pos][0] * f,
            self.costs[pos][1] * (1.0 - f),
        )
    }

    /// Pseudo-cost term of the queue score: the summed smaller-side
    /// expected degradation over all fractional discrete variables.
    pub fn expected_degradation(
        &self,
        discrete: &[usize],
        primal: &[f64],
        int_tol: f64,
    ) -> f64 {
        if primal.is_empty() {
            return 0.0;
        }
        let mut total = 0.0;
        for (pos, &var) in discrete.iter().enumerate() {
            let v = primal[var];
            if fractionality(v) > int_tol {
                let (down, up) = self.estimates(pos, v);
                total += down.min(up);
            }
        }
        total
    }
}
