//! Search-tree nodes and branch construction.

use crate::model::VariableSet;

/// Branch direction on a discrete variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `x <= floor(v)`
    Down,
    /// `x >= ceil(v)`
    Up,
}

impl Direction {
    /// Column index into the pseudo-cost matrices.
    pub fn index(&self) -> usize {
        match self {
            Direction::Down => 0,
            Direction::Up => 1,
        }
    }
}

/// How a node was created, kept for the deferred pseudo-cost update: the
/// observation `(objective - parent_objective) / frac_dist` is recorded
/// once the node's own relaxation is solved.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchInfo {
    /// Discrete position (index into the discrete list) branched on.
    pub pos: usize,
    /// Direction taken.
    pub dir: Direction,
    /// Fractional distance rounded away on this side.
    pub frac_dist: f64,
    /// Parent relaxation objective; `-inf` when the parent bound was not
    /// certified, which suppresses the observation.
    pub parent_objective: f64,
}

/// A node of the branch-and-bound tree.
///
/// Bounds are cumulative (problem bounds tightened by every ancestor
/// decision), so a relaxation can be reloaded statelessly from the node
/// alone. `objective` starts at the inherited parent bound (`-inf` for
/// the root or under an uncertified parent) and becomes the node's own
/// relaxation optimum once solved; `+inf` marks proven infeasibility.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Cumulative lower bounds, full length.
    pub branch_lo: Vec<f64>,
    /// Cumulative upper bounds, full length.
    pub branch_up: Vec<f64>,
    /// Relaxation objective (see type docs for the lifecycle).
    pub objective: f64,
    /// Relaxation primal assignment (parent's until solved).
    pub primal: Vec<f64>,
    /// Relaxation row duals.
    pub dual: Vec<f64>,
    /// Mean fractionality of the discrete variables at `primal`.
    pub avg_frac: f64,
    /// Queue score, computed at insertion.
    pub pseudo_objective: f64,
    /// Whether `objective` is a certified lower bound.
    pub reliable: bool,
    /// Distance from the root.
    pub depth: u32,
    /// Creation record for the deferred pseudo-cost update.
    pub branch: Option<BranchInfo>,
}

impl Node {
    /// The root node: problem bounds with discrete bounds rounded inward.
    pub fn root(variables: &VariableSet) -> Self {
        let (lo, up) = variables.bounds();
        let mut node = Self {
            branch_lo: lo.to_vec(),
            branch_up: up.to_vec(),
            objective: f64::NEG_INFINITY,
            primal: Vec::new(),
            dual: Vec::new(),
            avg_frac: 0.0,
            pseudo_objective: 0.0,
            reliable: true,
            depth: 0,
            branch: None,
        };
        node.round_discrete_bounds(variables.discrete_indices());
        node
    }

    /// Round discrete bounds inward to the nearest integers.
    pub fn round_discrete_bounds(&mut self, discrete: &[usize]) {
        for &i in discrete {
            if self.branch_lo[i].is_finite() {
                self.branch_lo[i] = self.branch_lo[i].ceil();
            }
            if self.branch_up[i].is_finite() {
                self.branch_up[i] = self.branch_up[i].floor();
            }
        }
    }

    /// True when no bound pair is inverted.
    pub fn bounds_consistent(&self) -> bool {
        self.branch_lo
            .iter()
            .zip(&self.branch_up)
            .all(|(lo, up)| lo <= up)
    }

    /// Child branching variable `var` (discrete position `pos`) away from
    /// fractional value `value`. `None` when the child's domain is empty.
    pub fn child(&self, var: usize, pos: usize, value: f64, dir: Direction) -> Option<Self> {
        let mut child = self.child_base();
        let frac_dist = match dir {
            Direction::Down => {
                child.branch_up[var] = value.floor();
                value - value.floor()
            }
            Direction::Up => {
                child.branch_lo[var] = value.ceil();
                value.ceil() - value
            }
        };
        if child.branch_lo[var] > child.branch_up[var] {
            return None;
        }
        if !child.primal.is_empty() {
            child.primal[var] = match dir {
                Direction::Down => value.floor(),
                Direction::Up => value.ceil(),
            };
        }
        child.branch = Some(BranchInfo {
            pos,
            dir,
            frac_dist,
            parent_objective: self.objective,
        });
        Some(child)
    }

    /// SOS1 child fixing the given variables to zero. `None` when zero
    /// lies outside some fixed variable's current domain.
    pub fn sos1_child(&self, fix_to_zero: &[usize]) -> Option<Self> {
        let mut child = self.child_base();
        for &v in fix_to_zero {
            if child.branch_lo[v] > 0.0 || child.branch_up[v] < 0.0 {
                return None;
            }
            child.branch_lo[v] = 0.0;
            child.branch_up[v] = 0.0;
            if !child.primal.is_empty() {
                child.primal[v] = 0.0;
            }
        }
        Some(child)
    }

    fn child_base(&self) -> Self {
        Self {
            branch_lo: self.branch_lo.clone(),
            branch_up: self.branch_up.clone(),
            // A child's feasible region is a subset of its parent's, so
            // the parent optimum is a valid initial bound. The caller
            // resets this to -inf when the parent bound is uncertified.
            objective: self.objective,
            primal: self.primal.clone(),
            dual: Vec::new(),
            avg_frac: self.avg_frac,
            pseudo_objective: 0.0,
            reliable: true,
            depth: self.depth + 1,
            branch: None,
        }
    }

    /// Bound-based fathoming test against the incumbent objective.
    pub fn can_fathom(&self, obj_upb: f64, abs_gap_tol: f64) -> bool {
        self.reliable && self.objective >= obj_upb - abs_gap_tol
    }
}

/// Distance from `v` to the nearest integer.
pub fn fractionality(v: f64) -> f64 {
    (v - v.round()).abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VariableSet;

    fn vars() -> VariableSet {
        VariableSet::new(vec![0.0, -0.5], vec![5.5, 3.0])
            .unwrap()
            .with_discrete(vec![0, 1])
            .unwrap()
    }

    #[test]
    fn test_root_rounds_discrete_bounds() {
        let root = Node::root(&vars());
        assert_eq!(root.branch_lo, vec![0.0, 0.0]);
        assert_eq!(root.branch_up, vec![5.0, 3.0]);
        assert_eq!(root.depth, 0);
        assert!(root.objective.is_infinite() && root.objective < 0.0);
    }

    #[test]
    fn test_children_bracket_the_value() {
        let mut root = Node::root(&vars());
        root.objective = 1.0;
        root.primal = vec![2.7, 0.0];

        let down = root.child(0, 0, 2.7, Direction::Down).unwrap();
        assert_eq!(down.branch_up[0], 2.0);
        assert_eq!(down.branch_lo[0], 0.0);
        assert_eq!(down.depth, 1);
        assert_eq!(down.objective, 1.0);
        assert_eq!(down.primal[0], 2.0);
        let info = down.branch.unwrap();
        assert_eq!(info.dir, Direction::Down);
        assert!((info.frac_dist - 0.7).abs() < 1e-12);

        let up = root.child(0, 0, 2.7, Direction::Up).unwrap();
        assert_eq!(up.branch_lo[0], 3.0);
        assert_eq!(up.branch_up[0], 5.0);
        let info = up.branch.unwrap();
        assert!((info.frac_dist - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_child_pruned_at_creation() {
        let mut root = Node::root(&vars());
        root.branch_lo[0] = 3.0;
        // Down child would force x0 <= 2 against lo = 3.
        assert!(root.child(0, 0, 2.7, Direction::Down).is_none());
        assert!(root.child(0, 0, 2.7, Direction::Up).is_some());
    }

    #[test]
    fn test_sos1_child_fixes_side() {
        let mut root = Node::root(&vars());
        root.primal = vec![2.0, 1.0];
        let child = root.sos1_child(&[1]).unwrap();
        assert_eq!(child.branch_lo[1], 0.0);
        assert_eq!(child.branch_up[1], 0.0);
        assert_eq!(child.primal[1], 0.0);

        // Fixing to zero fails when zero is outside the domain.
        let mut shifted = root.clone();
        shifted.branch_lo[1] = 1.0;
        assert!(shifted.sos1_child(&[1]).is_none());
    }

    #[test]
    fn test_can_fathom_requires_reliability() {
        let mut node = Node::root(&vars());
        node.objective = 10.0;
        assert!(node.can_fathom(10.0, 1e-6));
        assert!(!node.can_fathom(11.0, 1e-6));
        node.reliable = false;
        assert!(!node.can_fathom(10.0, 1e-6));
    }

    #[test]
    fn test_fractionality() {
        assert!((fractionality(2.7) - 0.3).abs() < 1e-12);
        assert!((fractionality(-1.25) - 0.25).abs() < 1e-12);
        assert!(fractionality(4.0) < 1e-12);
    }
}
