//! Branching variable and SOS1 group selection.

use std::time::Duration;

use crate::relax::{RelaxStatus, SubWorkspace};
use crate::search::node::{fractionality, Direction, Node};
use crate::search::pseudocost::{Observation, PseudoCosts};
use crate::search::SearchContext;
use crate::settings::{BranchRule, PriorityRule, PseudoCostInit, Settings};

/// Where to split a node.
#[derive(Debug, Clone, PartialEq)]
pub enum BranchPoint {
    /// Branch a fractional discrete variable.
    Variable {
        /// Variable index.
        var: usize,
        /// Position in the discrete list.
        pos: usize,
        /// Fractional relaxation value.
        value: f64,
        /// Explore the down child first.
        prefer_down: bool,
    },

    /// Branch a violated SOS1 group: each child fixes one side to zero.
    Sos1 {
        /// Variables fixed to zero in the first child.
        fix_first: Vec<usize>,
        /// Variables fixed to zero in the second child.
        fix_second: Vec<usize>,
    },
}

/// A fractional candidate: `(pos, var, value, fractionality)`.
type Candidate = (usize, usize, f64, f64);

/// Chooses the branching point for a solved node.
pub struct BranchSelector {
    rule: BranchRule,
    init: PseudoCostInit,
    reliability_threshold: u64,
    int_tol: f64,
    primal_tol: f64,
    sos1_priority: bool,
    /// Deterministic down-first descent under depth-first search.
    deterministic_down: bool,
}

impl BranchSelector {
    /// Build a selector from the engine settings.
    pub fn new(settings: &Settings) -> Self {
        Self {
            rule: settings.branch_rule,
            init: settings.pseudo_cost_init,
            reliability_threshold: settings.reliability_threshold,
            int_tol: settings.integer_tolerance,
            primal_tol: settings.primal_tolerance,
            sos1_priority: settings.sos1_priority,
            deterministic_down: settings.priority_rule == PriorityRule::DepthFirst,
        }
    }

    /// Fractional discrete variables of a solved node.
    pub fn candidates(&self, ctx: &SearchContext, primal: &[f64]) -> Vec<Candidate> {
        ctx.discrete
            .iter()
            .enumerate()
            .filter_map(|(pos, &var)| {
                let v = primal[var];
                let f = fractionality(v);
                (f > self.int_tol).then_some((pos, var, v, f))
            })
            .collect()
    }

    /// The most violated SOS1 group, if any: most members away from
    /// zero, ties by total magnitude.
    pub fn violated_sos1<'a>(
        &self,
        ctx: &'a SearchContext,
        primal: &[f64],
    ) -> Option<&'a [usize]> {
        let mut best: Option<(&[usize], usize, f64)> = None;
        for group in &ctx.sos1 {
            let nonzero = group
                .iter()
                .filter(|&&v| primal[v].abs() > self.primal_tol)
                .count();
            if nonzero < 2 {
                continue;
            }
            let magnitude: f64 = group.iter().map(|&v| primal[v].abs()).sum();
            let better = match best {
                None => true,
                Some((_, n, m)) => nonzero > n || (nonzero == n && magnitude > m),
            };
            if better {
                best = Some((group.as_slice(), nonzero, magnitude));
            }
        }
        best.map(|(g, _, _)| g)
    }

    /// Pick the branching point. `None` means the node has neither a
    /// fractional discrete variable nor a violated SOS1 group.
    pub fn select(
        &self,
        node: &Node,
        ctx: &SearchContext,
        pseudo: &mut PseudoCosts,
        workspace: &mut dyn SubWorkspace,
        observations: &mut Vec<Observation>,
        relax_budget: Option<Duration>,
    ) -> Option<BranchPoint> {
        let fractional = self.candidates(ctx, &node.primal);
        let violated = self.violated_sos1(ctx, &node.primal);

        // SOS1 groups branch first when prioritized, and always when no
        // fractional variable is left to branch on.
        if let Some(group) = violated {
            if self.sos1_priority || fractional.is_empty() {
                return Some(self.partition_sos1(group, &node.primal));
            }
        }
        if fractional.is_empty() {
            return None;
        }

        match self.rule {
            BranchRule::MostFractional => Some(self.most_fractional(&fractional, pseudo)),
            BranchRule::PseudoCost => Some(self.by_pseudo_cost(&fractional, pseudo)),
            BranchRule::StrongBranching { candidates } => Some(self.strong_branching(
                node,
                ctx,
                &fractional,
                candidates,
                pseudo,
                workspace,
                observations,
                relax_budget,
            )),
        }
    }

    /// One strong-branching sweep over the root's fractional variables,
    /// seeding the pseudo-costs before any peer starts.
    pub fn seed_from_root(
        &self,
        root: &Node,
        ctx: &SearchContext,
        pseudo: &mut PseudoCosts,
        workspace: &mut dyn SubWorkspace,
        observations: &mut Vec<Observation>,
        relax_budget: Option<Duration>,
    ) {
        let fractional = self.candidates(ctx, &root.primal);
        if fractional.is_empty() {
            return;
        }
        let _ = self.strong_branching(
            root,
            ctx,
            &fractional,
            fractional.len(),
            pseudo,
            workspace,
            observations,
            relax_budget,
        );
    }

    fn most_fractional(&self, fractional: &[Candidate], pseudo: &PseudoCosts) -> BranchPoint {
        let mut best = &fractional[0];
        for cand in &fractional[1..] {
            if cand.3 > best.3 {
                best = cand;
            }
        }
        let (pos, var, value, _) = *best;
        BranchPoint::Variable {
            var,
            pos,
            value,
            prefer_down: self.prefer_down(pos, value, pseudo),
        }
    }

    fn by_pseudo_cost(&self, fractional: &[Candidate], pseudo: &PseudoCosts) -> BranchPoint {
        let usable = |pos: usize| match self.init {
            PseudoCostInit::Reliable => pseudo.is_reliable(pos, self.reliability_threshold),
            _ => pseudo.observed(pos),
        };
        if !fractional.iter().all(|&(pos, ..)| usable(pos)) {
            // Not enough learning yet: fall back to most-fractional.
            return self.most_fractional(fractional, pseudo);
        }
        let mut best: Option<(&Candidate, f64)> = None;
        for cand in fractional {
            let (down, up) = pseudo.estimates(cand.0, cand.2);
            let score = down.min(up);
            if best.as_ref().is_none_or(|(_, s)| score > *s) {
                best = Some((cand, score));
            }
        }
        let ((pos, var, value, _), _) = match best {
            Some((c, s)) => (*c, s),
            None => return self.most_fractional(fractional, pseudo),
        };
        BranchPoint::Variable {
            var,
            pos,
            value,
            prefer_down: self.prefer_down(pos, value, pseudo),
        }
    }

    /// Solve both children of the top candidates and keep the variable
    /// with the best worst-side objective improvement. Observed
    /// improvements seed the pseudo-costs.
    #[allow(clippy::too_many_arguments)]
    fn strong_branching(
        &self,
        node: &Node,
        ctx: &SearchContext,
        fractional: &[Candidate],
        max_candidates: usize,
        pseudo: &mut PseudoCosts,
        workspace: &mut dyn SubWorkspace,
        observations: &mut Vec<Observation>,
        relax_budget: Option<Duration>,
    ) -> BranchPoint {
        let mut sorted: Vec<Candidate> = fractional.to_vec();
        sorted.sort_by(|a, b| b.3.partial_cmp(&a.3).unwrap_or(std::cmp::Ordering::Equal));
        sorted.truncate(max_candidates.max(1));

        let reference = if node.objective.is_finite() {
            node.objective
        } else {
            0.0
        };
        let mut best: Option<(Candidate, f64, bool)> = None;
        for cand in &sorted {
            let (pos, var, value, _) = *cand;
            let down_gain = self.probe_child(node, ctx, var, value, Direction::Down, reference, workspace, relax_budget);
            let up_gain = self.probe_child(node, ctx, var, value, Direction::Up, reference, workspace, relax_budget);

            let f = value - value.floor();
            if node.objective.is_finite() {
                if down_gain.is_finite() && f > 1e-9 {
                    let obs = Observation {
                        pos,
                        dir: Direction::Down,
                        degradation: down_gain / f,
                    };
                    pseudo.record(&obs);
                    observations.push(obs);
                }
                if up_gain.is_finite() && 1.0 - f > 1e-9 {
                    let obs = Observation {
                        pos,
                        dir: Direction::Up,
                        degradation: up_gain / (1.0 - f),
                    };
                    pseudo.record(&obs);
                    observations.push(obs);
                }
            }

            let score = down_gain.min(up_gain);
            let prefer_down = down_gain <= up_gain;
            if best.as_ref().is_none_or(|(_, s, _)| score > *s) {
                best = Some((*cand, score, prefer_down));
            }
        }
        let ((pos, var, value, _), _, prefer_down) = match best {
            Some(b) => b,
            None => {
                let (pos, var, value, _) = sorted[0];
                (
                    (pos, var, value, 0.0),
                    0.0,
                    self.prefer_down(pos, value, pseudo),
                )
            }
        };
        let prefer_down = if self.deterministic_down {
            true
        } else {
            prefer_down
        };
        BranchPoint::Variable {
            var,
            pos,
            value,
            prefer_down,
        }
    }

    /// Objective degradation of one child relaxation; `+inf` when the
    /// child is infeasible (branching there closes the subtree).
    #[allow(clippy::too_many_arguments)]
    fn probe_child(
        &self,
        node: &Node,
        ctx: &SearchContext,
        var: usize,
        value: f64,
        dir: Direction,
        reference: f64,
        workspace: &mut dyn SubWorkspace,
        relax_budget: Option<Duration>,
    ) -> f64 {
        let pos = ctx
            .discrete
            .iter()
            .position(|&v| v == var)
            .unwrap_or(usize::MAX);
        let child = match node.child(var, pos, value, dir) {
            Some(c) => c,
            None => return f64::INFINITY,
        };
        if workspace
            .update_bounds(&child.branch_lo, &child.branch_up)
            .is_err()
        {
            return 0.0;
        }
        let sol = workspace.solve(self.primal_tol, relax_budget);
        match sol.status {
            RelaxStatus::Infeasible => f64::INFINITY,
            _ if sol.certified_bound() => (sol.objective - reference).max(0.0),
            _ => 0.0,
        }
    }

    /// Explore the side with the smaller expected degradation first;
    /// depth-first search descends deterministically instead.
    fn prefer_down(&self, pos: usize, value: f64, pseudo: &PseudoCosts) -> bool {
        if self.deterministic_down {
            return true;
        }
        if pseudo.observed(pos) {
            let (down, up) = pseudo.estimates(pos, value);
            down <= up
        } else {
            value - value.floor() <= 0.5
        }
    }

    /// Partition a violated group into two sides of comparable cumulative
    /// magnitude; each child zeroes one side.
    fn partition_sos1(&self, group: &[usize], primal: &[f64]) -> BranchPoint {
        let mut members: Vec<usize> = group.to_vec();
        members.sort_by(|&a, &b| {
            primal[b]
                .abs()
                .partial_cmp(&primal[a].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let total: f64 = members.iter().map(|&v| primal[v].abs()).sum();
        let mut heavy = Vec::new();
        let mut light = Vec::new();
        let mut cum = 0.0;
        for &v in &members {
            if cum < total / 2.0 && heavy.len() < members.len() - 1 {
                cum += primal[v].abs();
                heavy.push(v);
            } else {
                light.push(v);
            }
        }
        // First child keeps the heavy side free (dives toward the
        // incumbent), second child keeps the light side.
        BranchPoint::Sos1 {
            fix_first: light,
            fix_second: heavy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConstraintSet, Objective, Problem, VariableSet};
    use crate::relax::QpRelaxation;
    use solver_qp::QpSettings;

    fn context(discrete: Vec<usize>, sos1: Vec<usize>, n: usize) -> SearchContext {
        let vars = VariableSet::from_parts(
            vec![0.0; n],
            vec![1.0; n],
            discrete,
            sos1,
            None,
        )
        .unwrap();
        let problem =
            Problem::new(Objective::Null, ConstraintSet::Null, vars).unwrap();
        SearchContext::new(problem)
    }

    fn workspace(ctx: &SearchContext) -> Box<dyn crate::relax::SubWorkspace> {
        Box::new(QpRelaxation::setup(&ctx.problem, QpSettings::default()).unwrap())
    }

    #[test]
    fn test_most_fractional_picks_closest_to_half() {
        let ctx = context(vec![0, 1, 2], vec![], 3);
        let settings = Settings::default();
        let selector = BranchSelector::new(&settings);
        let mut pseudo = PseudoCosts::uniform(3);
        let mut ws = workspace(&ctx);
        let mut obs = Vec::new();

        let mut node = crate::search::node::Node::root(&ctx.problem.variables);
        node.primal = vec![0.9, 0.45, 0.2];
        let point = selector
            .select(&node, &ctx, &mut pseudo, ws.as_mut(), &mut obs, None)
            .unwrap();
        match point {
            BranchPoint::Variable { var, .. } => assert_eq!(var, 1),
            other => panic!("unexpected branch point: {:?}", other),
        }
    }

    #[test]
    fn test_integral_primal_yields_none() {
        let ctx = context(vec![0, 1], vec![], 2);
        let settings = Settings::default();
        let selector = BranchSelector::new(&settings);
        let mut pseudo = PseudoCosts::uniform(2);
        let mut ws = workspace(&ctx);
        let mut obs = Vec::new();

        let mut node = crate::search::node::Node::root(&ctx.problem.variables);
        node.primal = vec![1.0, 0.0];
        assert!(selector
            .select(&node, &ctx, &mut pseudo, ws.as_mut(), &mut obs, None)
            .is_none());
    }

    #[test]
    fn test_sos1_branches_even_when_integral() {
        // Both members at 1.0: integral, but the group is violated.
        let ctx = context(vec![0, 1], vec![3, 3], 2);
        let settings = Settings::default();
        let selector = BranchSelector::new(&settings);
        let mut pseudo = PseudoCosts::uniform(2);
        let mut ws = workspace(&ctx);
        let mut obs = Vec::new();

        let mut node = crate::search::node::Node::root(&ctx.problem.variables);
        node.primal = vec![1.0, 1.0];
        let point = selector
            .select(&node, &ctx, &mut pseudo, ws.as_mut(), &mut obs, None)
            .unwrap();
        match point {
            BranchPoint::Sos1 {
                fix_first,
                fix_second,
            } => {
                assert_eq!(fix_first.len() + fix_second.len(), 2);
                assert!(!fix_first.is_empty() && !fix_second.is_empty());
            }
            other => panic!("expected SOS1 branch, got {:?}", other),
        }
    }

    #[test]
    fn test_sos1_satisfied_falls_through_to_fractional() {
        // Group has one non-zero member: satisfied; x2 is fractional.
        let ctx = context(vec![0, 1, 2], vec![3, 3, 0], 3);
        let settings = Settings::default();
        let selector = BranchSelector::new(&settings);
        let mut pseudo = PseudoCosts::uniform(3);
        let mut ws = workspace(&ctx);
        let mut obs = Vec::new();

        let mut node = crate::search::node::Node::root(&ctx.problem.variables);
        node.primal = vec![1.0, 0.0, 0.5];
        let point = selector
            .select(&node, &ctx, &mut pseudo, ws.as_mut(), &mut obs, None)
            .unwrap();
        match point {
            BranchPoint::Variable { var, .. } => assert_eq!(var, 2),
            other => panic!("expected variable branch, got {:?}", other),
        }
    }

    #[test]
    fn test_pseudo_cost_rule_prefers_high_degradation() {
        let ctx = context(vec![0, 1], vec![], 2);
        let mut settings = Settings::default();
        settings.branch_rule = BranchRule::PseudoCost;
        let selector = BranchSelector::new(&settings);
        let mut ws = workspace(&ctx);
        let mut obs = Vec::new();

        let mut pseudo = PseudoCosts::uniform(2);
        for (pos, deg) in [(0usize, 1.0), (1usize, 8.0)] {
            pseudo.record(&Observation {
                pos,
                dir: Direction::Down,
                degradation: deg,
            });
            pseudo.record(&Observation {
                pos,
                dir: Direction::Up,
                degradation: deg,
            });
        }

        let mut node = crate::search::node::Node::root(&ctx.problem.variables);
        node.primal = vec![0.5, 0.5];
        let point = selector
            .select(&node, &ctx, &mut pseudo, ws.as_mut(), &mut obs, None)
            .unwrap();
        match point {
            BranchPoint::Variable { var, .. } => assert_eq!(var, 1),
            other => panic!("unexpected branch point: {:?}", other),
        }
    }

    #[test]
    fn test_sos1_partition_balances_magnitude() {
        let ctx = context(vec![0, 1, 2], vec![1, 1, 1], 3);
        let settings = Settings::default();
        let selector = BranchSelector::new(&settings);
        let point = selector.partition_sos1(&[0, 1, 2], &[0.6, 0.5, 0.1]);
        match point {
            BranchPoint::Sos1 {
                fix_first,
                fix_second,
            } => {
                // Heaviest member stays free in the first child.
                assert!(fix_second.contains(&0));
                assert!(!fix_first.contains(&0));
                assert_eq!(fix_first.len() + fix_second.len(), 3);
            }
            other => panic!("unexpected branch point: {:?}", other),
        }
        let _ = ctx;
    }
}
