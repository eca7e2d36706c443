//! Branch-and-solve: expansion of one node.

use std::time::Duration;

use crate::parallel::SharedState;
use crate::relax::{RelaxStatus, SubWorkspace};
use crate::search::branching::{BranchPoint, BranchSelector};
use crate::search::node::{fractionality, Direction, Node};
use crate::search::pseudocost::{Observation, PseudoCosts};
use crate::search::queue::NodeQueue;
use crate::search::{SearchContext, SearchStats};
use crate::settings::Settings;

/// Terminal classification of one expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Relaxation proven infeasible (or bounds contradict a row).
    Infeasible,
    /// Certified bound at or above the incumbent.
    Bound,
    /// Certified bound at or above the objective cutoff.
    Cutoff,
    /// Integer and SOS1 feasible; incumbent updated when improving.
    Integer,
    /// Children created and enqueued.
    Branched,
}

/// Mutable per-worker state threaded through an expansion.
pub struct ExpandState<'a> {
    /// Shared run context.
    pub ctx: &'a SearchContext,
    /// Engine settings.
    pub settings: &'a Settings,
    /// Branching rule.
    pub selector: &'a BranchSelector,
    /// This worker's relaxation backend.
    pub workspace: &'a mut dyn SubWorkspace,
    /// This worker's pseudo-cost view.
    pub pseudo: &'a mut PseudoCosts,
    /// This worker's queue.
    pub queue: &'a mut NodeQueue,
    /// Cross-worker shared bounds and incumbent.
    pub shared: &'a SharedState,
    /// Outbox of fresh pseudo-cost observations for broadcast.
    pub observations: &'a mut Vec<Observation>,
    /// This worker's counters.
    pub stats: &'a mut SearchStats,
}

/// Expand one node: solve its relaxation, then fathom or branch.
pub fn branch_and_solve(
    state: &mut ExpandState<'_>,
    mut node: Node,
    time_left: Option<Duration>,
) -> Disposition {
    state.stats.explored += 1;

    let disposition = expand_inner(state, &mut node, time_left);
    match disposition {
        Disposition::Branched => state.stats.branched += 1,
        _ => state.stats.fathomed += 1,
    }
    disposition
}

fn expand_inner(
    state: &mut ExpandState<'_>,
    node: &mut Node,
    time_left: Option<Duration>,
) -> Disposition {
    let settings = state.settings;
    let upb = state.shared.obj_upb();

    // Fathom on the inherited bound before paying for a solve.
    if node.can_fathom(upb, settings.absolute_gap_tolerance) {
        return Disposition::Bound;
    }
    if node.reliable && node.objective >= settings.objective_cutoff {
        return Disposition::Cutoff;
    }
    // Bound propagation: a row whose activity interval misses its bounds
    // proves the node infeasible without a subsolver call.
    if state.ctx.problem.constraints.provably_infeasible(
        &node.branch_lo,
        &node.branch_up,
        settings.primal_tolerance,
    ) {
        node.objective = f64::INFINITY;
        return Disposition::Infeasible;
    }

    if !solve_relaxation(node, state.ctx, settings, state.workspace, time_left) {
        return Disposition::Infeasible;
    }
    if node.primal.len() != state.ctx.problem.num_vars() {
        // Backend failure left no usable primal; there is nothing to
        // branch on.
        log::warn!(
            "dropping node at depth {}: relaxation returned no primal",
            node.depth
        );
        return Disposition::Infeasible;
    }

    // Deferred pseudo-cost update: this node's solve realizes the
    // observation promised when it was created.
    if let Some(info) = &node.branch {
        if node.reliable
            && node.objective.is_finite()
            && info.parent_objective.is_finite()
            && info.frac_dist > 1e-9
        {
            let obs = Observation {
                pos: info.pos,
                dir: info.dir,
                degradation: ((node.objective - info.parent_objective) / info.frac_dist)
                    .max(0.0),
            };
            state.pseudo.record(&obs);
            state.observations.push(obs);
        }
    }

    let upb = state.shared.obj_upb();
    if node.can_fathom(upb, settings.absolute_gap_tolerance) {
        return Disposition::Bound;
    }
    if node.reliable && node.objective >= settings.objective_cutoff {
        return Disposition::Cutoff;
    }

    if integer_feasible(state.ctx, &node.primal, settings) {
        let mut x = node.primal.clone();
        for &v in &state.ctx.discrete {
            x[v] = x[v].round();
        }
        let feas_tol = 10.0 * settings.primal_tolerance;
        if state.ctx.problem.feasible(&x, feas_tol) {
            let objective = state.ctx.problem.objective_value(&x);
            if objective < upb && state.shared.try_update_incumbent(&x, objective) {
                state.stats.incumbents += 1;
            }
            return Disposition::Integer;
        }
        // The relaxation looked integral but the rounded point fails
        // verification; fall through and branch if anything is left.
    }

    let point = match state.selector.select(
        node,
        state.ctx,
        state.pseudo,
        state.workspace,
        state.observations,
        time_left,
    ) {
        Some(point) => point,
        None => return Disposition::Integer,
    };

    let inherited_ok = node.reliable && node.objective.is_finite();
    let mut children: Vec<Node> = Vec::with_capacity(2);
    match point {
        BranchPoint::Variable {
            var,
            pos,
            value,
            prefer_down,
        } => {
            let down = node.child(var, pos, value, Direction::Down);
            let up = node.child(var, pos, value, Direction::Up);
            let (first, second) = if prefer_down { (down, up) } else { (up, down) };
            children.extend(first);
            children.extend(second);
        }
        BranchPoint::Sos1 {
            fix_first,
            fix_second,
        } => {
            children.extend(node.sos1_child(&fix_first));
            children.extend(node.sos1_child(&fix_second));
        }
    }

    for mut child in children {
        if !inherited_ok {
            // An uncertified parent bound is a heuristic only: the child
            // starts bound-less and is re-solved from scratch.
            child.objective = f64::NEG_INFINITY;
            if let Some(info) = &mut child.branch {
                info.parent_objective = f64::NEG_INFINITY;
            }
        }
        state
            .queue
            .push(child, state.pseudo, &state.ctx.discrete);
    }
    Disposition::Branched
}

/// Load the node bounds and solve its relaxation.
///
/// Returns `false` when the relaxation is proven infeasible (the node's
/// objective becomes `+inf`). Every other outcome updates the node in
/// place: the objective is clamped to the inherited bound when both are
/// certified, and `reliable` reflects the backend's dual certificate.
pub fn solve_relaxation(
    node: &mut Node,
    ctx: &SearchContext,
    settings: &Settings,
    workspace: &mut dyn SubWorkspace,
    time_left: Option<Duration>,
) -> bool {
    if let Err(err) = workspace.update_bounds(&node.branch_lo, &node.branch_up) {
        log::warn!("bound reload failed: {}", err);
        node.reliable = false;
        return true;
    }
    let sol = workspace.solve(settings.primal_tolerance, time_left);
    match sol.status {
        RelaxStatus::Infeasible => {
            node.objective = f64::INFINITY;
            node.reliable = true;
            false
        }
        _ => {
            let certified = sol.certified_bound();
            let inherited = node.objective;
            node.objective = if certified && node.reliable && inherited.is_finite() {
                sol.objective.max(inherited)
            } else {
                sol.objective
            };
            node.reliable = certified;
            node.primal = sol.primal;
            node.dual = sol.dual;
            node.avg_frac = mean_fractionality(&ctx.discrete, &node.primal);
            true
        }
    }
}

fn integer_feasible(ctx: &SearchContext, primal: &[f64], settings: &Settings) -> bool {
    if primal.is_empty() {
        return false;
    }
    let integral = ctx
        .discrete
        .iter()
        .all(|&v| fractionality(primal[v]) <= settings.integer_tolerance);
    let sos1_ok = ctx.sos1.iter().all(|group| {
        group
            .iter()
            .filter(|&&v| primal[v].abs() > settings.primal_tolerance)
            .count()
            <= 1
    });
    integral && sos1_ok
}

fn mean_fractionality(discrete: &[usize], primal: &[f64]) -> f64 {
    if discrete.is_empty() || primal.is_empty() {
        return 0.0;
    }
    discrete
        .iter()
        .map(|&v| fractionality(primal[v]))
        .sum::<f64>()
        / discrete.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConstraintSet, Objective, Problem, VariableSet};
    use crate::relax::QpRelaxation;
    use crate::settings::PriorityRule;
    use solver_qp::QpSettings;
    use sprs::CsMat;

    /// min -x0 - x1 s.t. x0 + x1 <= 1.5, x binary.
    fn knapsack_ctx() -> SearchContext {
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
        SearchContext::new(problem)
    }

    struct Harness {
        ctx: SearchContext,
        settings: Settings,
        selector: BranchSelector,
        workspace: QpRelaxation,
        pseudo: PseudoCosts,
        queue: NodeQueue,
        shared: SharedState,
        observations: Vec<Observation>,
        stats: SearchStats,
    }

    impl Harness {
        fn new(ctx: SearchContext) -> Self {
            let settings = Settings::default();
            let selector = BranchSelector::new(&settings);
            let workspace = QpRelaxation::setup(&ctx.problem, QpSettings::default()).unwrap();
            let pseudo = PseudoCosts::uniform(ctx.discrete.len());
            let queue = NodeQueue::new(
                PriorityRule::BestFirst,
                settings.pseudo_cost_weight,
                settings.integer_tolerance,
            );
            Self {
                ctx,
                settings,
                selector,
                workspace,
                pseudo,
                queue,
                shared: SharedState::new(),
                observations: Vec::new(),
                stats: SearchStats::default(),
            }
        }

        fn expand(&mut self, node: Node) -> Disposition {
            let mut state = ExpandState {
                ctx: &self.ctx,
                settings: &self.settings,
                selector: &self.selector,
                workspace: &mut self.workspace,
                pseudo: &mut self.pseudo,
                queue: &mut self.queue,
                shared: &self.shared,
                observations: &mut self.observations,
                stats: &mut self.stats,
            };
            branch_and_solve(&mut state, node, None)
        }
    }

    #[test]
    fn test_root_branches_on_fractional() {
        let ctx = knapsack_ctx();
        let mut h = Harness::new(ctx);
        let root = Node::root(&h.ctx.problem.variables);

        let disp = h.expand(root);
        assert_eq!(disp, Disposition::Branched);
        assert_eq!(h.queue.len(), 2);
        assert_eq!(h.stats.explored, 1);
        assert_eq!(h.stats.branched, 1);

        // Both children carry the root bound (invariant: child objective
        // >= parent objective).
        while let Some(child) = h.queue.pop_best() {
            assert!(child.objective >= -1.5 - 1e-4);
            assert!(child.bounds_consistent());
        }
    }

    #[test]
    fn test_integer_node_becomes_incumbent() {
        let ctx = knapsack_ctx();
        let mut h = Harness::new(ctx);
        let mut node = Node::root(&h.ctx.problem.variables);
        // Fix both variables: x0 = 1, x1 = 0.
        node.branch_lo = vec![1.0, 0.0];
        node.branch_up = vec![1.0, 0.0];

        let disp = h.expand(node);
        assert_eq!(disp, Disposition::Integer);
        let (primal, objective) = h.shared.incumbent().unwrap();
        assert_eq!(primal, vec![1.0, 0.0]);
        assert!((objective + 1.0).abs() < 1e-6);
        assert!((h.shared.obj_upb() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_fathom_by_bound_skips_solve() {
        let ctx = knapsack_ctx();
        let mut h = Harness::new(ctx);
        h.shared.try_update_incumbent(&[1.0, 0.0], -1.0);

        let mut node = Node::root(&h.ctx.problem.variables);
        node.objective = -0.5; // Certified worse than the incumbent.
        let disp = h.expand(node);
        assert_eq!(disp, Disposition::Bound);
        assert_eq!(h.stats.fathomed, 1);
    }

    #[test]
    fn test_unreliable_bound_does_not_fathom() {
        let ctx = knapsack_ctx();
        let mut h = Harness::new(ctx);
        h.shared.try_update_incumbent(&[1.0, 0.0], -1.0);

        let mut node = Node::root(&h.ctx.problem.variables);
        node.objective = -0.5;
        node.reliable = false;
        // The node is re-solved instead of fathomed; the true relaxation
        // bound (-1.5) undercuts the incumbent, so the node branches.
        let disp = h.expand(node);
        assert_eq!(disp, Disposition::Branched);
    }

    #[test]
    fn test_activity_check_fathoms_infeasible() {
        // x0 + x1 >= 3 over binaries is infeasible at the root.
        let a = CsMat::new_csc((1, 2), vec![0, 1, 2], vec![0, 0], vec![1.0, 1.0]);
        let problem = Problem::new(
            Objective::Linear { l: vec![1.0, 1.0] },
            ConstraintSet::Linear {
                a,
                lo: vec![3.0],
                up: vec![f64::INFINITY],
            },
            VariableSet::new(vec![0.0, 0.0], vec![1.0, 1.0])
                .unwrap()
                .with_discrete(vec![0, 1])
                .unwrap(),
        )
        .unwrap();
        let mut h = Harness::new(SearchContext::new(problem));
        let root = Node::root(&h.ctx.problem.variables);
        let disp = h.expand(root);
        assert_eq!(disp, Disposition::Infeasible);
        assert_eq!(h.queue.len(), 0);
    }

    #[test]
    fn test_objective_cutoff_fathoms() {
        let ctx = knapsack_ctx();
        let mut h = Harness::new(ctx);
        h.settings.objective_cutoff = -2.0;

        // Root relaxation solves to -1.5 >= cutoff -> fathomed.
        let root = Node::root(&h.ctx.problem.variables);
        let disp = h.expand(root);
        assert_eq!(disp, Disposition::Cutoff);
    }

    #[test]
    fn test_deferred_pseudo_cost_observation() {
        let ctx = knapsack_ctx();
        let mut h = Harness::new(ctx);
        let root = Node::root(&h.ctx.problem.variables);
        assert_eq!(h.expand(root), Disposition::Branched);
        h.observations.clear();

        // Expanding a child realizes the observation against the parent
        // objective recorded at creation.
        let child = h.queue.pop_best().unwrap();
        assert!(child.branch.is_some());
        h.expand(child);
        assert!(!h.observations.is_empty());
    }
}
