//! Configuration settings for the branch-and-bound engine.

use solver_qp::QpSettings;

use crate::error::{EngineError, EngineResult};

/// Node selection (queue priority) rule.
///
/// The queue pops the node with the smallest score; each rule defines how
/// that score is computed at insertion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PriorityRule {
    /// Score by relaxation objective: explore the best lower bound first.
    #[default]
    BestFirst,

    /// Score by negated depth: minimizes the live-set memory footprint.
    DepthFirst,

    /// Alias of [`PriorityRule::BestFirst`] kept for callers that think
    /// in terms of the global dual bound.
    BestBound,

    /// Score by objective plus the pseudo-cost estimate of the remaining
    /// integrality violations.
    PseudoCost,
}

/// Branching variable selection rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BranchRule {
    /// Select the variable with fractional part closest to one half.
    #[default]
    MostFractional,

    /// Use learned pseudo-cost estimates; variables without observations
    /// fall back to most-fractional.
    PseudoCost,

    /// Solve both children of the top candidates and pick the variable
    /// with the best worst-side improvement.
    StrongBranching {
        /// Number of fractional candidates to evaluate.
        candidates: usize,
    },
}

/// Pseudo-cost initialization strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PseudoCostInit {
    /// Fill with a small positive constant.
    #[default]
    Uniform,

    /// One strong-branching sweep at the root seeds the estimates.
    StrongBranching,

    /// Use most-fractional branching until each candidate variable has
    /// accumulated enough observations.
    Reliable,
}

/// Continuous relaxation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum SubSolverKind {
    /// The bundled dense ADMM solver from `solver-qp`.
    #[default]
    Admm,
}

/// Engine settings.
#[derive(Debug, Clone)]
pub struct Settings {
    // === Termination ===
    /// Stop when `obj_upb - obj_lob` drops below this value.
    pub absolute_gap_tolerance: f64,

    /// Stop when the gap relative to `|obj_upb|` drops below this value.
    pub relative_gap_tolerance: f64,

    /// Prove infeasibility of anything better than this objective value.
    /// Nodes with a certified bound at or above it are fathomed.
    pub objective_cutoff: f64,

    /// Wall-clock limit in milliseconds (`None` = unlimited).
    pub time_limit_ms: Option<u64>,

    /// Maximum number of nodes to expand across all workers.
    pub max_nodes: u64,

    // === Feasibility tolerances ===
    /// A variable counts as integral when within this distance of an
    /// integer.
    pub integer_tolerance: f64,

    /// Primal feasibility tolerance, also the non-zero threshold for
    /// SOS1 violation checks.
    pub primal_tolerance: f64,

    // === Search strategy ===
    /// Node selection rule.
    pub priority_rule: PriorityRule,

    /// Branching variable rule.
    pub branch_rule: BranchRule,

    /// Pseudo-cost initialization.
    pub pseudo_cost_init: PseudoCostInit,

    /// Blend coefficient for the pseudo-cost queue score.
    pub pseudo_cost_weight: f64,

    /// Observations per direction before a variable's pseudo-costs count
    /// as reliable.
    pub reliability_threshold: u64,

    /// Branch on violated SOS1 groups before fractional variables.
    pub sos1_priority: bool,

    // === Parallelism ===
    /// Number of workers. Worker 0 doubles as the coordinator.
    pub num_workers: usize,

    /// A donor only ships nodes to a starving peer while holding at
    /// least this many.
    pub steal_threshold: usize,

    // === Subsolver ===
    /// Relaxation backend selection.
    pub subsolver: SubSolverKind,

    /// Settings forwarded to the relaxation backend.
    pub qp: QpSettings,

    // === Output ===
    /// Emit progress lines while solving.
    pub verbose: bool,

    /// Log every N nodes (per worker).
    pub log_freq: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            absolute_gap_tolerance: 1e-6,
            relative_gap_tolerance: 1e-4,
            objective_cutoff: f64::INFINITY,
            time_limit_ms: None,
            max_nodes: 1_000_000,
            integer_tolerance: 1e-5,
            primal_tolerance: 1e-6,
            priority_rule: PriorityRule::default(),
            branch_rule: BranchRule::default(),
            pseudo_cost_init: PseudoCostInit::default(),
            pseudo_cost_weight: 1.0,
            reliability_threshold: 4,
            sos1_priority: true,
            num_workers: 1,
            steal_threshold: 4,
            subsolver: SubSolverKind::default(),
            qp: QpSettings::default(),
            verbose: false,
            log_freq: 100,
        }
    }
}

impl Settings {
    /// Settings with progress output on every node.
    pub fn verbose() -> Self {
        Self {
            verbose: true,
            log_freq: 1,
            ..Default::default()
        }
    }

    /// Set the wall-clock limit in seconds.
    pub fn with_time_limit(mut self, seconds: f64) -> Self {
        self.time_limit_ms = Some((seconds * 1000.0) as u64);
        self
    }

    /// Set the node limit.
    pub fn with_max_nodes(mut self, nodes: u64) -> Self {
        self.max_nodes = nodes;
        self
    }

    /// Set the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.num_workers = workers;
        self
    }

    /// Set the branching rule.
    pub fn with_branch_rule(mut self, rule: BranchRule) -> Self {
        self.branch_rule = rule;
        self
    }

    /// Set the node selection rule.
    pub fn with_priority_rule(mut self, rule: PriorityRule) -> Self {
        self.priority_rule = rule;
        self
    }

    /// Reject nonsensical combinations before the search starts.
    pub fn validate(&self) -> EngineResult<()> {
        if self.num_workers == 0 {
            return Err(EngineError::Setup("num_workers must be at least 1".into()));
        }
        if !(self.absolute_gap_tolerance >= 0.0) || !(self.relative_gap_tolerance >= 0.0) {
            return Err(EngineError::Setup("gap tolerances must be non-negative".into()));
        }
        if !(self.integer_tolerance > 0.0) || self.integer_tolerance >= 0.5 {
            return Err(EngineError::Setup(
                "integer_tolerance must lie in (0, 0.5)".into(),
            ));
        }
        if !(self.primal_tolerance > 0.0) {
            return Err(EngineError::Setup("primal_tolerance must be positive".into()));
        }
        if self.objective_cutoff.is_nan() {
            return Err(EngineError::Setup("objective_cutoff is NaN".into()));
        }
        if let BranchRule::StrongBranching { candidates } = self.branch_rule {
            if candidates == 0 {
                return Err(EngineError::Setup(
                    "strong branching needs at least one candidate".into(),
                ));
            }
        }
        Ok(())
    }
}
