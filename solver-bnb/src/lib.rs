//! Parallel branch-and-bound engine for mixed-integer quadratic and
//! linear programs.
//!
//! Problems take the form
//!
//! ```text
//! minimize    0.5 x' Q x + L' x
//! subject to  cns_lo <= A x <= cns_up
//!             var_lo <=   x <= var_up
//!             x[i] integral            for i in the discrete set
//!             at most one j in G non-zero   for every SOS1 group G
//! ```
//!
//! with `Q` symmetric positive semidefinite. The engine runs a
//! best-first (configurable) branch-and-bound search over the continuous
//! relaxations, learning pseudo-costs as it goes, and either proves
//! optimality, proves infeasibility, or returns the best solution found
//! within the resource limits.
//!
//! Relaxations are solved through the [`relax::SubWorkspace`] contract;
//! the bundled backend is the dense ADMM solver from `solver-qp`.
//! Parallel runs spawn one worker per [`Settings::num_workers`], each
//! exclusively owning its subsolver workspace, with worker 0
//! coordinating bounds, work stealing and termination over message
//! channels.
//!
//! # Example
//!
//! ```
//! use solver_bnb::{
//!     ConstraintSet, Engine, Objective, Problem, Settings, VariableSet,
//! };
//! use sprs::CsMat;
//!
//! // min -x0 - x1  s.t.  x0 + x1 <= 1.5,  x binary  ->  optimum -1.
//! let a = CsMat::new_csc((1, 2), vec![0, 1, 2], vec![0, 0], vec![1.0, 1.0]);
//! let problem = Problem::new(
//!     Objective::Linear { l: vec![-1.0, -1.0] },
//!     ConstraintSet::Linear {
//!         a,
//!         lo: vec![f64::NEG_INFINITY],
//!         up: vec![1.5],
//!     },
//!     VariableSet::new(vec![0.0, 0.0], vec![1.0, 1.0])
//!         .unwrap()
//!         .with_discrete(vec![0, 1])
//!         .unwrap(),
//! )
//! .unwrap();
//!
//! let mut engine = Engine::setup(problem, Settings::default()).unwrap();
//! let status = engine.solve().unwrap();
//! assert_eq!(status.description.as_str(), "optimalSolutionFound");
//! assert!((status.obj_upb + 1.0).abs() < 1e-4);
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod model;
pub mod parallel;
pub mod relax;
pub mod search;
pub mod serial;
pub mod settings;

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::unbounded;

pub use error::{EngineError, EngineResult};
pub use model::{
    ConstraintSet, Description, Objective, Problem, Status, VariableSet,
};
pub use serial::{SerialArchive, SerialData};
pub use settings::{
    BranchRule, PriorityRule, PseudoCostInit, Settings, SubSolverKind,
};
pub use solver_qp::QpSettings;

use parallel::{run_coordinator, run_peer, Router, SharedState, WorkerCtx};
use search::SearchContext;

/// An engine workspace: one problem, one settings bundle, one run.
pub struct Engine {
    sc: Arc<SearchContext>,
    settings: Settings,
    status: Status,
    best: Option<Vec<f64>>,
}

impl Engine {
    /// Validate the problem and settings and build a workspace.
    ///
    /// Rejects dimensional mismatches and singleton SOS1 groups
    /// (`SetupError`), and non-finite or non-PSD objective data
    /// (`NumericalError`).
    pub fn setup(problem: Problem, settings: Settings) -> EngineResult<Self> {
        settings.validate()?;
        problem.validate_numerics()?;
        Ok(Self {
            sc: Arc::new(SearchContext::new(problem)),
            settings,
            status: Status::new(),
            best: None,
        })
    }

    /// Run the search to termination.
    ///
    /// Always produces a [`Status`]; the description distinguishes an
    /// optimal exit from infeasibility and interruption. Only fatal
    /// conditions (worker spawn failure, backend setup failure) surface
    /// as errors.
    pub fn solve(&mut self) -> EngineResult<Status> {
        let start = Instant::now();
        self.status = Status::new();
        self.status.description = Description::Running;

        let n = self.settings.num_workers.max(1);
        let shared = Arc::new(SharedState::new());

        // Build every workspace up front so backend setup errors surface
        // before any thread exists.
        let mut workspaces = Vec::with_capacity(n);
        for _ in 0..n {
            workspaces.push(relax::build(
                self.settings.subsolver,
                &self.sc.problem,
                &self.settings.qp,
            )?);
        }

        let (senders, mut receivers): (Vec<_>, Vec<_>) =
            (0..n).map(|_| unbounded()).map(|(s, r)| (s, Some(r))).unzip();
        let router = Router::new(senders);

        let make_ctx = |id: usize,
                        inbox,
                        workspace,
                        sc: &Arc<SearchContext>,
                        shared: &Arc<SharedState>,
                        settings: &Settings,
                        router: &Router| WorkerCtx {
            id,
            settings: settings.clone(),
            sc: Arc::clone(sc),
            shared: Arc::clone(shared),
            inbox,
            router: router.clone(),
            workspace,
            start,
        };

        let outcome = std::thread::scope(|scope| -> EngineResult<parallel::RunOutcome> {
            let mut peer_workspaces = workspaces.split_off(1);
            let coordinator_ws = workspaces.pop().ok_or_else(|| {
                EngineError::Resource("no workspace for the coordinator".into())
            })?;
            let coordinator_inbox = receivers[0].take().ok_or_else(|| {
                EngineError::Resource("coordinator inbox already taken".into())
            })?;

            for id in (1..n).rev() {
                let inbox = receivers[id].take().ok_or_else(|| {
                    EngineError::Resource("worker inbox already taken".into())
                })?;
                let workspace = peer_workspaces.pop().ok_or_else(|| {
                    EngineError::Resource("missing peer workspace".into())
                })?;
                let ctx = make_ctx(
                    id,
                    inbox,
                    workspace,
                    &self.sc,
                    &shared,
                    &self.settings,
                    &router,
                );
                std::thread::Builder::new()
                    .name(format!("bnb-worker-{}", id))
                    .spawn_scoped(scope, move || run_peer(ctx))
                    .map_err(|e| {
                        // Already-spawned peers poll the stop flag while
                        // waiting for Start, so the scope can still join.
                        shared.request_stop();
                        EngineError::Resource(format!("worker spawn: {}", e))
                    })?;
            }

            let ctx = make_ctx(
                0,
                coordinator_inbox,
                coordinator_ws,
                &self.sc,
                &shared,
                &self.settings,
                &router,
            );
            Ok(run_coordinator(ctx))
        })?;

        self.status.description = outcome.description;
        self.status.obj_lob = outcome.obj_lob;
        self.status.obj_upb = outcome.obj_upb;
        self.status.nodes_explored = outcome.nodes_explored;
        self.status.total_time = start.elapsed().as_secs_f64();
        self.best = shared.incumbent().map(|(x, _)| x);

        if self.settings.verbose {
            self.print_status();
        }
        Ok(self.status.clone())
    }

    /// The current status snapshot.
    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Print a short status summary to stdout.
    pub fn print_status(&self) {
        println!("status       : {}", self.status.description);
        println!("objLoB       : {:.6e}", self.status.obj_lob);
        println!("objUpB       : {:.6e}", self.status.obj_upb);
        println!("absolute gap : {:.3e}", self.status.absolute_gap());
        println!("relative gap : {:.3e}", self.status.relative_gap());
        println!("nodes        : {}", self.status.nodes_explored);
        println!("time         : {:.3}s", self.status.total_time);
    }

    /// The incumbent primal assignment, if one was found.
    pub fn best_solution(&self) -> Option<&[f64]> {
        self.best.as_deref()
    }

    /// Nodes expanded across all workers.
    pub fn nodes_explored(&self) -> u64 {
        self.status.nodes_explored
    }

    /// Best proven lower bound.
    pub fn obj_lob(&self) -> f64 {
        self.status.obj_lob
    }

    /// Objective of the incumbent (`+inf` when none).
    pub fn obj_upb(&self) -> f64 {
        self.status.obj_upb
    }

    /// The problem this workspace was built for.
    pub fn problem(&self) -> &Problem {
        &self.sc.problem
    }
}

/// One-call convenience: setup, solve, return status and best solution.
pub fn solve_miqp(
    problem: Problem,
    settings: Settings,
) -> EngineResult<(Status, Option<Vec<f64>>)> {
    let mut engine = Engine::setup(problem, settings)?;
    let status = engine.solve()?;
    let best = engine.best.take();
    Ok((status, best))
}
