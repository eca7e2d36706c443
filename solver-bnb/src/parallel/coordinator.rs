//! Coordinator (worker 0): root solve, bound aggregation, steal
//! brokering, termination.

use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;

use crate::model::Description;
use crate::parallel::message::{Message, WorkerReport};
use crate::parallel::worker::{WorkerCore, WorkerCtx};
use crate::search::{solve_relaxation, Node, PseudoCosts};
use crate::settings::PseudoCostInit;

/// Aggregated outcome of a run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Exit disposition.
    pub description: Description,
    /// Final lower bound.
    pub obj_lob: f64,
    /// Final upper bound.
    pub obj_upb: f64,
    /// Total nodes expanded across all workers.
    pub nodes_explored: u64,
}

/// Coordinator-side bookkeeping of the worker fleet.
struct Fleet {
    /// Latest cumulative report per worker (0 = coordinator itself).
    reports: Vec<WorkerReport>,
    /// Nodes shipped to each worker (pushes and brokered donations).
    sent_to: Vec<u64>,
    /// Outstanding steal transactions as `(donor, thief)` pairs.
    pending_steals: Vec<(usize, usize)>,
}

impl Fleet {
    fn new(n: usize) -> Self {
        Self {
            reports: (0..n).map(WorkerReport::initial).collect(),
            sent_to: vec![0; n],
            pending_steals: Vec::new(),
        }
    }

    /// True when every queue is empty, every worker idles, no steal is
    /// in flight and every shipped node has been received.
    fn exhausted(&self) -> bool {
        self.pending_steals.is_empty()
            && self
                .reports
                .iter()
                .zip(&self.sent_to)
                .all(|(r, &sent)| r.idle && r.queue_len == 0 && r.received >= sent)
    }

    /// Some shipped node has not yet surfaced in its receiver's report,
    /// or a steal transaction is still open. Queue aggregates taken in
    /// this state may miss a live subtree.
    fn in_flight(&self) -> bool {
        !self.pending_steals.is_empty()
            || self
                .reports
                .iter()
                .zip(&self.sent_to)
                .any(|(r, &sent)| r.received < sent)
    }

    /// Minimum local lower bound over the fleet.
    fn aggregate_lob(&self) -> f64 {
        self.reports
            .iter()
            .map(|r| r.local_lob)
            .fold(f64::INFINITY, f64::min)
    }

    fn total_explored(&self) -> u64 {
        self.reports.iter().map(|r| r.explored).sum()
    }

    /// Best donor for a steal: the worker with the longest queue, at or
    /// above the threshold, excluding the thief.
    fn choose_donor(&self, thief: usize, threshold: usize) -> Option<usize> {
        self.reports
            .iter()
            .enumerate()
            .filter(|(id, r)| *id != thief && r.queue_len >= threshold.max(1))
            .max_by_key(|(_, r)| r.queue_len)
            .map(|(id, _)| id)
    }
}

/// Run worker 0: solve the root, seed and broadcast pseudo-costs, then
/// participate in the search while aggregating the fleet.
pub fn run_coordinator(ctx: WorkerCtx) -> RunOutcome {
    let mut core = WorkerCore::new(ctx);
    let n = core.router.len();
    let mut fleet = Fleet::new(n);
    let mut own_awaiting_steal = false;

    // Pseudo-costs carried on the variable set override the init rule.
    let carried = core
        .sc
        .problem
        .variables
        .pseudo_costs()
        .and_then(|(c, cnt)| PseudoCosts::from_raw(c, cnt).ok())
        .filter(|p| p.len() == core.sc.discrete.len());
    let have_carry = carried.is_some();
    if let Some(carried) = carried {
        core.pseudo = carried;
    }

    // Root phase: solved here before any peer starts.
    let root = Node::root(&core.sc.problem.variables);
    if core.settings.pseudo_cost_init == PseudoCostInit::StrongBranching && !have_carry {
        let mut probe = root.clone();
        let time_left = core.time_left();
        if !core.sc.problem.constraints.provably_infeasible(
            &probe.branch_lo,
            &probe.branch_up,
            core.settings.primal_tolerance,
        ) && solve_relaxation(
            &mut probe,
            &core.sc,
            &core.settings,
            core.workspace.as_mut(),
            time_left,
        ) {
            core.selector.seed_from_root(
                &probe,
                &core.sc,
                &mut core.pseudo,
                core.workspace.as_mut(),
                &mut core.observations,
                time_left,
            );
            core.observations.clear();
        }
    }

    if n > 1 {
        core.router
            .broadcast_others(0, Message::Start(core.pseudo.clone()));
    }

    // Expand the root (warm-started when the seeding sweep ran) and
    // spread the first children over the fleet.
    let _ = core.expand_one(root);
    broadcast_observations(&mut core);
    if n > 1 {
        let mut initial = Vec::new();
        while let Some(node) = core.queue.pop_best() {
            initial.push(node);
        }
        for (k, node) in initial.into_iter().enumerate() {
            let target = k % n;
            if target == 0 {
                core.queue.push(node, &core.pseudo, &core.sc.discrete);
            } else {
                fleet.sent_to[target] += 1;
                core.router.send(target, Message::NodePush(Box::new(node)));
            }
        }
    }
    fleet.reports[0] = core.report(core.queue.is_empty(), false);

    // Main loop.
    let description = loop {
        loop {
            match core.inbox.try_recv() {
                Ok(msg) => {
                    if handle_coordinator(&mut core, &mut fleet, &mut own_awaiting_steal, msg) {
                        fleet.reports[0] = core.report(core.queue.is_empty(), false);
                    }
                }
                Err(_) => break,
            }
        }

        if let Some(desc) = check_termination(&core, &fleet) {
            break desc;
        }

        match core.queue.pop_best() {
            Some(node) => {
                let _ = core.expand_one(node);
                broadcast_observations(&mut core);
                fleet.reports[0] = core.report(false, false);
                core.log_progress();
            }
            None => {
                fleet.reports[0] = core.report(true, false);
                if n > 1 {
                    if !own_awaiting_steal {
                        if let Some(donor) =
                            fleet.choose_donor(0, core.settings.steal_threshold)
                        {
                            core.router.send(
                                donor,
                                Message::NodeSteal {
                                    thief: 0,
                                    count: usize::MAX,
                                },
                            );
                            fleet.pending_steals.push((donor, 0));
                            own_awaiting_steal = true;
                        }
                    }
                    match core.inbox.recv_timeout(Duration::from_millis(5)) {
                        Ok(msg) => {
                            if handle_coordinator(
                                &mut core,
                                &mut fleet,
                                &mut own_awaiting_steal,
                                msg,
                            ) {
                                fleet.reports[0] =
                                    core.report(core.queue.is_empty(), false);
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => {
                            break Description::Interrupted
                        }
                    }
                }
            }
        }
    };

    finalize(&mut core, &mut fleet, description)
}

/// Coordinator-side message handling. Returns true when the own report
/// entry should be refreshed (the queue changed).
fn handle_coordinator(
    core: &mut WorkerCore,
    fleet: &mut Fleet,
    own_awaiting_steal: &mut bool,
    msg: Message,
) -> bool {
    match msg {
        Message::StatusUpdate(report) => {
            let id = report.worker;
            if id < fleet.reports.len() {
                fleet.reports[id] = report;
            }
            false
        }
        Message::PseudoCostUpdate { from, observations } => {
            for obs in &observations {
                core.pseudo.record(obs);
            }
            if core.router.len() > 2 {
                for id in 1..core.router.len() {
                    if id != from {
                        core.router.send(
                            id,
                            Message::PseudoCostUpdate {
                                from,
                                observations: observations.clone(),
                            },
                        );
                    }
                }
            }
            false
        }
        Message::NodeSteal { thief, count } => {
            match fleet.choose_donor(thief, core.settings.steal_threshold) {
                Some(0) => {
                    // Donate from the coordinator's own queue.
                    let donated = core.donate(thief, count);
                    if donated > 0 {
                        fleet.sent_to[thief] += donated as u64;
                        fleet.reports[thief].idle = false;
                    }
                    true
                }
                Some(donor) => {
                    core.router.send(donor, Message::NodeSteal { thief, count });
                    fleet.pending_steals.push((donor, thief));
                    false
                }
                None => {
                    core.router.send(
                        thief,
                        Message::Ack {
                            from: 0,
                            donated: 0,
                        },
                    );
                    false
                }
            }
        }
        Message::Ack { from, donated } => {
            if let Some(pos) = fleet
                .pending_steals
                .iter()
                .position(|&(donor, _)| donor == from)
            {
                let (_, thief) = fleet.pending_steals.remove(pos);
                if donated > 0 {
                    fleet.sent_to[thief] += donated as u64;
                    if thief != 0 {
                        fleet.reports[thief].idle = false;
                    }
                } else if thief != 0 {
                    // Let the thief know it came back empty so it can
                    // ask again later.
                    core.router.send(
                        thief,
                        Message::Ack {
                            from: 0,
                            donated: 0,
                        },
                    );
                }
                if thief == 0 {
                    *own_awaiting_steal = false;
                }
            }
            false
        }
        Message::NodePush(node) => {
            core.accept_node(*node);
            *own_awaiting_steal = false;
            true
        }
        Message::NodeBatch(nodes) => {
            for node in nodes {
                core.accept_node(node);
            }
            *own_awaiting_steal = false;
            true
        }
        Message::Start(_) | Message::Terminate(_) => false,
    }
}

/// Aggregate bounds and decide whether the run is over.
fn check_termination(core: &WorkerCore, fleet: &Fleet) -> Option<Description> {
    let settings = &core.settings;
    let shared = &core.shared;
    let upb = shared.obj_upb();
    let exhausted = fleet.exhausted();

    if exhausted {
        if upb.is_finite() {
            // The whole tree is fathomed: the incumbent is the optimum.
            shared.raise_lob(upb);
        }
    } else if !fleet.in_flight() {
        // A queue aggregate is only a valid tree bound when every live
        // node is sitting in some queue.
        let agg = fleet.aggregate_lob();
        if agg.is_finite() {
            shared.raise_lob(agg.min(upb));
        }
    }
    let lob = shared.obj_lob();

    if lob >= settings.objective_cutoff {
        return Some(Description::Infeasible);
    }
    if upb.is_finite() && lob.is_finite() {
        let absolute = upb - lob;
        let relative = absolute / upb.abs().max(1e-10);
        if absolute <= settings.absolute_gap_tolerance
            || relative <= settings.relative_gap_tolerance
        {
            return Some(Description::OptimalSolutionFound);
        }
    }
    if exhausted {
        return Some(if upb.is_finite() {
            Description::OptimalSolutionFound
        } else {
            Description::Infeasible
        });
    }
    if let Some(limit) = settings.time_limit_ms {
        if core.start.elapsed() >= Duration::from_millis(limit) {
            return Some(Description::Interrupted);
        }
    }
    if fleet.total_explored() >= settings.max_nodes {
        return Some(Description::Interrupted);
    }
    None
}

fn broadcast_observations(core: &mut WorkerCore) {
    if core.observations.is_empty() {
        return;
    }
    let observations = std::mem::take(&mut core.observations);
    if core.router.len() > 1 {
        core.router.broadcast_others(
            0,
            Message::PseudoCostUpdate {
                from: 0,
                observations,
            },
        );
    }
}

/// Stop the fleet, collect final reports and aggregate the outcome.
fn finalize(core: &mut WorkerCore, fleet: &mut Fleet, description: Description) -> RunOutcome {
    core.shared.request_stop();
    let n = core.router.len();
    if n > 1 {
        core.router
            .broadcast_others(0, Message::Terminate(description));

        let deadline = Instant::now() + Duration::from_secs(10);
        let mut done = vec![false; n];
        done[0] = true;
        while done.iter().any(|d| !d) && Instant::now() < deadline {
            match core.inbox.recv_timeout(Duration::from_millis(50)) {
                Ok(Message::StatusUpdate(report)) => {
                    let id = report.worker;
                    if id < n {
                        if report.done {
                            done[id] = true;
                        }
                        fleet.reports[id] = report;
                    }
                }
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }
    fleet.reports[0] = core.report(true, true);

    let upb = core.shared.obj_upb();
    let obj_lob = core.shared.obj_lob().min(upb);
    RunOutcome {
        description,
        obj_lob,
        obj_upb: upb,
        nodes_explored: fleet.total_explored(),
    }
}
