//! Worker machinery and the peer run loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::parallel::message::{Message, Router, WorkerReport};
use crate::parallel::shared::SharedState;
use crate::relax::SubWorkspace;
use crate::search::{
    branch_and_solve, BranchSelector, Disposition, ExpandState, Node, NodeQueue, Observation,
    PseudoCosts, SearchContext, SearchStats,
};
use crate::settings::Settings;

/// Everything a worker needs, assembled by the engine before spawning.
pub struct WorkerCtx {
    /// Worker id; 0 is the coordinator.
    pub id: usize,
    /// Engine settings.
    pub settings: Settings,
    /// Shared run context.
    pub sc: Arc<SearchContext>,
    /// Shared bounds, incumbent, stop flag.
    pub shared: Arc<SharedState>,
    /// This worker's inbox.
    pub inbox: Receiver<Message>,
    /// Send half of every inbox.
    pub router: Router,
    /// This worker's exclusively owned relaxation backend.
    pub workspace: Box<dyn SubWorkspace>,
    /// Solve start, for time-limit accounting.
    pub start: Instant,
}

/// Control-flow outcome of handling one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    /// Keep going.
    Continue,
    /// Terminate was received.
    Stop,
    /// Nodes arrived; a pending steal request is satisfied.
    GotNodes,
    /// A steal request came back empty.
    NoNodes,
}

/// Per-worker state for the run loop, shared between peers and the
/// coordinator.
pub(crate) struct WorkerCore {
    pub id: usize,
    pub settings: Settings,
    pub sc: Arc<SearchContext>,
    pub shared: Arc<SharedState>,
    pub inbox: Receiver<Message>,
    pub router: Router,
    pub workspace: Box<dyn SubWorkspace>,
    pub start: Instant,
    pub queue: NodeQueue,
    pub pseudo: PseudoCosts,
    pub selector: BranchSelector,
    pub stats: SearchStats,
    pub observations: Vec<Observation>,
}

impl WorkerCore {
    pub fn new(ctx: WorkerCtx) -> Self {
        let queue = NodeQueue::new(
            ctx.settings.priority_rule,
            ctx.settings.pseudo_cost_weight,
            ctx.settings.integer_tolerance,
        );
        let pseudo = PseudoCosts::uniform(ctx.sc.discrete.len());
        let selector = BranchSelector::new(&ctx.settings);
        Self {
            id: ctx.id,
            queue,
            pseudo,
            selector,
            stats: SearchStats::default(),
            observations: Vec::new(),
            settings: ctx.settings,
            sc: ctx.sc,
            shared: ctx.shared,
            inbox: ctx.inbox,
            router: ctx.router,
            workspace: ctx.workspace,
            start: ctx.start,
        }
    }

    /// Remaining wall-clock budget, if a time limit is set.
    pub fn time_left(&self) -> Option<Duration> {
        self.settings.time_limit_ms.map(|ms| {
            Duration::from_millis(ms).saturating_sub(self.start.elapsed())
        })
    }

    /// Expand one node through branch-and-solve.
    pub fn expand_one(&mut self, node: Node) -> Disposition {
        let time_left = self.time_left();
        let mut state = ExpandState {
            ctx: &self.sc,
            settings: &self.settings,
            selector: &self.selector,
            workspace: self.workspace.as_mut(),
            pseudo: &mut self.pseudo,
            queue: &mut self.queue,
            shared: &self.shared,
            observations: &mut self.observations,
            stats: &mut self.stats,
        };
        branch_and_solve(&mut state, node, time_left)
    }

    /// Cumulative progress report.
    pub fn report(&self, idle: bool, done: bool) -> WorkerReport {
        WorkerReport {
            worker: self.id,
            local_lob: self.queue.best_objective(),
            queue_len: self.queue.len(),
            idle,
            explored: self.stats.explored,
            fathomed: self.stats.fathomed,
            branched: self.stats.branched,
            received: self.stats.received,
            done,
        }
    }

    /// Ship the queued observation batch to the coordinator.
    pub fn flush_observations(&mut self) {
        if self.observations.is_empty() {
            return;
        }
        if self.router.len() > 1 && self.id != 0 {
            let observations = std::mem::take(&mut self.observations);
            self.router.send(
                0,
                Message::PseudoCostUpdate {
                    from: self.id,
                    observations,
                },
            );
        } else {
            self.observations.clear();
        }
    }

    /// Answer a steal request: ship the worst half of the queue to the
    /// thief and acknowledge the coordinator either way.
    pub fn donate(&mut self, thief: usize, count: usize) -> usize {
        let batch = if self.queue.len() >= self.settings.steal_threshold {
            self.queue.split_worst_half(count)
        } else {
            Vec::new()
        };
        let donated = batch.len();
        if donated > 0 {
            self.stats.donated += donated as u64;
            log::debug!("worker {} donates {} nodes to {}", self.id, donated, thief);
            self.router.send(thief, Message::NodeBatch(batch));
        }
        self.router.send(
            0,
            Message::Ack {
                from: self.id,
                donated,
            },
        );
        donated
    }

    /// Enqueue a received node.
    pub fn accept_node(&mut self, node: Node) {
        self.stats.received += 1;
        self.queue.push(node, &self.pseudo, &self.sc.discrete);
    }

    /// Common message handling; coordinator-specific bookkeeping wraps
    /// this.
    pub fn handle(&mut self, msg: Message) -> Flow {
        match msg {
            Message::Start(pseudo) => {
                self.pseudo = pseudo;
                Flow::Continue
            }
            Message::NodePush(node) => {
                self.accept_node(*node);
                Flow::GotNodes
            }
            Message::NodeBatch(nodes) => {
                for node in nodes {
                    self.accept_node(node);
                }
                Flow::GotNodes
            }
            Message::PseudoCostUpdate { observations, .. } => {
                for obs in &observations {
                    self.pseudo.record(obs);
                }
                Flow::Continue
            }
            Message::NodeSteal { thief, count } => {
                self.donate(thief, count);
                Flow::Continue
            }
            Message::StatusUpdate(_) => Flow::Continue,
            Message::Ack { donated, .. } => {
                if donated == 0 {
                    Flow::NoNodes
                } else {
                    Flow::Continue
                }
            }
            Message::Terminate(_) => Flow::Stop,
        }
    }

    /// One-line progress report.
    pub fn log_progress(&self) {
        if !self.settings.verbose || self.settings.log_freq == 0 {
            return;
        }
        if self.stats.explored % self.settings.log_freq != 0 {
            return;
        }
        log::info!(
            "worker {} | nodes: {} ({} open) | lob: {:.6e} | upb: {:.6e} | time: {:.1}s",
            self.id,
            self.stats.explored,
            self.queue.len(),
            self.queue.best_objective().min(self.shared.obj_lob()),
            self.shared.obj_upb(),
            self.start.elapsed().as_secs_f64(),
        );
    }
}

/// Peer main loop (workers 1..N-1): wait for `Start`, then pull, expand
/// and publish until terminated.
pub fn run_peer(ctx: WorkerCtx) {
    let mut core = WorkerCore::new(ctx);

    // The root is solved on the coordinator before anyone else starts.
    let started = loop {
        match core.inbox.recv_timeout(Duration::from_millis(100)) {
            Ok(Message::Start(pseudo)) => {
                core.pseudo = pseudo;
                break true;
            }
            Ok(Message::Terminate(_)) => break false,
            Ok(msg) => {
                let _ = core.handle(msg);
            }
            Err(RecvTimeoutError::Timeout) => {
                if core.shared.stopped() {
                    break false;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break false,
        }
    };

    if started {
        peer_loop(&mut core);
    }
    let report = core.report(true, true);
    core.router.send(0, Message::StatusUpdate(report));
}

fn peer_loop(core: &mut WorkerCore) {
    let mut awaiting_steal = false;
    loop {
        while let Ok(msg) = core.inbox.try_recv() {
            match core.handle(msg) {
                Flow::Stop => return,
                Flow::GotNodes | Flow::NoNodes => awaiting_steal = false,
                Flow::Continue => {}
            }
        }
        if core.shared.stopped() {
            return;
        }

        match core.queue.pop_best() {
            Some(node) => {
                let _ = core.expand_one(node);
                core.flush_observations();
                let report = core.report(false, false);
                core.router.send(0, Message::StatusUpdate(report));
                core.log_progress();
            }
            None => {
                let report = core.report(true, false);
                core.router.send(0, Message::StatusUpdate(report));
                if !awaiting_steal {
                    core.router.send(
                        0,
                        Message::NodeSteal {
                            thief: core.id,
                            count: usize::MAX,
                        },
                    );
                    awaiting_steal = true;
                }
                match core.inbox.recv_timeout(Duration::from_millis(10)) {
                    Ok(msg) => match core.handle(msg) {
                        Flow::Stop => return,
                        Flow::GotNodes | Flow::NoNodes => awaiting_steal = false,
                        Flow::Continue => {}
                    },
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
        }
    }
}
