//! Inter-worker message protocol.
//!
//! Every worker owns an inbox; the coordinator (worker 0) owns the
//! canonical status and brokers work stealing. Nodes travel as typed
//! values here; the flat-double encoding in [`crate::serial`] is the
//! machine-boundary format for the same payloads.

use crossbeam_channel::Sender;

use crate::model::Description;
use crate::search::{Node, Observation, PseudoCosts};

/// Cumulative progress report from one worker.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    /// Reporting worker id.
    pub worker: usize,
    /// Min of the worker's queued relaxation objectives (`+inf` when its
    /// queue is empty).
    pub local_lob: f64,
    /// Queue length after the last expansion.
    pub queue_len: usize,
    /// The worker found its queue empty and is waiting for work.
    pub idle: bool,
    /// Nodes expanded so far (cumulative).
    pub explored: u64,
    /// Nodes fathomed so far (cumulative).
    pub fathomed: u64,
    /// Nodes branched so far (cumulative).
    pub branched: u64,
    /// Nodes received from pushes and donations (cumulative). The
    /// coordinator compares this against what it knows was shipped, so
    /// an in-flight node can never be mistaken for an exhausted tree.
    pub received: u64,
    /// Final report before the worker exits.
    pub done: bool,
}

impl WorkerReport {
    /// A fresh (all-zero, busy) report for worker `worker`.
    pub fn initial(worker: usize) -> Self {
        Self {
            worker,
            local_lob: f64::INFINITY,
            queue_len: 0,
            idle: false,
            explored: 0,
            fathomed: 0,
            branched: 0,
            received: 0,
            done: false,
        }
    }
}

/// Protocol messages.
#[derive(Debug, Clone)]
pub enum Message {
    /// Coordinator -> peers: root is solved, here are the seeded
    /// pseudo-costs; enter the run loop.
    Start(PseudoCosts),

    /// Hand a single node to a worker.
    NodePush(Box<Node>),

    /// Request up to `count` nodes; `thief` is the starving worker.
    NodeSteal {
        /// Worker asking for nodes.
        thief: usize,
        /// Upper bound on the batch size.
        count: usize,
    },

    /// Donated nodes, shipped directly to the thief.
    NodeBatch(Vec<Node>),

    /// Fresh pseudo-cost observations for merging.
    PseudoCostUpdate {
        /// Worker that made the observations (they are already applied
        /// there; the coordinator forwards to everyone else).
        from: usize,
        /// The observation batch.
        observations: Vec<Observation>,
    },

    /// Periodic progress report to the coordinator.
    StatusUpdate(WorkerReport),

    /// Coordinator -> everyone: the run is over.
    Terminate(Description),

    /// Steal bookkeeping: a donor reports how many nodes it shipped, or
    /// the coordinator tells a thief that nothing was available
    /// (`donated == 0`).
    Ack {
        /// Sender of the acknowledgement.
        from: usize,
        /// Nodes shipped as a result of the steal request.
        donated: usize,
    },
}

/// Send half of every worker's inbox, indexed by worker id.
#[derive(Clone)]
pub struct Router {
    senders: Vec<Sender<Message>>,
}

impl Router {
    /// Build a router over the inbox senders.
    pub fn new(senders: Vec<Sender<Message>>) -> Self {
        Self { senders }
    }

    /// Number of workers.
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    /// True for a single-worker run.
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// Send to one worker. Failures mean the receiver already exited,
    /// which only happens during shutdown; they are logged and dropped.
    pub fn send(&self, to: usize, message: Message) {
        if let Err(err) = self.senders[to].send(message) {
            log::debug!("worker {} inbox closed: {}", to, err);
        }
    }

    /// Send to every worker except `from`.
    pub fn broadcast_others(&self, from: usize, message: Message) {
        for (id, sender) in self.senders.iter().enumerate() {
            if id == from {
                continue;
            }
            if let Err(err) = sender.send(message.clone()) {
                log::debug!("worker {} inbox closed: {}", id, err);
            }
        }
    }
}
