//! Multi-worker coordination: shared state, messages, run loops.

mod coordinator;
mod message;
mod shared;
mod worker;

pub use coordinator::{run_coordinator, RunOutcome};
pub use message::{Message, Router, WorkerReport};
pub use shared::SharedState;
pub use worker::{run_peer, WorkerCtx};
