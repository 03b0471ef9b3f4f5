//! Application layer - wires the ledger, coordinator and read models together.
//!
//! - [`StationQueueCoordinator`]: compare-and-swap commits of joins and transitions
//! - [`QueueService`]: the operations an HTTP layer calls

mod coordinator;
mod service;

pub use coordinator::{plan_resequence, CommittedTransition, PositionChange, StationQueueCoordinator};
pub use service::{
    JoinQueueRequest, JoinReceipt, PageRequest, QueuePage, QueueService, QueueView,
    TransitionSummary,
};
