//! Business metrics for the queue engine.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `queue_joins_total` - Entries created
//! - `queue_transitions_total{transition}` - Committed ledger transitions
//! - `queue_rejections_total{kind}` - Failed operations by error kind
//! - `queue_resequenced_entries_total` - Positions decremented by compaction
//! - `queue_conflict_retries_total` - Compare-and-swap attempts lost to a concurrent writer
//!
//! ## Histograms
//! - `queue_service_duration_minutes` - Time from service start to completion

use crate::error::{QueueError, Transition};
use metrics::{describe_counter, describe_histogram};

/// Register descriptions for all queue metrics.
///
/// Call once at startup, before any metric is recorded.
pub fn register_queue_metrics() {
    describe_counter!("queue_joins_total", "Total number of queue entries created");
    describe_counter!(
        "queue_transitions_total",
        "Committed queue transitions by kind (start_service, complete_service, cancel_queue, mark_no_show)"
    );
    describe_counter!(
        "queue_rejections_total",
        "Failed queue operations by error kind"
    );
    describe_counter!(
        "queue_resequenced_entries_total",
        "Queue positions decremented after a removal"
    );
    describe_counter!(
        "queue_conflict_retries_total",
        "Queue writes retried after a concurrent modification"
    );
    describe_histogram!(
        "queue_service_duration_minutes",
        "Time from service start to completion, in minutes"
    );

    tracing::info!("Queue metrics registered");
}

/// Record a successful join.
pub fn record_join(position: u32) {
    metrics::counter!("queue_joins_total").increment(1);
    tracing::debug!(position, "Recorded queue_join metric");
}

/// Record a committed transition.
pub fn record_transition(transition: Transition) {
    metrics::counter!("queue_transitions_total", "transition" => transition.label()).increment(1);
}

/// Record a failed operation.
pub fn record_rejection(error: &QueueError) {
    metrics::counter!("queue_rejections_total", "kind" => error.kind_label()).increment(1);
}

/// Record the number of positions rewritten by a compaction.
pub fn record_resequenced(count: usize) {
    if count > 0 {
        metrics::counter!("queue_resequenced_entries_total").increment(count as u64);
    }
}

/// Record one lost compare-and-swap attempt.
pub fn record_conflict_retry() {
    metrics::counter!("queue_conflict_retries_total").increment(1);
}

/// Record a completed service's duration.
pub fn record_service_duration(minutes: f64) {
    metrics::histogram!("queue_service_duration_minutes").record(minutes);
}
