//! Position compaction after removals.
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use campus_queue::{CounterId, QueueStatus, StaffId};
use common::{contiguous, Fixture, CASHIER, WINDOW};
use proptest::prelude::*;

fn staff() -> StaffId {
    StaffId::new("staff-1")
}

#[tokio::test]
async fn no_show_moves_the_next_customer_to_the_front() {
    let fx = Fixture::new();
    let first = fx.join("ana@campus.edu").await;
    let second = fx.join("ben@campus.edu").await;
    assert_eq!(second.queue_number.as_str(), "PAY-002");

    fx.service.mark_no_show(&first.queue_id, &staff()).await.unwrap();

    let moved = fx.entry(&second.queue_id);
    assert_eq!(moved.position, 1);
    assert_eq!(moved.estimated_wait_time, Some(0));
    // the ticket label keeps its creation position
    assert_eq!(moved.queue_number.as_str(), "PAY-002");
}

#[tokio::test]
async fn cancelling_the_middle_compacts_only_later_entries() {
    let fx = Fixture::new();
    let a = fx.join("a@campus.edu").await;
    let b = fx.join("b@campus.edu").await;
    let c = fx.join("c@campus.edu").await;
    let d = fx.join("d@campus.edu").await;

    fx.service.cancel_queue(&b.queue_id, None).await.unwrap();

    assert_eq!(fx.entry(&a.queue_id).position, 1);
    assert_eq!(fx.entry(&c.queue_id).position, 2);
    assert_eq!(fx.entry(&d.queue_id).position, 3);
    assert_eq!(fx.entry(&b.queue_id).status(), QueueStatus::Cancelled);
    assert_eq!(fx.active_positions(CASHIER), contiguous(3));
}

#[tokio::test]
async fn completion_compacts_and_next_join_appends() {
    let fx = Fixture::new();
    let a = fx.join("a@campus.edu").await;
    let b = fx.join("b@campus.edu").await;

    fx.service
        .start_service(&a.queue_id, &CounterId::new(WINDOW), &staff())
        .await
        .unwrap();
    fx.service.complete_service(&a.queue_id).await.unwrap();

    let c = fx.join("c@campus.edu").await;
    assert_eq!(c.position, 2);
    assert_eq!(c.queue_number.as_str(), "PAY-002");
    // labels keep their creation position, so b and c share one
    let b = fx.entry(&b.queue_id);
    assert_eq!(b.position, 1);
    assert_eq!(b.queue_number.as_str(), "PAY-002");
    assert!(b.status().is_active());
    assert_eq!(fx.active_positions(CASHIER), contiguous(2));
}

#[tokio::test]
async fn removing_the_last_entry_touches_nobody() {
    let fx = Fixture::new();
    let a = fx.join("a@campus.edu").await;
    let b = fx.join("b@campus.edu").await;
    let before = fx.entry(&a.queue_id);

    fx.service.cancel_queue(&b.queue_id, None).await.unwrap();

    let after = fx.entry(&a.queue_id);
    assert_eq!(after.position, before.position);
    assert_eq!(fx.active_positions(CASHIER), contiguous(1));
}

#[derive(Clone, Debug)]
enum Op {
    Join,
    Start(usize),
    Complete(usize),
    Cancel(usize),
    NoShow(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Join),
        1 => (0usize..16).prop_map(Op::Start),
        1 => (0usize..16).prop_map(Op::Complete),
        1 => (0usize..16).prop_map(Op::Cancel),
        1 => (0usize..16).prop_map(Op::NoShow),
    ]
}

async fn run(ops: Vec<Op>) {
    let fx = Fixture::new();
    let mut joined = Vec::new();
    let window = CounterId::new(WINDOW);

    for (step, op) in ops.into_iter().enumerate() {
        // Invalid transitions are expected along the way; only the invariant matters
        match op {
            Op::Join => joined.push(fx.join(&format!("customer{step}@campus.edu")).await.queue_id),
            Op::Start(i) if !joined.is_empty() => {
                let _ = fx.service.start_service(&joined[i % joined.len()], &window, &staff()).await;
            },
            Op::Complete(i) if !joined.is_empty() => {
                let _ = fx.service.complete_service(&joined[i % joined.len()]).await;
            },
            Op::Cancel(i) if !joined.is_empty() => {
                let _ = fx.service.cancel_queue(&joined[i % joined.len()], None).await;
            },
            Op::NoShow(i) if !joined.is_empty() => {
                let _ = fx.service.mark_no_show(&joined[i % joined.len()], &staff()).await;
            },
            _ => {},
        }

        let positions = fx.active_positions(CASHIER);
        assert_eq!(positions, contiguous(positions.len()), "after step {step}");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn active_positions_stay_contiguous(ops in proptest::collection::vec(op(), 1..30)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(run(ops));
    }
}
