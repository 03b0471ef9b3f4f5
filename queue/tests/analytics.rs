//! Average wait time and throughput per station.
#![allow(clippy::unwrap_used)]

mod common;

use campus_queue::{CounterId, ErrorKind, QueueId, StaffId, StationId};
use chrono::Duration;
use common::{Fixture, CASHIER, CLINIC, WINDOW};

async fn call(fx: &Fixture, id: &QueueId) {
    fx.service
        .start_service(id, &CounterId::new(WINDOW), &StaffId::new("staff-1"))
        .await
        .unwrap();
}

/// Joins, waits `minutes`, then is called and completed.
async fn served_after(fx: &Fixture, email: &str, minutes: i64) {
    let id = fx.join(email).await.queue_id;
    fx.clock.advance(Duration::minutes(minutes));
    call(fx, &id).await;
    fx.service.complete_service(&id).await.unwrap();
}

/// Two customers waited 10 and 20 minutes on 2025-01-01; one was completed.
async fn morning(fx: &Fixture) {
    let a = fx.join("a@campus.edu").await.queue_id;
    let b = fx.join("b@campus.edu").await.queue_id;
    fx.clock.advance(Duration::minutes(10));
    call(fx, &a).await;
    fx.clock.advance(Duration::minutes(3));
    fx.service.complete_service(&a).await.unwrap();
    fx.clock.advance(Duration::minutes(7));
    call(fx, &b).await;
}

#[tokio::test]
async fn average_wait_over_recent_entries() {
    let fx = Fixture::new();
    morning(&fx).await;

    let report = fx.service.average_wait_time(None, None).await.unwrap();

    let cashier = &report[&StationId::new(CASHIER)];
    assert_eq!(cashier.station_name, "Cashier");
    assert_eq!(cashier.sample_count, 2);
    assert!((cashier.average_wait_time_minutes - 15.0).abs() < 1e-9);

    let clinic = &report[&StationId::new(CLINIC)];
    assert_eq!(clinic.sample_count, 0);
    assert!(clinic.average_wait_time_minutes.abs() < f64::EPSILON);
}

#[tokio::test]
async fn average_wait_inside_a_range() {
    let fx = Fixture::new();
    morning(&fx).await;

    // only the first call (00:10) is inside the range
    let report = fx
        .service
        .average_wait_time(Some("2025-01-01T00:00:00Z"), Some("2025-01-01T00:15:00Z"))
        .await
        .unwrap();
    let cashier = &report[&StationId::new(CASHIER)];
    assert_eq!(cashier.sample_count, 1);
    assert!((cashier.average_wait_time_minutes - 10.0).abs() < 1e-9);

    let outside = fx
        .service
        .average_wait_time(Some("2024-12-01"), Some("2024-12-02"))
        .await
        .unwrap();
    assert_eq!(outside[&StationId::new(CASHIER)].sample_count, 0);
}

#[tokio::test]
async fn recent_window_keeps_the_latest_fifty_calls() {
    let fx = Fixture::new();
    for i in 0..5 {
        served_after(&fx, &format!("early{i}@campus.edu"), 100).await;
    }
    for i in 0..50 {
        served_after(&fx, &format!("late{i}@campus.edu"), 1).await;
    }

    let report = fx.service.average_wait_time(None, None).await.unwrap();

    let cashier = &report[&StationId::new(CASHIER)];
    assert_eq!(cashier.sample_count, 50);
    assert!((cashier.average_wait_time_minutes - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn offsetless_date_times_are_read_as_utc() {
    let fx = Fixture::new();
    morning(&fx).await;

    let report = fx
        .service
        .average_wait_time(Some("2025-01-01T00:00:00"), Some("2025-01-02T00:00:00"))
        .await
        .unwrap();
    assert_eq!(report[&StationId::new(CASHIER)].sample_count, 2);

    let report = fx
        .service
        .completed_throughput(Some("2025-01-01T00:00"), Some("2025-01-01T00:15"))
        .await
        .unwrap();
    assert_eq!(report[&StationId::new(CASHIER)].completed_count, 1);
}

#[tokio::test]
async fn one_sided_range_falls_back_to_recent_entries() {
    let fx = Fixture::new();
    morning(&fx).await;

    let report = fx
        .service
        .average_wait_time(Some("2024-12-01"), None)
        .await
        .unwrap();
    assert_eq!(report[&StationId::new(CASHIER)].sample_count, 2);
}

#[tokio::test]
async fn throughput_counts_completions_in_range() {
    let fx = Fixture::new();
    morning(&fx).await;

    let report = fx
        .service
        .completed_throughput(Some("2025-01-01"), Some("2025-01-02"))
        .await
        .unwrap();
    assert_eq!(report[&StationId::new(CASHIER)].completed_count, 1);
    assert_eq!(report[&StationId::new(CASHIER)].station_name, "Cashier");
    assert_eq!(report[&StationId::new(CLINIC)].completed_count, 0);

    let earlier = fx
        .service
        .completed_throughput(Some("2024-12-01"), Some("2024-12-31"))
        .await
        .unwrap();
    assert_eq!(earlier[&StationId::new(CASHIER)].completed_count, 0);
}

#[tokio::test]
async fn throughput_requires_a_full_range() {
    let fx = Fixture::new();

    let error = fx
        .service
        .completed_throughput(Some("2025-01-01"), None)
        .await
        .unwrap_err();
    assert_eq!(error.to_string(), "Missing startDate or endDate query parameters");

    let error = fx
        .service
        .completed_throughput(Some("yesterday"), Some("2025-01-02"))
        .await
        .unwrap_err();
    assert_eq!(error.to_string(), "Invalid date format. Use ISO date strings.");
    assert_eq!(error.kind(), ErrorKind::BadRequest);
}
