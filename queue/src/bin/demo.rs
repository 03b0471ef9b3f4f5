//! Campus Queue Demo
//!
//! Walks one cashier station through a morning against the in-memory store:
//! - Three students join with their scanned sessions
//! - Staff call, serve and complete the first student
//! - The second student is marked as a no-show and the queue compacts
//! - Analytics report wait times and throughput
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=debug cargo run --bin demo
//! ```

use campus_queue::{
    Config, CounterId, JoinQueueRequest, PageRequest, QueueService, SessionRef, StaffId, StationId,
    metrics::register_queue_metrics,
};
use campus_queue_core::environment::Clock;
use campus_queue_testing::{InMemoryDocumentStore, ManualClock};
use chrono::Duration;
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    register_queue_metrics();

    println!("\n============================================");
    println!("   Campus Queue - Live Demo");
    println!("============================================\n");

    // ========== Seed ==========

    let store = InMemoryDocumentStore::new();
    store.insert("stations", "cashier", json!({ "name": "Cashier", "type": "payment" }));
    store.insert(
        "counters",
        "window-1",
        json!({ "stationId": "cashier", "assignedStaffId": "staff-ana" }),
    );
    store.insert("counters", "window-2", json!({ "stationId": "cashier" }));
    for qr in ["qr-1", "qr-2", "qr-3"] {
        store.insert("customer_sessions", qr, json!({ "used": false }));
    }

    let clock = ManualClock::starting_at_test_epoch();
    let service = QueueService::new(Arc::new(store), Arc::new(clock.clone()), config);

    let station = StationId::new("cashier");
    let counter = CounterId::new("window-1");
    let staff = StaffId::new("staff-ana");

    // ========== Joins ==========

    println!("Step 1: Three students join the cashier queue");
    let mut tickets = Vec::new();
    for (qr, email) in [
        ("qr-1", "ana@campus.edu"),
        ("qr-2", "ben@campus.edu"),
        ("qr-3", "cy@campus.edu"),
    ] {
        let receipt = service
            .join_queue(JoinQueueRequest {
                station_id: station.clone(),
                email: email.to_string(),
                purpose: None,
                session_ref: SessionRef::new(qr),
            })
            .await?;
        println!("  {} -> {} (position {})", receipt.message, receipt.queue_number, receipt.position);
        tickets.push(receipt);
        clock.advance(Duration::minutes(1));
    }

    // ========== Service ==========

    println!("\nStep 2: First student is called and served");
    let first = &tickets[0];
    clock.advance(Duration::minutes(2));
    let started = service.start_service(&first.queue_id, &counter, &staff).await?;
    println!("  {} is now {}", started.queue_number, started.status);

    clock.advance(Duration::minutes(4));
    let completed = service.complete_service(&first.queue_id).await?;
    println!("  {} is now {}", completed.queue_number, completed.status);

    // ========== No-show ==========

    println!("\nStep 3: Second student does not show up");
    let no_show = service.mark_no_show(&tickets[1].queue_id, &staff).await?;
    println!("  {} is now {}", no_show.queue_number, no_show.status);

    let view = service.get_queue(&SessionRef::new("qr-3"), None).await?;
    println!(
        "  {} moved to position {} (about {} min)",
        view.entry.queue_number,
        view.entry.position,
        view.current_estimated_wait_time.unwrap_or_default()
    );

    // ========== Listing ==========

    println!("\nStep 4: Station board");
    let page = service
        .list_queues_by_station(&station, PageRequest::default())
        .await?;
    for entry in &page.queues {
        println!(
            "  #{} {} {} ({})",
            entry.position,
            entry.queue_number,
            entry.customer_email,
            entry.status()
        );
    }

    // ========== Analytics ==========

    println!("\nStep 5: Analytics");
    for (station_id, wait) in service.average_wait_time(None, None).await? {
        println!(
            "  {station_id}: average wait {} min over {} samples",
            wait.average_wait_time_minutes, wait.sample_count
        );
    }
    let today = clock.now().format("%Y-%m-%d").to_string();
    let tomorrow = (clock.now() + Duration::days(1)).format("%Y-%m-%d").to_string();
    for (station_id, throughput) in service
        .completed_throughput(Some(&today), Some(&tomorrow))
        .await?
    {
        println!("  {station_id}: {} completed today", throughput.completed_count);
    }

    println!("\n============================================");
    println!("   Demo complete");
    println!("============================================\n");

    Ok(())
}
