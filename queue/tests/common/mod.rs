//! Shared fixture for the queue integration tests.
#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use campus_queue::repository::collections;
use campus_queue::{
    Config, JoinQueueRequest, JoinReceipt, QueueEntry, QueueId, QueueService, SessionRef, StationId,
};
use campus_queue_testing::{InMemoryDocumentStore, ManualClock};
use serde_json::json;
use std::sync::Arc;

/// Payment station with one staffed and one idle counter.
pub const CASHIER: &str = "cashier";
/// Clinic station with no counters.
pub const CLINIC: &str = "clinic";
/// Staffed counter of the cashier station.
pub const WINDOW: &str = "window-1";

pub struct Fixture {
    pub store: InMemoryDocumentStore,
    pub clock: ManualClock,
    pub service: QueueService,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let store = InMemoryDocumentStore::new();
        store.insert(collections::STATIONS, CASHIER, json!({ "name": "Cashier", "type": "payment" }));
        store.insert(collections::STATIONS, CLINIC, json!({ "name": "Clinic", "type": "clinic" }));
        store.insert(
            collections::COUNTERS,
            WINDOW,
            json!({ "stationId": CASHIER, "assignedStaffId": "staff-1" }),
        );
        store.insert(collections::COUNTERS, "window-2", json!({ "stationId": CASHIER }));

        let clock = ManualClock::starting_at_test_epoch();
        let service = QueueService::new(Arc::new(store.clone()), Arc::new(clock.clone()), config);
        Self { store, clock, service }
    }

    /// Issues an unused session.
    pub fn issue_session(&self, qr: &str) -> SessionRef {
        self.store
            .insert(collections::CUSTOMER_SESSIONS, qr, json!({ "used": false }));
        SessionRef::new(qr)
    }

    pub fn join_request(&self, station: &str, email: &str, purpose: &str) -> JoinQueueRequest {
        JoinQueueRequest {
            station_id: StationId::new(station),
            email: email.to_string(),
            purpose: Some(purpose.to_string()),
            session_ref: self.issue_session(&format!("qr-{email}")),
        }
    }

    /// Joins the cashier station with a fresh session.
    pub async fn join(&self, email: &str) -> JoinReceipt {
        self.service
            .join_queue(self.join_request(CASHIER, email, "payment"))
            .await
            .unwrap()
    }

    pub fn entries(&self) -> Vec<QueueEntry> {
        self.store
            .snapshot(collections::QUEUE)
            .iter()
            .map(|doc| doc.decode::<QueueEntry>().unwrap())
            .collect()
    }

    pub fn entry(&self, id: &QueueId) -> QueueEntry {
        self.entries()
            .into_iter()
            .find(|entry| &entry.id == id)
            .expect("entry exists")
    }

    /// Sorted positions of a station's active entries.
    pub fn active_positions(&self, station: &str) -> Vec<u32> {
        let mut positions: Vec<u32> = self
            .entries()
            .into_iter()
            .filter(|entry| entry.station_id.as_str() == station && entry.is_active())
            .map(|entry| entry.position)
            .collect();
        positions.sort_unstable();
        positions
    }
}

/// `{1..=n}` as a vector.
pub fn contiguous(n: usize) -> Vec<u32> {
    (1..=u32::try_from(n).unwrap()).collect()
}
