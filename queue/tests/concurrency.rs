//! Optimistic concurrency of joins and transitions.
#![allow(clippy::unwrap_used)]

mod common;

use campus_queue::config::ConcurrencyConfig;
use campus_queue::repository::collections;
use campus_queue::{Config, CounterId, ErrorKind, QueueService, QueueStatus, StaffId};
use campus_queue_core::document_store::{
    Document, DocumentId, DocumentStore, DocumentStoreError, Query, StoreFuture, Version,
    WriteBatch,
};
use campus_queue_testing::{test_clock, InMemoryDocumentStore};
use common::{contiguous, Fixture, CASHIER, WINDOW};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

fn patient_config() -> Config {
    Config {
        concurrency: ConcurrencyConfig {
            conflict_retries: 64,
            retry_initial_delay_ms: 1,
            retry_max_delay_ms: 20,
        },
        ..Config::default()
    }
}

fn conflict() -> DocumentStoreError {
    DocumentStoreError::VersionConflict {
        collection: collections::STATION_QUEUES.to_string(),
        id: DocumentId::new(CASHIER),
        expected: Version::new(1),
        actual: Version::new(2),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_joins_get_distinct_contiguous_positions() {
    let fx = Fixture::with_config(patient_config());

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let service = fx.service.clone();
            let request = fx.join_request(CASHIER, &format!("student{i}@campus.edu"), "payment");
            tokio::spawn(async move { service.join_queue(request).await })
        })
        .collect();

    let mut numbers = HashSet::new();
    for handle in handles {
        let receipt = handle.await.unwrap().unwrap();
        assert!(numbers.insert(receipt.queue_number));
    }

    assert_eq!(numbers.len(), 12);
    assert_eq!(fx.active_positions(CASHIER), contiguous(12));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_joins_admit_one() {
    let fx = Fixture::with_config(patient_config());

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let service = fx.service.clone();
            let mut request = fx.join_request(CASHIER, "same@campus.edu", "payment");
            request.session_ref = fx.issue_session(&format!("qr-same-{i}"));
            tokio::spawn(async move { service.join_queue(request).await })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(error) => assert_eq!(error.kind(), ErrorKind::Conflict),
        }
    }

    assert_eq!(admitted, 1);
    assert_eq!(fx.active_positions(CASHIER), contiguous(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_have_one_winner() {
    let fx = Fixture::with_config(patient_config());
    let receipt = fx.join("ana@campus.edu").await;

    let handles: Vec<_> = ["staff-1", "staff-2"]
        .into_iter()
        .map(|staff| {
            let service = fx.service.clone();
            let id = receipt.queue_id.clone();
            tokio::spawn(async move {
                service
                    .start_service(&id, &CounterId::new(WINDOW), &StaffId::new(staff))
                    .await
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(summary) => {
                winners += 1;
                assert_eq!(summary.status, QueueStatus::Serving);
            },
            Err(error) => assert_eq!(error.kind(), ErrorKind::InvalidStateTransition),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_removals_keep_positions_contiguous() {
    let fx = Fixture::with_config(patient_config());
    let mut ids = Vec::new();
    for i in 0..8 {
        ids.push(fx.join(&format!("student{i}@campus.edu")).await.queue_id);
    }

    let handles: Vec<_> = ids
        .iter()
        .step_by(2)
        .cloned()
        .map(|id| {
            let service = fx.service.clone();
            tokio::spawn(async move { service.cancel_queue(&id, None).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(fx.active_positions(CASHIER), contiguous(4));
}

#[tokio::test]
async fn a_lost_race_is_retried() {
    let fx = Fixture::new();
    fx.join("ana@campus.edu").await;

    fx.store.fail_next_commit(conflict());
    let receipt = fx.join("ben@campus.edu").await;

    assert_eq!(receipt.position, 2);
    assert_eq!(fx.active_positions(CASHIER), contiguous(2));
}

/// Store whose commits always lose the race.
struct AlwaysConflicting(InMemoryDocumentStore);

impl DocumentStore for AlwaysConflicting {
    fn get<'a>(&'a self, collection: &'a str, id: &'a DocumentId) -> StoreFuture<'a, Option<Document>> {
        self.0.get(collection, id)
    }

    fn query(&self, query: Query) -> StoreFuture<'_, Vec<Document>> {
        self.0.query(query)
    }

    fn commit(&self, _batch: WriteBatch) -> StoreFuture<'_, ()> {
        Box::pin(async { Err(conflict()) })
    }
}

#[tokio::test]
async fn exhausted_retries_surface_as_conflict() {
    let store = InMemoryDocumentStore::new();
    store.insert(collections::STATIONS, CASHIER, json!({ "name": "Cashier", "type": "payment" }));
    store.insert(collections::CUSTOMER_SESSIONS, "qr-1", json!({ "used": false }));

    let config = Config {
        concurrency: ConcurrencyConfig {
            conflict_retries: 2,
            retry_initial_delay_ms: 1,
            retry_max_delay_ms: 2,
        },
        ..Config::default()
    };
    let service = QueueService::new(
        Arc::new(AlwaysConflicting(store)),
        Arc::new(test_clock()),
        config,
    );

    let error = service
        .join_queue(campus_queue::JoinQueueRequest {
            station_id: CASHIER.into(),
            email: "ana@campus.edu".into(),
            purpose: None,
            session_ref: "qr-1".into(),
        })
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Conflict);
    assert_eq!(
        error.to_string(),
        "Concurrent modification of station cashier queue; retry the request"
    );
}
