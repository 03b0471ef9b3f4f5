//! Campus Queue - queue lifecycle and wait-time engine for campus service stations.
//!
//! Customers join a station's queue with a single-use session, are called to a
//! counter by staff, and leave the queue when served, cancelled or marked as a
//! no-show. The engine keeps every station's active positions contiguous and
//! estimates waits from historical service durations.
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────────────┐
//!   HTTP layer ────▶ │   QueueService   │ ───────────────┐
//!                    └──────────────────┘                │
//!                             │                          ▼
//!                             ▼                  ┌───────────────┐
//!              ┌──────────────────────────┐     │ AnalyticsView │
//!              │ StationQueueCoordinator  │     └───────────────┘
//!              │  (CAS on StationSequence)│             │
//!              └──────────────────────────┘             │
//!                  │                 │                  │
//!                  ▼                 ▼                  ▼
//!          ┌──────────────┐   ┌─────────────────────────────┐
//!          │ LedgerReducer│   │     DocumentStore (trait)   │
//!          └──────────────┘   └─────────────────────────────┘
//!                  │ post-commit effects       ▲
//!                  ▼                           │
//!        SessionGate::revoke, EstimationEngine::refresh
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let service = QueueService::new(store, Arc::new(SystemClock), Config::from_env());
//! let receipt = service
//!     .join_queue(JoinQueueRequest {
//!         station_id: StationId::new("cashier"),
//!         email: "student@campus.edu".into(),
//!         purpose: Some("payment".into()),
//!         session_ref: SessionRef::new("qr-123"),
//!     })
//!     .await?;
//! assert_eq!(receipt.queue_number.as_str(), "PAY-001");
//! ```

#![forbid(unsafe_code)]

pub mod analytics;
pub mod app;
pub mod config;
pub mod error;
pub mod estimation;
pub mod ledger;
pub mod metrics;
pub mod repository;
pub mod session;
pub mod types;

pub use app::{
    JoinQueueRequest, JoinReceipt, PageRequest, QueuePage, QueueService, QueueView,
    StationQueueCoordinator, TransitionSummary,
};
pub use config::Config;
pub use error::{ErrorKind, QueueError, Result, SessionError, Transition};
pub use estimation::EstimationEngine;
pub use ledger::{LedgerAction, LedgerEnvironment, LedgerReducer, LedgerState};
pub use types::{
    ActorId, CounterId, CustomerEmail, EntryState, Purpose, QueueEntry, QueueId, QueueNumber,
    QueueStatus, SessionRef, StaffId, StationId,
};
