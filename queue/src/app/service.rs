//! `QueueService` - the operations an HTTP layer calls.
//!
//! Each method validates its input, delegates to the coordinator, estimation
//! engine or analytics view, and returns a serializable response. Failed
//! operations are counted by error kind before being returned.

use crate::analytics::{AnalyticsView, DateRange, StationThroughput, StationWaitTime};
use crate::app::coordinator::StationQueueCoordinator;
use crate::config::Config;
use crate::error::{QueueError, Result};
use crate::estimation::EstimationEngine;
use crate::ledger::{LedgerAction, LedgerEnvironment};
use crate::metrics;
use crate::repository::{ListScope, QueueRepository};
use crate::session::{DocumentSessionGate, SessionGate};
use crate::types::{
    ActorId, CounterId, CustomerEmail, Purpose, QueueEntry, QueueId, QueueNumber, QueueStatus,
    SessionRef, StaffId, StationId,
};
use campus_queue_core::document_store::DocumentStore;
use campus_queue_core::environment::Clock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// ============================================================================
// Requests and responses
// ============================================================================

/// Join request as received from a customer.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinQueueRequest {
    /// Station to join
    pub station_id: StationId,
    /// Customer email, normalized before use
    pub email: String,
    /// Purpose of the visit; defaults to payment
    #[serde(default)]
    pub purpose: Option<String>,
    /// Session the customer scanned
    #[serde(alias = "qrId")]
    pub session_ref: SessionRef,
}

/// Answer to a successful join.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinReceipt {
    /// New entry
    pub queue_id: QueueId,
    /// Ticket label
    pub queue_number: QueueNumber,
    /// Position at join time
    pub position: u32,
    /// Confirmation message
    pub message: String,
}

/// An entry with a freshly computed wait estimate.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueView {
    /// Stored entry
    #[serde(flatten)]
    pub entry: QueueEntry,
    /// Estimate computed at read time; `None` once the entry left the queue
    pub current_estimated_wait_time: Option<u32>,
}

/// Listing parameters.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    /// Only entries with this status
    #[serde(default)]
    pub status: Option<QueueStatus>,
    /// Page size
    #[serde(default)]
    pub limit: Option<usize>,
    /// Id of the last entry of the previous page
    #[serde(default)]
    pub cursor: Option<QueueId>,
}

/// One page of entries.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePage {
    /// Entries ordered by position
    pub queues: Vec<QueueEntry>,
    /// Cursor for the next page; `None` on an empty page
    pub next_cursor: Option<QueueId>,
}

/// Outcome of a ledger transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionSummary {
    /// Entry
    pub queue_id: QueueId,
    /// Ticket label
    pub queue_number: QueueNumber,
    /// Status after the transition
    pub status: QueueStatus,
    /// Counter, once called
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counter_id: Option<CounterId>,
    /// Call time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub served_at: Option<DateTime<Utc>>,
    /// Staff who called the customer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub served_by: Option<StaffId>,
    /// Completion time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Cancellation or no-show time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl From<&QueueEntry> for TransitionSummary {
    fn from(entry: &QueueEntry) -> Self {
        let service = entry.state.service();
        Self {
            queue_id: entry.id.clone(),
            queue_number: entry.queue_number.clone(),
            status: entry.status(),
            counter_id: service.map(|s| s.counter_id.clone()),
            served_at: service.map(|s| s.served_at),
            served_by: service.map(|s| s.served_by.clone()),
            completed_at: entry.state.completed_at(),
            cancelled_at: entry.state.cancellation().map(|c| c.cancelled_at),
        }
    }
}

// ============================================================================
// Service
// ============================================================================

/// Facade over the queue engine.
#[derive(Clone)]
pub struct QueueService {
    repository: QueueRepository,
    coordinator: StationQueueCoordinator,
    estimator: Arc<EstimationEngine>,
    analytics: AnalyticsView,
    config: Config,
}

impl QueueService {
    /// Creates a service whose sessions live in the same store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, config: Config) -> Self {
        let sessions = Arc::new(DocumentSessionGate::new(Arc::clone(&store)));
        Self::with_session_gate(store, clock, sessions, config)
    }

    /// Creates a service with a custom session collaborator.
    #[must_use]
    pub fn with_session_gate(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        sessions: Arc<dyn SessionGate>,
        config: Config,
    ) -> Self {
        let repository = QueueRepository::new(store);
        let estimator = Arc::new(EstimationEngine::new(
            repository.clone(),
            config.estimation.clone(),
        ));
        let ledger_env = LedgerEnvironment::new(clock, Arc::clone(&sessions), Arc::clone(&estimator));
        let coordinator = StationQueueCoordinator::new(
            repository.clone(),
            sessions,
            ledger_env,
            config.concurrency.retry_policy(),
        );
        let analytics = AnalyticsView::new(repository.clone(), config.analytics.clone());

        Self {
            repository,
            coordinator,
            estimator,
            analytics,
            config,
        }
    }

    /// The estimation engine used by the service
    #[must_use]
    pub fn estimator(&self) -> &EstimationEngine {
        &self.estimator
    }

    /// Joins a station's queue.
    ///
    /// # Errors
    ///
    /// `BadRequest`, `NotFound`, `PurposeMismatch` or `Conflict`.
    pub async fn join_queue(&self, request: JoinQueueRequest) -> Result<JoinReceipt> {
        let outcome = self.try_join_queue(request).await;
        Self::observe(outcome)
    }

    async fn try_join_queue(&self, request: JoinQueueRequest) -> Result<JoinReceipt> {
        let email = CustomerEmail::parse(&request.email).map_err(QueueError::BadRequest)?;
        if request.station_id.is_blank() {
            return Err(QueueError::BadRequest("Station ID can not be empty".to_string()));
        }
        if request.session_ref.is_blank() {
            return Err(QueueError::BadRequest("Qr Id can not be empty".to_string()));
        }
        let purpose = match request.purpose.as_deref() {
            None => Purpose::default(),
            Some(raw) => raw.parse::<Purpose>().map_err(QueueError::BadRequest)?,
        };

        let station = self.repository.require_station(&request.station_id).await?;
        if station.station_type != purpose.as_str() {
            return Err(QueueError::PurposeMismatch {
                station_type: station.station_type,
                purpose: purpose.as_str().to_string(),
            });
        }

        let entry = self
            .coordinator
            .join(&station, &email, purpose, &request.session_ref)
            .await?;

        Ok(JoinReceipt {
            queue_id: entry.id,
            queue_number: entry.queue_number,
            position: entry.position,
            message: format!("{email} joins {} successfully.", station.name),
        })
    }

    /// The first entry created by a session, optionally restricted to a status.
    ///
    /// # Errors
    ///
    /// `BadRequest` for an empty session ref, `NotFound` when no entry matches.
    pub async fn get_queue(
        &self,
        session_ref: &SessionRef,
        status: Option<QueueStatus>,
    ) -> Result<QueueView> {
        Self::observe(self.try_get_queue(session_ref, status).await)
    }

    async fn try_get_queue(
        &self,
        session_ref: &SessionRef,
        status: Option<QueueStatus>,
    ) -> Result<QueueView> {
        if session_ref.is_blank() {
            return Err(QueueError::BadRequest("qrId is required".to_string()));
        }
        let entry = self
            .repository
            .find_by_session(session_ref, status)
            .await?
            .ok_or_else(|| QueueError::NotFound("Queue not found".to_string()))?;

        let current_estimated_wait_time = if entry.is_active() {
            Some(
                self.estimator
                    .calculate_estimated_wait_time(&entry.station_id, entry.position)
                    .await?,
            )
        } else {
            None
        };
        Ok(QueueView {
            entry,
            current_estimated_wait_time,
        })
    }

    /// Entries of a station, by position.
    ///
    /// # Errors
    ///
    /// `BadRequest` for an empty id, `NotFound` for an unknown station or cursor.
    pub async fn list_queues_by_station(
        &self,
        station_id: &StationId,
        page: PageRequest,
    ) -> Result<QueuePage> {
        if station_id.is_blank() {
            return Self::observe(Err(QueueError::BadRequest(
                "stationId is required".to_string(),
            )));
        }
        let scope = ListScope::Station(station_id.clone());
        Self::observe(self.list(&scope, page).await)
    }

    /// Entries called to a counter, by position.
    ///
    /// # Errors
    ///
    /// `BadRequest` for an empty id, `NotFound` for an unknown counter or cursor.
    pub async fn list_queues_by_counter(
        &self,
        counter_id: &CounterId,
        page: PageRequest,
    ) -> Result<QueuePage> {
        if counter_id.is_blank() {
            return Self::observe(Err(QueueError::BadRequest(
                "counterId is required".to_string(),
            )));
        }
        let scope = ListScope::Counter(counter_id.clone());
        Self::observe(self.list(&scope, page).await)
    }

    async fn list(&self, scope: &ListScope, page: PageRequest) -> Result<QueuePage> {
        match scope {
            ListScope::Station(id) => {
                self.repository.require_station(id).await?;
            },
            ListScope::Counter(id) => {
                self.repository.require_counter(id).await?;
            },
        }

        let limit = page
            .limit
            .filter(|limit| *limit > 0)
            .unwrap_or(self.config.pagination.default_page_size)
            .min(self.config.pagination.max_page_size);

        let queues = self
            .repository
            .page(scope, page.status, limit, page.cursor.as_ref())
            .await?;
        let next_cursor = queues.last().map(|entry| entry.id.clone());
        Ok(QueuePage { queues, next_cursor })
    }

    /// Calls a waiting customer to a counter.
    ///
    /// # Errors
    ///
    /// `BadRequest`, `NotFound`, `InvalidStateTransition` or `Conflict`.
    pub async fn start_service(
        &self,
        queue_id: &QueueId,
        counter_id: &CounterId,
        staff_id: &StaffId,
    ) -> Result<TransitionSummary> {
        if counter_id.is_blank() {
            return Self::observe(Err(QueueError::BadRequest(
                "Counter ID cannot be empty".to_string(),
            )));
        }
        self.transition(
            queue_id,
            LedgerAction::StartService {
                counter_id: counter_id.clone(),
                staff_id: staff_id.clone(),
            },
        )
        .await
    }

    /// Finishes the service of a serving customer.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidStateTransition` or `Conflict`.
    pub async fn complete_service(&self, queue_id: &QueueId) -> Result<TransitionSummary> {
        self.transition(queue_id, LedgerAction::CompleteService).await
    }

    /// Cancels an active entry.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidStateTransition` or `Conflict`.
    pub async fn cancel_queue(
        &self,
        queue_id: &QueueId,
        actor: Option<ActorId>,
    ) -> Result<TransitionSummary> {
        self.transition(queue_id, LedgerAction::CancelQueue { actor }).await
    }

    /// Records that an active entry's customer did not show up.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidStateTransition` or `Conflict`.
    pub async fn mark_no_show(
        &self,
        queue_id: &QueueId,
        staff_id: &StaffId,
    ) -> Result<TransitionSummary> {
        self.transition(
            queue_id,
            LedgerAction::MarkNoShow {
                staff_id: staff_id.clone(),
            },
        )
        .await
    }

    async fn transition(&self, queue_id: &QueueId, command: LedgerAction) -> Result<TransitionSummary> {
        if queue_id.is_blank() {
            return Self::observe(Err(QueueError::BadRequest(
                "queueId is required".to_string(),
            )));
        }
        let outcome = self
            .coordinator
            .apply(queue_id, command)
            .await
            .map(|committed| TransitionSummary::from(&committed.state.entry));
        Self::observe(outcome)
    }

    /// Average wait per station.
    ///
    /// The range applies only when both bounds are given.
    ///
    /// # Errors
    ///
    /// `BadRequest` for unparseable or reversed dates.
    pub async fn average_wait_time(
        &self,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Result<BTreeMap<StationId, StationWaitTime>> {
        let outcome = match DateRange::parse_optional(start_date, end_date) {
            Ok(range) => self.analytics.average_wait_time(range).await,
            Err(error) => Err(error),
        };
        Self::observe(outcome)
    }

    /// Completed entries per station inside a required range.
    ///
    /// # Errors
    ///
    /// `BadRequest` for missing, unparseable or reversed dates.
    pub async fn completed_throughput(
        &self,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Result<BTreeMap<StationId, StationThroughput>> {
        let outcome = match DateRange::parse_required(start_date, end_date) {
            Ok(range) => self.analytics.completed_throughput(range).await,
            Err(error) => Err(error),
        };
        Self::observe(outcome)
    }

    fn observe<T>(outcome: Result<T>) -> Result<T> {
        if let Err(error) = &outcome {
            metrics::record_rejection(error);
            tracing::debug!(kind = error.kind_label(), error = %error, "Queue operation rejected");
        }
        outcome
    }
}
