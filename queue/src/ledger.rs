//! Queue Ledger: the state machine of a single queue entry.
//!
//! ```text
//! waiting ──StartService──▶ serving ──CompleteService──▶ completed
//!    │                         │
//!    ├──CancelQueue────────────┴──▶ cancelled
//!    └──MarkNoShow─────────────────▶ no_show
//! ```
//!
//! Commands are validated against the entry's status, turned into events stamped
//! with the environment clock and applied to the entry. Accepted events are kept
//! as uncommitted until the coordinator persists them. Events that take an entry
//! out of its station's queue return follow-up effects (session revocation and a
//! wait-estimate refresh) that must only run after the commit succeeded; their
//! feedback actions are reduced back for logging.

use crate::error::{QueueError, Transition};
use crate::estimation::EstimationEngine;
use crate::session::SessionGate;
use crate::types::{
    ActorId, Cancellation, CounterId, EntryState, QueueEntry, QueueStatus, Service, SessionRef,
    StaffId, StationId,
};
use campus_queue_core::environment::Clock;
use campus_queue_core::{async_effect, effect::Effect, reducer::Reducer, smallvec, SmallVec};
use chrono::{DateTime, Utc};
use std::sync::Arc;

// ============================================================================
// Actions (Commands + Events + Feedback)
// ============================================================================

/// Follow-up step run after a removal has been committed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FollowUp {
    /// Revoke the customer session
    RevokeSession,
    /// Recompute the station's wait estimates
    RefreshEstimates,
}

/// Actions of the Queue Ledger.
#[derive(Clone, Debug, PartialEq)]
pub enum LedgerAction {
    // Commands
    /// Call a waiting entry to a counter
    StartService {
        /// Counter the customer is called to
        counter_id: CounterId,
        /// Staff member starting the service
        staff_id: StaffId,
    },
    /// Finish the service of a serving entry
    CompleteService,
    /// Remove an active entry at the request of staff or the customer
    CancelQueue {
        /// Who cancelled, if known
        actor: Option<ActorId>,
    },
    /// Remove an active entry whose customer did not show up
    MarkNoShow {
        /// Staff member recording the no-show
        staff_id: StaffId,
    },

    // Events
    /// Service started
    ServiceStarted {
        /// Counter
        counter_id: CounterId,
        /// Staff member
        served_by: StaffId,
        /// When
        served_at: DateTime<Utc>,
    },
    /// Service completed
    ServiceCompleted {
        /// When
        completed_at: DateTime<Utc>,
    },
    /// Entry cancelled
    QueueCancelled {
        /// When
        cancelled_at: DateTime<Utc>,
        /// Who
        cancelled_by: Option<ActorId>,
    },
    /// Entry marked as no-show
    MarkedNoShow {
        /// When
        cancelled_at: DateTime<Utc>,
        /// Staff member
        cancelled_by: StaffId,
    },
    /// A command was not allowed from the entry's status
    TransitionRejected {
        /// Attempted transition
        transition: Transition,
        /// Status at the time
        status: QueueStatus,
    },

    // Follow-up feedback
    /// The entry's session was revoked
    SessionRevoked {
        /// Session
        session_ref: SessionRef,
    },
    /// The station's estimates were refreshed
    EstimatesRefreshed {
        /// Station
        station_id: StationId,
        /// Entries updated
        updated: usize,
    },
    /// A follow-up step failed; the transition itself stands
    FollowUpFailed {
        /// Failed step
        step: FollowUp,
        /// Error message
        error: String,
    },
}

impl LedgerAction {
    /// The transition a command requests, `None` for events and feedback
    #[must_use]
    pub const fn transition(&self) -> Option<Transition> {
        match self {
            Self::StartService { .. } => Some(Transition::StartService),
            Self::CompleteService => Some(Transition::CompleteService),
            Self::CancelQueue { .. } => Some(Transition::CancelQueue),
            Self::MarkNoShow { .. } => Some(Transition::MarkNoShow),
            _ => None,
        }
    }
}

// ============================================================================
// State
// ============================================================================

/// A queue entry plus the ledger's bookkeeping.
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerState {
    /// The entry as of the last applied event
    pub entry: QueueEntry,
    /// Accepted events not yet persisted
    pub uncommitted: Vec<LedgerAction>,
    /// Rejection of the last command, if it was rejected
    pub last_error: Option<QueueError>,
    /// Feedback received from follow-up effects
    pub follow_ups: Vec<LedgerAction>,
}

impl LedgerState {
    /// Wraps a loaded entry
    #[must_use]
    pub const fn new(entry: QueueEntry) -> Self {
        Self {
            entry,
            uncommitted: Vec::new(),
            last_error: None,
            follow_ups: Vec::new(),
        }
    }

    /// Current status of the entry
    #[must_use]
    pub const fn status(&self) -> QueueStatus {
        self.entry.status()
    }

    /// Takes the accepted events, leaving none uncommitted
    pub fn take_uncommitted(&mut self) -> Vec<LedgerAction> {
        std::mem::take(&mut self.uncommitted)
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Dependencies of the ledger.
#[derive(Clone)]
pub struct LedgerEnvironment {
    /// Clock for event timestamps
    pub clock: Arc<dyn Clock>,
    /// Session collaborator for revocation
    pub sessions: Arc<dyn SessionGate>,
    /// Estimate refresh after removals
    pub estimator: Arc<EstimationEngine>,
}

impl LedgerEnvironment {
    /// Creates a new `LedgerEnvironment`
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        sessions: Arc<dyn SessionGate>,
        estimator: Arc<EstimationEngine>,
    ) -> Self {
        Self {
            clock,
            sessions,
            estimator,
        }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer of the Queue Ledger.
#[derive(Clone, Copy, Debug, Default)]
pub struct LedgerReducer;

impl LedgerReducer {
    /// Creates a new `LedgerReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Checks a transition's precondition against a status.
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` carrying the transition and the status.
    pub fn check(status: QueueStatus, transition: Transition) -> Result<(), QueueError> {
        if transition.permitted_from(status) {
            Ok(())
        } else {
            Err(QueueError::InvalidStateTransition { transition, status })
        }
    }

    fn follow_up_effects(
        entry: &QueueEntry,
        env: &LedgerEnvironment,
    ) -> SmallVec<[Effect<LedgerAction>; 4]> {
        let sessions = Arc::clone(&env.sessions);
        let session_ref = entry.session_ref.clone();
        let estimator = Arc::clone(&env.estimator);
        let station_id = entry.station_id.clone();

        smallvec![Effect::Parallel(vec![
            async_effect! {
                match sessions.revoke(&session_ref).await {
                    Ok(()) => Some(LedgerAction::SessionRevoked { session_ref }),
                    Err(error) => Some(LedgerAction::FollowUpFailed {
                        step: FollowUp::RevokeSession,
                        error: error.to_string(),
                    }),
                }
            },
            async_effect! {
                match estimator.refresh_estimated_wait_times_for_station(&station_id).await {
                    Ok(updated) => Some(LedgerAction::EstimatesRefreshed { station_id, updated }),
                    Err(error) => Some(LedgerAction::FollowUpFailed {
                        step: FollowUp::RefreshEstimates,
                        error: error.to_string(),
                    }),
                }
            },
        ])]
    }

    /// Applies an event to state
    fn apply_event(state: &mut LedgerState, action: &LedgerAction) {
        match action {
            LedgerAction::ServiceStarted {
                counter_id,
                served_by,
                served_at,
            } => {
                state.entry.state = EntryState::Serving(Service {
                    counter_id: counter_id.clone(),
                    served_by: served_by.clone(),
                    served_at: *served_at,
                });
                state.last_error = None;
            },
            LedgerAction::ServiceCompleted { completed_at } => {
                if let EntryState::Serving(service) = &state.entry.state {
                    state.entry.state = EntryState::Completed {
                        service: service.clone(),
                        completed_at: *completed_at,
                    };
                }
                state.last_error = None;
            },
            LedgerAction::QueueCancelled {
                cancelled_at,
                cancelled_by,
            } => {
                state.entry.state = EntryState::Cancelled(Cancellation {
                    cancelled_at: *cancelled_at,
                    cancelled_by: cancelled_by.clone(),
                    service: state.entry.state.service().cloned(),
                });
                state.last_error = None;
            },
            LedgerAction::MarkedNoShow {
                cancelled_at,
                cancelled_by,
            } => {
                state.entry.state = EntryState::NoShow(Cancellation {
                    cancelled_at: *cancelled_at,
                    cancelled_by: Some(cancelled_by.clone().into()),
                    service: state.entry.state.service().cloned(),
                });
                state.last_error = None;
            },
            LedgerAction::TransitionRejected { transition, status } => {
                state.last_error = Some(QueueError::InvalidStateTransition {
                    transition: *transition,
                    status: *status,
                });
            },
            // Commands and feedback are not events
            LedgerAction::StartService { .. }
            | LedgerAction::CompleteService
            | LedgerAction::CancelQueue { .. }
            | LedgerAction::MarkNoShow { .. }
            | LedgerAction::SessionRevoked { .. }
            | LedgerAction::EstimatesRefreshed { .. }
            | LedgerAction::FollowUpFailed { .. } => {},
        }
    }

    fn event_for(command: LedgerAction, now: DateTime<Utc>) -> Option<LedgerAction> {
        match command {
            LedgerAction::StartService {
                counter_id,
                staff_id,
            } => Some(LedgerAction::ServiceStarted {
                counter_id,
                served_by: staff_id,
                served_at: now,
            }),
            LedgerAction::CompleteService => Some(LedgerAction::ServiceCompleted { completed_at: now }),
            LedgerAction::CancelQueue { actor } => Some(LedgerAction::QueueCancelled {
                cancelled_at: now,
                cancelled_by: actor,
            }),
            LedgerAction::MarkNoShow { staff_id } => Some(LedgerAction::MarkedNoShow {
                cancelled_at: now,
                cancelled_by: staff_id,
            }),
            _ => None,
        }
    }
}

impl Reducer for LedgerReducer {
    type State = LedgerState;
    type Action = LedgerAction;
    type Environment = LedgerEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            // ========== Commands ==========
            LedgerAction::StartService { .. }
            | LedgerAction::CompleteService
            | LedgerAction::CancelQueue { .. }
            | LedgerAction::MarkNoShow { .. } => {
                let Some(transition) = action.transition() else {
                    return SmallVec::new();
                };

                if let Err(QueueError::InvalidStateTransition { transition, status }) =
                    Self::check(state.status(), transition)
                {
                    Self::apply_event(
                        state,
                        &LedgerAction::TransitionRejected { transition, status },
                    );
                    return SmallVec::new();
                }

                let Some(event) = Self::event_for(action, env.clock.now()) else {
                    return SmallVec::new();
                };
                Self::apply_event(state, &event);
                state.uncommitted.push(event);

                if transition.removes_from_queue() {
                    Self::follow_up_effects(&state.entry, env)
                } else {
                    smallvec![Effect::None]
                }
            },

            // ========== Events ==========
            LedgerAction::ServiceStarted { .. }
            | LedgerAction::ServiceCompleted { .. }
            | LedgerAction::QueueCancelled { .. }
            | LedgerAction::MarkedNoShow { .. }
            | LedgerAction::TransitionRejected { .. } => {
                Self::apply_event(state, &action);
                smallvec![Effect::None]
            },

            // ========== Follow-up feedback ==========
            LedgerAction::SessionRevoked { ref session_ref } => {
                tracing::debug!(queue_id = %state.entry.id, session = %session_ref, "Session revoked");
                state.follow_ups.push(action);
                smallvec![Effect::None]
            },
            LedgerAction::EstimatesRefreshed {
                ref station_id,
                updated,
            } => {
                tracing::debug!(
                    queue_id = %state.entry.id,
                    station_id = %station_id,
                    updated,
                    "Wait estimates refreshed"
                );
                state.follow_ups.push(action);
                smallvec![Effect::None]
            },
            LedgerAction::FollowUpFailed { step, ref error } => {
                tracing::warn!(
                    queue_id = %state.entry.id,
                    step = ?step,
                    error = %error,
                    "Follow-up after queue removal failed"
                );
                state.follow_ups.push(action);
                smallvec![Effect::None]
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::EstimationConfig;
    use crate::error::SessionError;
    use crate::repository::QueueRepository;
    use crate::types::{CustomerEmail, Purpose, QueueId, QueueNumber};
    use campus_queue_core::document_store::WriteBatch;
    use campus_queue_testing::{assertions, test_clock, InMemoryDocumentStore, ReducerTest};
    use futures::future::BoxFuture;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingGate {
        revoked: Mutex<Vec<SessionRef>>,
        fail: bool,
    }

    impl SessionGate for RecordingGate {
        fn prepare_consumption<'a>(
            &'a self,
            _session: &'a SessionRef,
            _now: DateTime<Utc>,
        ) -> BoxFuture<'a, Result<WriteBatch, SessionError>> {
            Box::pin(async { Ok(WriteBatch::new()) })
        }

        fn revoke<'a>(&'a self, session: &'a SessionRef) -> BoxFuture<'a, Result<(), SessionError>> {
            Box::pin(async move {
                if self.fail {
                    return Err(SessionError::NotFound(session.to_string()));
                }
                self.revoked.lock().unwrap().push(session.clone());
                Ok(())
            })
        }
    }

    fn create_test_env_with(gate: Arc<RecordingGate>) -> LedgerEnvironment {
        let store = Arc::new(InMemoryDocumentStore::new());
        LedgerEnvironment::new(
            Arc::new(test_clock()),
            gate,
            Arc::new(EstimationEngine::new(
                QueueRepository::new(store),
                EstimationConfig::default(),
            )),
        )
    }

    fn create_test_env() -> LedgerEnvironment {
        create_test_env_with(Arc::new(RecordingGate::default()))
    }

    fn waiting_entry() -> QueueEntry {
        QueueEntry {
            id: QueueId::new("q1"),
            station_id: StationId::new("s1"),
            queue_number: QueueNumber::assign("payment", 1),
            purpose: Purpose::Payment,
            customer_email: CustomerEmail::parse("a@campus.edu").unwrap(),
            position: 1,
            estimated_wait_time: None,
            session_ref: SessionRef::new("qr-1"),
            created_at: test_clock().now(),
            state: EntryState::Waiting,
        }
    }

    fn start() -> LedgerAction {
        LedgerAction::StartService {
            counter_id: CounterId::new("c1"),
            staff_id: StaffId::new("staff-1"),
        }
    }

    #[test]
    fn start_service_moves_waiting_to_serving() {
        ReducerTest::new(LedgerReducer::new())
            .with_env(create_test_env())
            .given_state(LedgerState::new(waiting_entry()))
            .when_action(start())
            .then_state(|state| {
                assert_eq!(state.status(), QueueStatus::Serving);
                let service = state.entry.state.service().unwrap();
                assert_eq!(service.counter_id, CounterId::new("c1"));
                assert_eq!(service.served_by, StaffId::new("staff-1"));
                assert_eq!(service.served_at, test_clock().now());
                assert_eq!(state.uncommitted.len(), 1);
                assert!(state.last_error.is_none());
            })
            .then_effects(|effects| assertions::assert_only_noops(effects))
            .run();
    }

    #[test]
    fn complete_service_returns_follow_ups() {
        ReducerTest::new(LedgerReducer::new())
            .with_env(create_test_env())
            .given_state(LedgerState::new(waiting_entry()))
            .given_actions([start()])
            .when_action(LedgerAction::CompleteService)
            .then_state(|state| {
                assert_eq!(state.status(), QueueStatus::Completed);
                assert_eq!(state.entry.state.completed_at(), Some(test_clock().now()));
                assert_eq!(state.uncommitted.len(), 2);
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    fn complete_requires_serving() {
        ReducerTest::new(LedgerReducer::new())
            .with_env(create_test_env())
            .given_state(LedgerState::new(waiting_entry()))
            .when_action(LedgerAction::CompleteService)
            .then_state(|state| {
                assert_eq!(state.status(), QueueStatus::Waiting);
                assert!(state.uncommitted.is_empty());
                assert_eq!(
                    state.last_error.as_ref().unwrap().to_string(),
                    "Cannot complete service. Queue status is \"waiting\""
                );
            })
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .run();
    }

    #[test]
    fn start_on_completed_entry_is_rejected() {
        ReducerTest::new(LedgerReducer::new())
            .with_env(create_test_env())
            .given_state(LedgerState::new(waiting_entry()))
            .given_actions([start(), LedgerAction::CompleteService])
            .when_action(start())
            .then_state(|state| {
                assert_eq!(state.status(), QueueStatus::Completed);
                let message = state.last_error.as_ref().unwrap().to_string();
                assert!(message.contains("completed"), "{message}");
            })
            .run();
    }

    #[test]
    fn cancel_while_serving_keeps_service_record() {
        ReducerTest::new(LedgerReducer::new())
            .with_env(create_test_env())
            .given_state(LedgerState::new(waiting_entry()))
            .given_actions([start()])
            .when_action(LedgerAction::CancelQueue { actor: None })
            .then_state(|state| {
                assert_eq!(state.status(), QueueStatus::Cancelled);
                let cancellation = state.entry.state.cancellation().unwrap();
                assert!(cancellation.cancelled_by.is_none());
                assert!(cancellation.service.is_some());
            })
            .then_effects(|effects| assertions::assert_has_future_effect(effects))
            .run();
    }

    #[test]
    fn no_show_records_staff() {
        ReducerTest::new(LedgerReducer::new())
            .with_env(create_test_env())
            .given_state(LedgerState::new(waiting_entry()))
            .when_action(LedgerAction::MarkNoShow {
                staff_id: StaffId::new("staff-2"),
            })
            .then_state(|state| {
                assert_eq!(state.status(), QueueStatus::NoShow);
                let cancellation = state.entry.state.cancellation().unwrap();
                assert_eq!(cancellation.cancelled_by, Some(ActorId::new("staff-2")));
                assert_eq!(cancellation.cancelled_at, test_clock().now());
                assert!(cancellation.service.is_none());
            })
            .run();
    }

    #[test]
    fn terminal_states_reject_every_transition() {
        let terminal = [
            vec![LedgerAction::CancelQueue { actor: None }],
            vec![LedgerAction::MarkNoShow { staff_id: StaffId::new("s") }],
            vec![start(), LedgerAction::CompleteService],
        ];
        let commands = [
            start(),
            LedgerAction::CompleteService,
            LedgerAction::CancelQueue { actor: None },
            LedgerAction::MarkNoShow { staff_id: StaffId::new("s") },
        ];

        for history in &terminal {
            for command in &commands {
                ReducerTest::new(LedgerReducer::new())
                    .with_env(create_test_env())
                    .given_state(LedgerState::new(waiting_entry()))
                    .given_actions(history.clone())
                    .when_action(command.clone())
                    .then_state(|state| {
                        assert!(state.status().is_terminal());
                        assert!(matches!(
                            state.last_error,
                            Some(QueueError::InvalidStateTransition { .. })
                        ));
                    })
                    .then_effects(|effects| assertions::assert_no_effects(effects))
                    .run();
            }
        }
    }

    #[tokio::test]
    async fn follow_up_feedback_is_recorded() {
        let gate = Arc::new(RecordingGate::default());
        let env = create_test_env_with(Arc::clone(&gate));
        let reducer = LedgerReducer::new();
        let mut state = LedgerState::new(waiting_entry());

        let effects = reducer.reduce(&mut state, LedgerAction::CancelQueue { actor: None }, &env);
        let reduced = campus_queue_runtime::drive(&reducer, &mut state, &env, effects).await;

        assert_eq!(reduced, 2);
        assert_eq!(gate.revoked.lock().unwrap().as_slice(), &[SessionRef::new("qr-1")]);
        assert!(state.follow_ups.contains(&LedgerAction::SessionRevoked {
            session_ref: SessionRef::new("qr-1"),
        }));
        assert!(state.follow_ups.contains(&LedgerAction::EstimatesRefreshed {
            station_id: StationId::new("s1"),
            updated: 0,
        }));
    }

    #[tokio::test]
    async fn failed_follow_up_does_not_undo_transition() {
        let gate = Arc::new(RecordingGate {
            fail: true,
            ..RecordingGate::default()
        });
        let env = create_test_env_with(gate);
        let reducer = LedgerReducer::new();
        let mut state = LedgerState::new(waiting_entry());

        let effects = reducer.reduce(
            &mut state,
            LedgerAction::MarkNoShow { staff_id: StaffId::new("staff-1") },
            &env,
        );
        campus_queue_runtime::drive(&reducer, &mut state, &env, effects).await;

        assert_eq!(state.status(), QueueStatus::NoShow);
        assert!(state.follow_ups.iter().any(|action| matches!(
            action,
            LedgerAction::FollowUpFailed { step: FollowUp::RevokeSession, .. }
        )));
    }
}
