//! Station Queue Coordinator - owns the active set of each station.
//!
//! Every write that changes a station's active set (a join or a removal) runs
//! as an optimistic compare-and-swap:
//!
//! 1. Read the station's [`StationSequence`] document and its version
//! 2. Read the active entries (positions, versions)
//! 3. Stage the writes, each guarded by the version it was read at,
//!    plus the sequence update
//! 4. Commit atomically; on a version conflict start over
//!
//! The sequence is read before the active set, so any concurrent join or
//! removal that lands in between invalidates the sequence precondition.

use crate::error::{QueueError, Result, Transition};
use crate::ledger::{LedgerAction, LedgerEnvironment, LedgerReducer, LedgerState};
use crate::metrics;
use crate::repository::{
    stage_entry, stage_new_entry, stage_position, stage_sequence, QueueRepository, Versioned,
};
use crate::session::SessionGate;
use crate::types::{
    CustomerEmail, EntryState, Purpose, QueueEntry, QueueId, QueueNumber, SessionRef, Station,
    StationId, StationSequence,
};
use campus_queue_core::document_store::{Version, WriteBatch};
use campus_queue_core::effect::Effect;
use campus_queue_core::reducer::Reducer;
use campus_queue_core::SmallVec;
use campus_queue_runtime::retry::{retry_with_backoff, RetryPolicy, Transient};
use std::sync::Arc;

/// A position decrement planned by [`plan_resequence`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PositionChange {
    /// Entry to move up
    pub id: QueueId,
    /// Version the entry was read at
    pub read_at: Version,
    /// Position before the removal
    pub from: u32,
    /// Position after the removal
    pub to: u32,
}

/// Plans the compaction of a station's active set after the entry at
/// `removed_position` leaves it.
///
/// `active` is the snapshot taken before the removal write. Entries behind the
/// removed one move up by one; entries ahead of it are untouched.
#[must_use]
pub fn plan_resequence(active: &[Versioned<QueueEntry>], removed_position: u32) -> Vec<PositionChange> {
    active
        .iter()
        .filter(|entry| entry.value.position > removed_position)
        .map(|entry| PositionChange {
            id: entry.value.id.clone(),
            read_at: entry.version,
            from: entry.value.position,
            to: entry.value.position - 1,
        })
        .collect()
}

fn exhausted(error: QueueError, station_id: &StationId) -> QueueError {
    match error {
        QueueError::ConcurrentModification(_) => QueueError::Conflict(format!(
            "Concurrent modification of station {station_id} queue; retry the request"
        )),
        other => other,
    }
}

fn observe<T>(outcome: Result<T>) -> Result<T> {
    if let Err(error) = &outcome {
        if error.is_transient() {
            metrics::record_conflict_retry();
            tracing::debug!(error = %error, "Queue write lost a concurrent update");
        }
    }
    outcome
}

/// Result of a committed ledger transition.
pub struct CommittedTransition {
    /// Ledger state after the commit
    pub state: LedgerState,
    /// Positions compacted by the commit
    pub resequenced: usize,
}

/// Coordinates the entries of a station.
#[derive(Clone)]
pub struct StationQueueCoordinator {
    repository: QueueRepository,
    sessions: Arc<dyn SessionGate>,
    ledger: LedgerReducer,
    ledger_env: LedgerEnvironment,
    retry: RetryPolicy,
}

impl StationQueueCoordinator {
    /// Creates a coordinator
    #[must_use]
    pub fn new(
        repository: QueueRepository,
        sessions: Arc<dyn SessionGate>,
        ledger_env: LedgerEnvironment,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            repository,
            sessions,
            ledger: LedgerReducer::new(),
            ledger_env,
            retry,
        }
    }

    // ========================================================================
    // Join
    // ========================================================================

    /// Appends a new waiting entry to a station's queue.
    ///
    /// The station must already be loaded and the purpose checked against it.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the customer already has an active entry at the station,
    ///   the session was already used, or conflicts outlived the retries
    /// - `NotFound` if the session does not exist
    /// - `Internal` on store failures
    pub async fn join(
        &self,
        station: &Station,
        email: &CustomerEmail,
        purpose: Purpose,
        session_ref: &SessionRef,
    ) -> Result<QueueEntry> {
        let entry = retry_with_backoff(&self.retry, || async move {
            observe(self.try_join(station, email, purpose, session_ref).await)
        })
        .await
        .map_err(|e| exhausted(e, &station.id))?;

        metrics::record_join(entry.position);
        tracing::info!(
            queue_id = %entry.id,
            station_id = %station.id,
            queue_number = %entry.queue_number,
            position = entry.position,
            "Customer joined queue"
        );
        Ok(entry)
    }

    async fn try_join(
        &self,
        station: &Station,
        email: &CustomerEmail,
        purpose: Purpose,
        session_ref: &SessionRef,
    ) -> Result<QueueEntry> {
        let sequence = self.repository.sequence(&station.id).await?;

        if self.repository.find_active_by_email(&station.id, email).await?.is_some() {
            return Err(QueueError::Conflict(
                "You are already in the queue, or try another email address".to_string(),
            ));
        }

        let active = self.repository.active_entries(&station.id).await?;
        let position = u32::try_from(active.len())
            .map_err(|_| QueueError::Internal(format!("Station {} queue is full", station.id)))?
            + 1;
        let now = self.ledger_env.clock.now();

        let mut batch = self.sessions.prepare_consumption(session_ref, now).await?;

        let entry = QueueEntry {
            id: QueueId::generate(),
            station_id: station.id.clone(),
            queue_number: QueueNumber::assign(&station.station_type, position),
            purpose,
            customer_email: email.clone(),
            position,
            estimated_wait_time: None,
            session_ref: session_ref.clone(),
            created_at: now,
            state: EntryState::Waiting,
        };
        stage_new_entry(&mut batch, &entry)?;
        stage_sequence(
            &mut batch,
            sequence.map(|read| read.version),
            &StationSequence {
                station_id: station.id.clone(),
                active_count: position,
                updated_at: now,
            },
        )?;

        self.repository.commit(batch).await?;
        Ok(entry)
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Reduces a ledger command against an entry and commits the result.
    ///
    /// Removals commit the status write, the position compaction and the
    /// sequence update in one batch. Post-commit follow-ups run before this
    /// returns; their failures are logged and do not undo the transition.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown entry, or an unknown counter on start
    /// - `InvalidStateTransition` when the entry's status does not allow the command
    /// - `Conflict` if conflicts outlived the retries
    /// - `Internal` on store failures
    pub async fn apply(&self, queue_id: &QueueId, command: LedgerAction) -> Result<CommittedTransition> {
        let transition = command
            .transition()
            .ok_or_else(|| QueueError::Internal("Ledger events cannot be applied as commands".to_string()))?;
        let station_id = self.repository.require_entry(queue_id).await?.value.station_id;

        let command = &command;
        let (mut state, effects, resequenced) = retry_with_backoff(&self.retry, || async move {
            observe(self.try_apply(queue_id, transition, command.clone()).await)
        })
        .await
        .map_err(|e| exhausted(e, &station_id))?;

        let events = state.take_uncommitted();
        metrics::record_transition(transition);
        metrics::record_resequenced(resequenced);
        tracing::info!(
            queue_id = %queue_id,
            station_id = %station_id,
            transition = %transition,
            status = %state.status(),
            events = events.len(),
            resequenced,
            "Queue transition committed"
        );

        if let EntryState::Completed { service, completed_at } = &state.entry.state {
            #[allow(clippy::cast_precision_loss)]
            let minutes = (*completed_at - service.served_at).num_milliseconds() as f64 / 60_000.0;
            metrics::record_service_duration(minutes);
        }

        campus_queue_runtime::drive(&self.ledger, &mut state, &self.ledger_env, effects).await;

        Ok(CommittedTransition { state, resequenced })
    }

    async fn try_apply(
        &self,
        queue_id: &QueueId,
        transition: Transition,
        command: LedgerAction,
    ) -> Result<(LedgerState, SmallVec<[Effect<LedgerAction>; 4]>, usize)> {
        let current = self.repository.require_entry(queue_id).await?;
        LedgerReducer::check(current.value.status(), transition)?;

        if let LedgerAction::StartService { counter_id, .. } = &command {
            self.repository.require_counter(counter_id).await?;
        }

        let station_id = current.value.station_id.clone();
        let removed_position = current.value.position;
        let mut batch = WriteBatch::new();
        let mut resequenced = 0;

        if transition.removes_from_queue() {
            let sequence = self.repository.sequence(&station_id).await?;
            let active = self.repository.active_entries(&station_id).await?;

            let plan = plan_resequence(&active, removed_position);
            for change in &plan {
                stage_position(&mut batch, &change.id, change.read_at, change.to);
            }
            resequenced = plan.len();

            let remaining = u32::try_from(active.len().saturating_sub(1)).unwrap_or(u32::MAX);
            stage_sequence(
                &mut batch,
                sequence.map(|read| read.version),
                &StationSequence {
                    station_id: station_id.clone(),
                    active_count: remaining,
                    updated_at: self.ledger_env.clock.now(),
                },
            )?;
        }

        let mut state = LedgerState::new(current.value);
        let effects = self.ledger.reduce(&mut state, command, &self.ledger_env);
        if let Some(error) = state.last_error.take() {
            return Err(error);
        }

        stage_entry(&mut batch, &state.entry, current.version)?;
        self.repository.commit(batch).await?;
        Ok((state, effects, resequenced))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{CounterId, CustomerEmail, Purpose, QueueNumber, SessionRef, StaffId};
    use campus_queue_testing::test_clock;
    use campus_queue_core::environment::Clock;

    fn active(id: &str, position: u32, version: u64) -> Versioned<QueueEntry> {
        Versioned {
            version: Version::new(version),
            value: QueueEntry {
                id: QueueId::new(id),
                station_id: StationId::new("s1"),
                queue_number: QueueNumber::assign("payment", position),
                purpose: Purpose::Payment,
                customer_email: CustomerEmail::parse(&format!("{id}@campus.edu")).unwrap(),
                position,
                estimated_wait_time: None,
                session_ref: SessionRef::new(format!("qr-{id}")),
                created_at: test_clock().now(),
                state: if position == 1 {
                    EntryState::Serving(crate::types::Service {
                        counter_id: CounterId::new("c1"),
                        served_by: StaffId::new("staff"),
                        served_at: test_clock().now(),
                    })
                } else {
                    EntryState::Waiting
                },
            },
        }
    }

    #[test]
    fn removal_in_the_middle_moves_later_entries_up() {
        let snapshot = vec![active("a", 1, 3), active("b", 2, 1), active("c", 3, 2), active("d", 4, 1)];

        let plan = plan_resequence(&snapshot, 2);

        assert_eq!(
            plan,
            vec![
                PositionChange { id: QueueId::new("c"), read_at: Version::new(2), from: 3, to: 2 },
                PositionChange { id: QueueId::new("d"), read_at: Version::new(1), from: 4, to: 3 },
            ]
        );
    }

    #[test]
    fn removing_the_last_entry_plans_nothing() {
        let snapshot = vec![active("a", 1, 1), active("b", 2, 1)];
        assert!(plan_resequence(&snapshot, 2).is_empty());
    }

    #[test]
    fn removing_the_head_moves_everyone() {
        let snapshot = vec![active("a", 1, 1), active("b", 2, 1), active("c", 3, 1)];
        let plan = plan_resequence(&snapshot, 1);
        let targets: Vec<u32> = plan.iter().map(|change| change.to).collect();
        assert_eq!(targets, vec![1, 2]);
    }

    #[test]
    fn exhausted_conflicts_name_the_station() {
        let error = exhausted(
            QueueError::ConcurrentModification("version".into()),
            &StationId::new("s1"),
        );
        assert_eq!(
            error.to_string(),
            "Concurrent modification of station s1 queue; retry the request"
        );
        assert_eq!(error.kind(), crate::error::ErrorKind::Conflict);
    }
}
