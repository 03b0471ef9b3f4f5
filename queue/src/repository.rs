//! Typed access to the queue collections of the document store.
//!
//! Reads decode documents into domain types; writes are staged into a
//! [`WriteBatch`] so callers decide what commits atomically.

use crate::error::{QueueError, Result};
use crate::types::{
    Counter, CounterId, CustomerEmail, QueueEntry, QueueId, QueueStatus, SessionRef, Station,
    StationId, StationSequence,
};
use campus_queue_core::document_store::{
    encode, Direction, Document, DocumentId, DocumentStore, Query, Version, WriteBatch,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;

/// Collection names.
pub mod collections {
    /// Queue entries
    pub const QUEUE: &str = "queue";
    /// Stations
    pub const STATIONS: &str = "stations";
    /// Counters
    pub const COUNTERS: &str = "counters";
    /// One [`StationSequence`](crate::types::StationSequence) per station
    pub const STATION_QUEUES: &str = "station_queues";
    /// Customer sessions
    pub const CUSTOMER_SESSIONS: &str = "customer_sessions";
}

/// A decoded document together with the version it was read at.
#[derive(Clone, Debug, PartialEq)]
pub struct Versioned<T> {
    /// Version usable as a write precondition
    pub version: Version,
    /// Decoded value
    pub value: T,
}

fn decode<T: serde::de::DeserializeOwned>(doc: &Document) -> Result<Versioned<T>> {
    Ok(Versioned {
        version: doc.version,
        value: doc.decode()?,
    })
}

fn decode_all<T: serde::de::DeserializeOwned>(docs: &[Document]) -> Result<Vec<T>> {
    docs.iter()
        .map(|doc| doc.decode::<T>().map_err(QueueError::from))
        .collect()
}

fn status_values(statuses: &[QueueStatus]) -> Vec<&'static str> {
    statuses.iter().map(|status| status.as_str()).collect()
}

/// Which owner a listing is scoped to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListScope {
    /// Entries of a station
    Station(StationId),
    /// Entries called to a counter
    Counter(CounterId),
}

/// Repository over the queue collections.
#[derive(Clone)]
pub struct QueueRepository {
    store: Arc<dyn DocumentStore>,
}

impl QueueRepository {
    /// Creates a repository over a store
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    /// Loads a queue entry.
    ///
    /// # Errors
    ///
    /// `NotFound` if the entry does not exist, `Internal` on store failures.
    pub async fn require_entry(&self, id: &QueueId) -> Result<Versioned<QueueEntry>> {
        let doc_id = DocumentId::new(id.as_str());
        match self.store.get(collections::QUEUE, &doc_id).await? {
            Some(doc) => decode(&doc),
            None => Err(QueueError::NotFound(format!("Queue not found: {id}"))),
        }
    }

    /// Loads a station.
    ///
    /// # Errors
    ///
    /// `NotFound` if the station does not exist, `Internal` on store failures.
    pub async fn require_station(&self, id: &StationId) -> Result<Station> {
        let doc_id = DocumentId::new(id.as_str());
        match self.store.get(collections::STATIONS, &doc_id).await? {
            Some(doc) => Ok(doc.decode()?),
            None => Err(QueueError::NotFound("Station not found.".to_string())),
        }
    }

    /// Loads a counter.
    ///
    /// # Errors
    ///
    /// `NotFound` if the counter does not exist, `Internal` on store failures.
    pub async fn require_counter(&self, id: &CounterId) -> Result<Counter> {
        let doc_id = DocumentId::new(id.as_str());
        match self.store.get(collections::COUNTERS, &doc_id).await? {
            Some(doc) => Ok(doc.decode()?),
            None => Err(QueueError::NotFound("Counter not found".to_string())),
        }
    }

    /// Every station.
    ///
    /// # Errors
    ///
    /// `Internal` on store or decoding failures.
    pub async fn stations(&self) -> Result<Vec<Station>> {
        let docs = self.store.query(Query::collection(collections::STATIONS)).await?;
        decode_all(&docs)
    }

    /// Counters of a station.
    ///
    /// # Errors
    ///
    /// `Internal` on store or decoding failures.
    pub async fn counters_for_station(&self, station_id: &StationId) -> Result<Vec<Counter>> {
        let docs = self
            .store
            .query(Query::collection(collections::COUNTERS).where_eq("stationId", station_id.as_str()))
            .await?;
        decode_all(&docs)
    }

    /// The station's active entries, ordered by position.
    ///
    /// # Errors
    ///
    /// `Internal` on store or decoding failures.
    pub async fn active_entries(&self, station_id: &StationId) -> Result<Vec<Versioned<QueueEntry>>> {
        let docs = self
            .store
            .query(
                Query::collection(collections::QUEUE)
                    .where_eq("stationId", station_id.as_str())
                    .where_in("status", status_values(&QueueStatus::ACTIVE))
                    .order_by("position", Direction::Ascending),
            )
            .await?;
        tracing::debug!(station_id = %station_id, active = docs.len(), "Loaded active entries");
        docs.iter().map(decode::<QueueEntry>).collect()
    }

    /// The active entry of a customer at a station, if any.
    ///
    /// # Errors
    ///
    /// `Internal` on store or decoding failures.
    pub async fn find_active_by_email(
        &self,
        station_id: &StationId,
        email: &CustomerEmail,
    ) -> Result<Option<QueueEntry>> {
        let docs = self
            .store
            .query(
                Query::collection(collections::QUEUE)
                    .where_eq("stationId", station_id.as_str())
                    .where_eq("customerEmail", email.as_str())
                    .where_in("status", status_values(&QueueStatus::ACTIVE))
                    .limit(1),
            )
            .await?;
        docs.first().map(|doc| doc.decode().map_err(QueueError::from)).transpose()
    }

    /// The first entry created with a session, optionally restricted to a status.
    ///
    /// # Errors
    ///
    /// `Internal` on store or decoding failures.
    pub async fn find_by_session(
        &self,
        session_ref: &SessionRef,
        status: Option<QueueStatus>,
    ) -> Result<Option<QueueEntry>> {
        let mut query = Query::collection(collections::QUEUE)
            .where_eq("sessionRef", session_ref.as_str());
        if let Some(status) = status {
            query = query.where_eq("status", status.as_str());
        }
        let docs = self
            .store
            .query(query.order_by("createdAt", Direction::Ascending).limit(1))
            .await?;
        docs.first().map(|doc| doc.decode().map_err(QueueError::from)).transpose()
    }

    /// One page of entries of a station or counter, ordered by position.
    ///
    /// # Errors
    ///
    /// `NotFound` if the cursor entry does not exist, `Internal` on other failures.
    pub async fn page(
        &self,
        scope: &ListScope,
        status: Option<QueueStatus>,
        limit: usize,
        cursor: Option<&QueueId>,
    ) -> Result<Vec<QueueEntry>> {
        let mut query = match scope {
            ListScope::Station(id) => {
                Query::collection(collections::QUEUE).where_eq("stationId", id.as_str())
            },
            ListScope::Counter(id) => {
                Query::collection(collections::QUEUE).where_eq("counterId", id.as_str())
            },
        };
        if let Some(status) = status {
            query = query.where_eq("status", status.as_str());
        }
        query = query.order_by("position", Direction::Ascending).limit(limit);
        if let Some(cursor) = cursor {
            query = query.start_after(DocumentId::new(cursor.as_str()));
        }

        let docs = self.store.query(query).await.map_err(|e| match e {
            campus_queue_core::document_store::DocumentStoreError::NotFound { id, .. } => {
                QueueError::NotFound(format!("Cursor not found: {id}"))
            },
            other => other.into(),
        })?;
        decode_all(&docs)
    }

    /// Completed entries of a station, most recently completed first.
    ///
    /// # Errors
    ///
    /// `Internal` on store or decoding failures.
    pub async fn recent_completed(
        &self,
        station_id: &StationId,
        limit: usize,
    ) -> Result<Vec<QueueEntry>> {
        let docs = self
            .store
            .query(
                Query::collection(collections::QUEUE)
                    .where_eq("stationId", station_id.as_str())
                    .where_eq("status", QueueStatus::Completed.as_str())
                    .order_by("completedAt", Direction::Descending)
                    .limit(limit),
            )
            .await?;
        decode_all(&docs)
    }

    /// Served entries (serving or completed) of a station, latest `servedAt` first.
    ///
    /// With a range, only entries served inside it; otherwise the `limit` most recent.
    ///
    /// # Errors
    ///
    /// `Internal` on store or decoding failures.
    pub async fn served_entries(
        &self,
        station_id: &StationId,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>> {
        let mut query = Query::collection(collections::QUEUE)
            .where_eq("stationId", station_id.as_str())
            .where_in(
                "status",
                status_values(&[QueueStatus::Completed, QueueStatus::Serving]),
            );
        query = match range {
            Some((start, end)) => query
                .where_gte("servedAt", start.timestamp_millis())
                .where_lte("servedAt", end.timestamp_millis())
                .order_by("servedAt", Direction::Descending),
            None => query.order_by("servedAt", Direction::Descending).limit(limit),
        };
        let docs = self.store.query(query).await?;
        decode_all(&docs)
    }

    /// Number of entries of a station completed inside a range.
    ///
    /// # Errors
    ///
    /// `Internal` on store failures.
    pub async fn completed_count(
        &self,
        station_id: &StationId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<usize> {
        let docs = self
            .store
            .query(
                Query::collection(collections::QUEUE)
                    .where_eq("stationId", station_id.as_str())
                    .where_eq("status", QueueStatus::Completed.as_str())
                    .where_gte("completedAt", start.timestamp_millis())
                    .where_lte("completedAt", end.timestamp_millis()),
            )
            .await?;
        Ok(docs.len())
    }

    /// The station's sequence document, if one has been written.
    ///
    /// # Errors
    ///
    /// `Internal` on store or decoding failures.
    pub async fn sequence(&self, station_id: &StationId) -> Result<Option<Versioned<StationSequence>>> {
        let doc_id = DocumentId::new(station_id.as_str());
        self.store
            .get(collections::STATION_QUEUES, &doc_id)
            .await?
            .as_ref()
            .map(decode::<StationSequence>)
            .transpose()
    }

    /// Commits a batch.
    ///
    /// # Errors
    ///
    /// `ConcurrentModification` when a precondition fails, `Internal` on other failures.
    pub async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        Ok(self.store.commit(batch).await?)
    }
}

// ----------------------------------------------------------------------
// Staged writes
// ----------------------------------------------------------------------

/// Stages creation of a new entry.
///
/// # Errors
///
/// `Internal` if the entry does not serialize.
pub fn stage_new_entry(batch: &mut WriteBatch, entry: &QueueEntry) -> Result<()> {
    batch.create(collections::QUEUE, DocumentId::new(entry.id.as_str()), encode(entry)?);
    Ok(())
}

/// Stages the full current state of an entry, guarded by the version it was read at.
///
/// # Errors
///
/// `Internal` if the entry does not serialize.
pub fn stage_entry(batch: &mut WriteBatch, entry: &QueueEntry, read_at: Version) -> Result<()> {
    batch.update(
        collections::QUEUE,
        DocumentId::new(entry.id.as_str()),
        serde_json::Value::Object(encode(entry)?),
        Some(read_at),
    );
    Ok(())
}

/// Stages a position change, guarded by the version the entry was read at.
pub fn stage_position(batch: &mut WriteBatch, id: &QueueId, read_at: Version, position: u32) {
    batch.update(
        collections::QUEUE,
        DocumentId::new(id.as_str()),
        json!({ "position": position }),
        Some(read_at),
    );
}

/// Stages a wait estimate (best effort, unguarded).
pub fn stage_estimate(batch: &mut WriteBatch, id: &QueueId, minutes: u32) {
    batch.update(
        collections::QUEUE,
        DocumentId::new(id.as_str()),
        json!({ "estimatedWaitTime": minutes }),
        None,
    );
}

/// Stages the station sequence write that serializes active-set changes.
///
/// Creates the document when it was never written; otherwise updates it under
/// the version it was read at.
///
/// # Errors
///
/// `Internal` if the sequence does not serialize.
pub fn stage_sequence(
    batch: &mut WriteBatch,
    read: Option<Version>,
    sequence: &StationSequence,
) -> Result<()> {
    let id = DocumentId::new(sequence.station_id.as_str());
    let fields = encode(sequence)?;
    match read {
        Some(version) => {
            batch.update(
                collections::STATION_QUEUES,
                id,
                serde_json::Value::Object(fields),
                Some(version),
            );
        },
        None => {
            batch.create(collections::STATION_QUEUES, id, fields);
        },
    }
    Ok(())
}
