//! Customer session collaborator.
//!
//! Sessions are issued elsewhere (QR scan, cookie). The queue engine only
//! consumes a session when joining and revokes it once the visit is over.

use crate::error::SessionError;
use crate::repository::collections;
use crate::types::SessionRef;
use campus_queue_core::document_store::{DocumentId, DocumentStore, WriteBatch};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Stored session record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerSession {
    /// What the session was used for (`queue` once joined)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub session_type: Option<String>,
    /// Set once the session has been consumed
    #[serde(default)]
    pub used: bool,
    /// When the session was consumed
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub used_at: Option<DateTime<Utc>>,
    /// `completed` once the visit is over
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Access to customer sessions.
///
/// Returns boxed futures so the gate can live behind `Arc<dyn SessionGate>`.
pub trait SessionGate: Send + Sync {
    /// Checks that a session can be used for a join and returns the writes that
    /// consume it. The caller commits them atomically with the new entry, so a
    /// session joins at most once.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown session, `AlreadyUsed` for a consumed one.
    fn prepare_consumption<'a>(
        &'a self,
        session: &'a SessionRef,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<WriteBatch, SessionError>>;

    /// Marks a session as finished after its entry left the queue.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown session, `Store` on store failures.
    fn revoke<'a>(&'a self, session: &'a SessionRef) -> BoxFuture<'a, Result<(), SessionError>>;
}

/// [`SessionGate`] over the `customer_sessions` collection.
#[derive(Clone)]
pub struct DocumentSessionGate {
    store: Arc<dyn DocumentStore>,
}

impl DocumentSessionGate {
    /// Creates a gate over a store
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

impl SessionGate for DocumentSessionGate {
    fn prepare_consumption<'a>(
        &'a self,
        session: &'a SessionRef,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<WriteBatch, SessionError>> {
        Box::pin(async move {
            let id = DocumentId::new(session.as_str());
            let doc = self
                .store
                .get(collections::CUSTOMER_SESSIONS, &id)
                .await?
                .ok_or_else(|| SessionError::NotFound(session.to_string()))?;
            let record: CustomerSession = doc.decode()?;
            if record.used {
                return Err(SessionError::AlreadyUsed(session.to_string()));
            }

            let mut batch = WriteBatch::new();
            batch.update(
                collections::CUSTOMER_SESSIONS,
                id,
                json!({ "type": "queue", "used": true, "usedAt": now.timestamp_millis() }),
                Some(doc.version),
            );
            Ok(batch)
        })
    }

    fn revoke<'a>(&'a self, session: &'a SessionRef) -> BoxFuture<'a, Result<(), SessionError>> {
        Box::pin(async move {
            let id = DocumentId::new(session.as_str());
            if self.store.get(collections::CUSTOMER_SESSIONS, &id).await?.is_none() {
                return Err(SessionError::NotFound(session.to_string()));
            }

            let mut batch = WriteBatch::new();
            batch.update(
                collections::CUSTOMER_SESSIONS,
                id,
                json!({ "used": true, "status": "completed" }),
                None,
            );
            self.store.commit(batch).await?;
            tracing::debug!(session = %session, "Session revoked");
            Ok(())
        })
    }
}
