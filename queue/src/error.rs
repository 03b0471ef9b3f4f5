//! Error types of the queue engine.

use crate::types::QueueStatus;
use campus_queue_core::document_store::DocumentStoreError;
use campus_queue_runtime::retry::Transient;
use std::fmt;
use thiserror::Error;

/// Failure category, stable across messages, used to pick a response status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Referenced station, counter, queue entry or session does not exist
    NotFound,
    /// Duplicate active entry, used session, or a conflict that outlived retries
    Conflict,
    /// Join purpose differs from the station type
    PurposeMismatch,
    /// Malformed input
    BadRequest,
    /// Transition not allowed from the entry's current status
    InvalidStateTransition,
    /// Storage or data integrity failure
    Internal,
}

impl ErrorKind {
    /// HTTP status an API layer should answer with
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::PurposeMismatch | Self::BadRequest | Self::InvalidStateTransition => 400,
            Self::Internal => 500,
        }
    }
}

/// Ledger transitions a staff member or customer can request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transition {
    /// waiting → serving
    StartService,
    /// serving → completed
    CompleteService,
    /// waiting|serving → cancelled
    CancelQueue,
    /// waiting|serving → `no_show`
    MarkNoShow,
}

impl Transition {
    /// Phrase used in rejection messages
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::StartService => "start service",
            Self::CompleteService => "complete service",
            Self::CancelQueue => "cancel queue",
            Self::MarkNoShow => "mark as no-show",
        }
    }

    /// Metric label
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::StartService => "start_service",
            Self::CompleteService => "complete_service",
            Self::CancelQueue => "cancel_queue",
            Self::MarkNoShow => "mark_no_show",
        }
    }

    /// Returns `true` if the transition may be applied from `status`
    #[must_use]
    pub const fn permitted_from(self, status: QueueStatus) -> bool {
        match self {
            Self::StartService => matches!(status, QueueStatus::Waiting),
            Self::CompleteService => matches!(status, QueueStatus::Serving),
            Self::CancelQueue | Self::MarkNoShow => status.is_active(),
        }
    }

    /// Returns `true` if a successful transition removes the entry from the active set
    #[must_use]
    pub const fn removes_from_queue(self) -> bool {
        !matches!(self, Self::StartService)
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Errors returned by queue operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    /// Entity lookup failed
    #[error("{0}")]
    NotFound(String),

    /// Request conflicts with existing state
    #[error("{0}")]
    Conflict(String),

    /// Join purpose does not match the station type
    #[error(
        "Purpose mismatch. Station type is \"{station_type}\" but provided purpose is \"{purpose}\"."
    )]
    PurposeMismatch {
        /// Type of the station
        station_type: String,
        /// Purpose the customer asked for
        purpose: String,
    },

    /// Malformed input
    #[error("{0}")]
    BadRequest(String),

    /// Transition outside its precondition
    #[error("Cannot {transition}. Queue status is \"{status}\"")]
    InvalidStateTransition {
        /// Attempted transition
        transition: Transition,
        /// Status the entry was in
        status: QueueStatus,
    },

    /// A concurrent writer changed the documents this operation read.
    ///
    /// Retried internally; surfaces only through [`QueueError::kind`] as a conflict.
    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    /// Storage or data integrity failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Failure category
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) | Self::ConcurrentModification(_) => ErrorKind::Conflict,
            Self::PurposeMismatch { .. } => ErrorKind::PurposeMismatch,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Metric label of the failure category
    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self.kind() {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::PurposeMismatch => "purpose_mismatch",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::InvalidStateTransition => "invalid_state_transition",
            ErrorKind::Internal => "internal",
        }
    }
}

impl Transient for QueueError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::ConcurrentModification(_))
    }
}

impl From<DocumentStoreError> for QueueError {
    fn from(error: DocumentStoreError) -> Self {
        match error {
            DocumentStoreError::NotFound { .. } => Self::NotFound(error.to_string()),
            DocumentStoreError::VersionConflict { .. } | DocumentStoreError::AlreadyExists { .. } => {
                Self::ConcurrentModification(error.to_string())
            },
            DocumentStoreError::InvalidQuery(_)
            | DocumentStoreError::Serialization(_)
            | DocumentStoreError::Backend(_) => Self::Internal(error.to_string()),
        }
    }
}

/// Errors of the session collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No session with this reference
    #[error("Session not found: {0}")]
    NotFound(String),

    /// The session has already been used for a join
    #[error("Session {0} has already been used")]
    AlreadyUsed(String),

    /// The session store failed
    #[error("Session store error: {0}")]
    Store(#[from] DocumentStoreError),
}

impl From<SessionError> for QueueError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::NotFound(_) => Self::NotFound(error.to_string()),
            SessionError::AlreadyUsed(_) => Self::Conflict(error.to_string()),
            SessionError::Store(store) => store.into(),
        }
    }
}

/// Convenience alias for queue results.
pub type Result<T> = std::result::Result<T, QueueError>;
