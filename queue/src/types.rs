//! Domain types for the campus queue.
//!
//! Identifiers, queue entries with their per-status state, and the read-only
//! station/counter lookups. Entries are persisted as flat camelCase documents
//! (see [`QueueRecord`]) with timestamps stored as epoch milliseconds so the
//! store can filter and order on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns `true` if the identifier is empty or whitespace
            #[must_use]
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id! {
    /// Unique identifier of a queue entry (a UUID v4 for entries created here)
    QueueId
}

string_id! {
    /// Identifier of a station
    StationId
}

string_id! {
    /// Identifier of a counter
    CounterId
}

string_id! {
    /// Identity of a staff member
    StaffId
}

string_id! {
    /// Identity recorded as the author of a cancellation (staff or customer)
    ActorId
}

string_id! {
    /// Opaque reference to the customer session a join was made with
    SessionRef
}

impl QueueId {
    /// Creates a new random `QueueId`
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl From<StaffId> for ActorId {
    fn from(staff: StaffId) -> Self {
        Self(staff.0)
    }
}

// ============================================================================
// Value objects
// ============================================================================

/// Service category of a station, and the purpose a customer joins for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    /// Cashier / payment window
    #[default]
    Payment,
    /// Campus clinic
    Clinic,
    /// Auditing office
    Auditing,
    /// Registrar
    Registrar,
}

impl Purpose {
    /// Wire name of the purpose
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Payment => "payment",
            Self::Clinic => "clinic",
            Self::Auditing => "auditing",
            Self::Registrar => "registrar",
        }
    }

    /// Three-letter queue number prefix
    #[must_use]
    pub const fn abbreviation(self) -> &'static str {
        match self {
            Self::Payment => "PAY",
            Self::Clinic => "CLI",
            Self::Auditing => "AUD",
            Self::Registrar => "REG",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Purpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment" => Ok(Self::Payment),
            "clinic" => Ok(Self::Clinic),
            "auditing" => Ok(Self::Auditing),
            "registrar" => Ok(Self::Registrar),
            other => Err(format!(
                "Invalid purpose \"{other}\". Expected one of payment, clinic, auditing, registrar"
            )),
        }
    }
}

/// Human-facing ticket label, e.g. `PAY-001`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueNumber(String);

impl QueueNumber {
    /// Prefix used for station types without a known abbreviation
    pub const FALLBACK_PREFIX: &'static str = "QUE";

    /// Builds the number for a station type and creation position.
    ///
    /// Known station types use their purpose abbreviation, anything else uses
    /// [`Self::FALLBACK_PREFIX`]. Positions are zero-padded to three digits.
    #[must_use]
    pub fn assign(station_type: &str, position: u32) -> Self {
        let prefix = station_type
            .parse::<Purpose>()
            .map_or(Self::FALLBACK_PREFIX, Purpose::abbreviation);
        Self(format!("{prefix}-{position:03}"))
    }

    /// Returns the label
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Customer email, trimmed and lowercased.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerEmail(String);

impl CustomerEmail {
    /// Normalizes and validates a raw email address.
    ///
    /// # Errors
    ///
    /// Returns `"Invalid email format"` when the address has no single `@`,
    /// an empty local part, a domain without a dot, or embedded whitespace.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let email = raw.trim().to_lowercase();
        let valid = match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.contains('@')
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !email.chars().any(char::is_whitespace)
            },
            None => false,
        };
        if valid {
            Ok(Self(email))
        } else {
            Err("Invalid email format".to_string())
        }
    }

    /// Returns the normalized address
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CustomerEmail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Status and state
// ============================================================================

/// Lifecycle status of a queue entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// In line, not yet called
    Waiting,
    /// Being served at a counter
    Serving,
    /// Service finished
    Completed,
    /// Left the queue
    Cancelled,
    /// Did not show up when called
    NoShow,
}

impl QueueStatus {
    /// Statuses that make up a station's active set
    pub const ACTIVE: [Self; 2] = [Self::Waiting, Self::Serving];

    /// Wire name of the status
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Serving => "serving",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no_show",
        }
    }

    /// `true` for `waiting` and `serving`
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Waiting | Self::Serving)
    }

    /// `true` for statuses that can never be left
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "serving" => Ok(Self::Serving),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "no_show" => Ok(Self::NoShow),
            other => Err(format!("Invalid status \"{other}\"")),
        }
    }
}

/// Who served an entry, where and when.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Service {
    /// Counter the entry was called to
    pub counter_id: CounterId,
    /// Staff member who started the service
    pub served_by: StaffId,
    /// When service started
    pub served_at: DateTime<Utc>,
}

/// How an entry left the queue without completing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cancellation {
    /// When the entry was removed
    pub cancelled_at: DateTime<Utc>,
    /// Who removed it, absent for anonymous customer cancellation
    pub cancelled_by: Option<ActorId>,
    /// Service in progress at removal time, if any
    pub service: Option<Service>,
}

/// Status-specific data of a queue entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryState {
    /// In line
    Waiting,
    /// Being served
    Serving(Service),
    /// Served to completion
    Completed {
        /// The service that completed
        service: Service,
        /// When it completed
        completed_at: DateTime<Utc>,
    },
    /// Cancelled by staff or customer
    Cancelled(Cancellation),
    /// Marked as no-show by staff
    NoShow(Cancellation),
}

impl EntryState {
    /// The status this state corresponds to
    #[must_use]
    pub const fn status(&self) -> QueueStatus {
        match self {
            Self::Waiting => QueueStatus::Waiting,
            Self::Serving(_) => QueueStatus::Serving,
            Self::Completed { .. } => QueueStatus::Completed,
            Self::Cancelled(_) => QueueStatus::Cancelled,
            Self::NoShow(_) => QueueStatus::NoShow,
        }
    }

    /// The service record, once the entry has reached `serving`
    #[must_use]
    pub const fn service(&self) -> Option<&Service> {
        match self {
            Self::Waiting => None,
            Self::Serving(service) | Self::Completed { service, .. } => Some(service),
            Self::Cancelled(cancellation) | Self::NoShow(cancellation) => {
                cancellation.service.as_ref()
            },
        }
    }

    /// The cancellation record of a cancelled or no-show entry
    #[must_use]
    pub const fn cancellation(&self) -> Option<&Cancellation> {
        match self {
            Self::Cancelled(cancellation) | Self::NoShow(cancellation) => Some(cancellation),
            _ => None,
        }
    }

    /// Completion time of a completed entry
    #[must_use]
    pub const fn completed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Completed { completed_at, .. } => Some(*completed_at),
            _ => None,
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

/// One customer's visit to a station.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "QueueRecord", into = "QueueRecord")]
pub struct QueueEntry {
    /// Entry id
    pub id: QueueId,
    /// Owning station
    pub station_id: StationId,
    /// Ticket label, fixed at creation
    pub queue_number: QueueNumber,
    /// Purpose, equal to the station type at creation
    pub purpose: Purpose,
    /// Normalized customer email
    pub customer_email: CustomerEmail,
    /// 1-based rank among the station's active entries
    pub position: u32,
    /// Cached wait estimate in minutes
    pub estimated_wait_time: Option<u32>,
    /// Session the entry was created with
    pub session_ref: SessionRef,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Status-specific data
    pub state: EntryState,
}

impl QueueEntry {
    /// Current status
    #[must_use]
    pub const fn status(&self) -> QueueStatus {
        self.state.status()
    }

    /// `true` while the entry holds a position in its station's queue
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.status().is_active()
    }
}

/// Persisted shape of a [`QueueEntry`]: flat camelCase fields keyed by `status`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<QueueId>,
    station_id: StationId,
    queue_number: QueueNumber,
    purpose: Purpose,
    customer_email: CustomerEmail,
    position: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    estimated_wait_time: Option<u32>,
    session_ref: SessionRef,
    status: QueueStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    counter_id: Option<CounterId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    served_by: Option<StaffId>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    served_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    completed_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    cancelled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cancelled_by: Option<ActorId>,
}

impl QueueRecord {
    fn service(&self) -> Result<Option<Service>, String> {
        match (&self.counter_id, &self.served_by, self.served_at) {
            (Some(counter_id), Some(served_by), Some(served_at)) => Ok(Some(Service {
                counter_id: counter_id.clone(),
                served_by: served_by.clone(),
                served_at,
            })),
            (None, None, None) => Ok(None),
            _ => Err("incomplete service fields (counterId, servedBy, servedAt)".to_string()),
        }
    }

    fn required_service(&self) -> Result<Service, String> {
        self.service()?
            .ok_or_else(|| format!("status {} requires service fields", self.status))
    }

    fn cancellation(&self) -> Result<Cancellation, String> {
        let cancelled_at = self
            .cancelled_at
            .ok_or_else(|| format!("status {} requires cancelledAt", self.status))?;
        Ok(Cancellation {
            cancelled_at,
            cancelled_by: self.cancelled_by.clone(),
            service: self.service()?,
        })
    }
}

impl TryFrom<QueueRecord> for QueueEntry {
    type Error = String;

    fn try_from(record: QueueRecord) -> Result<Self, Self::Error> {
        let state = match record.status {
            QueueStatus::Waiting => EntryState::Waiting,
            QueueStatus::Serving => EntryState::Serving(record.required_service()?),
            QueueStatus::Completed => EntryState::Completed {
                service: record.required_service()?,
                completed_at: record
                    .completed_at
                    .ok_or_else(|| "status completed requires completedAt".to_string())?,
            },
            QueueStatus::Cancelled => EntryState::Cancelled(record.cancellation()?),
            QueueStatus::NoShow => EntryState::NoShow(record.cancellation()?),
        };

        Ok(Self {
            id: record.id.ok_or_else(|| "missing id".to_string())?,
            station_id: record.station_id,
            queue_number: record.queue_number,
            purpose: record.purpose,
            customer_email: record.customer_email,
            position: record.position,
            estimated_wait_time: record.estimated_wait_time,
            session_ref: record.session_ref,
            created_at: record.created_at,
            state,
        })
    }
}

impl From<QueueEntry> for QueueRecord {
    fn from(entry: QueueEntry) -> Self {
        let status = entry.status();
        let service = entry.state.service().cloned();
        let completed_at = entry.state.completed_at();
        let (cancelled_at, cancelled_by) = entry
            .state
            .cancellation()
            .map_or((None, None), |c| (Some(c.cancelled_at), c.cancelled_by.clone()));

        Self {
            id: Some(entry.id),
            station_id: entry.station_id,
            queue_number: entry.queue_number,
            purpose: entry.purpose,
            customer_email: entry.customer_email,
            position: entry.position,
            estimated_wait_time: entry.estimated_wait_time,
            session_ref: entry.session_ref,
            status,
            created_at: entry.created_at,
            counter_id: service.as_ref().map(|s| s.counter_id.clone()),
            served_by: service.as_ref().map(|s| s.served_by.clone()),
            served_at: service.map(|s| s.served_at),
            completed_at,
            cancelled_at,
            cancelled_by,
        }
    }
}

/// A service point. Read-only here; managed by the admin surface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    /// Station id
    pub id: StationId,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Station type; joins must state a matching purpose
    #[serde(rename = "type")]
    pub station_type: String,
}

/// A staffed service window of a station.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counter {
    /// Counter id
    pub id: CounterId,
    /// Owning station
    pub station_id: StationId,
    /// Staff member currently assigned, if any
    #[serde(default)]
    pub assigned_staff_id: Option<StaffId>,
}

impl Counter {
    /// A counter counts toward throughput when someone is assigned to it
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.assigned_staff_id.is_some()
    }
}

/// Per-station document whose version serializes changes to the active set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationSequence {
    /// Station the sequence belongs to
    pub station_id: StationId,
    /// Number of active entries after the last write
    pub active_count: u32,
    /// Time of the last write
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}
