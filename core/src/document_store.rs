//! Document store trait and related types.
//!
//! This module defines the persistence seam of the queue engine: a transactional
//! document store holding JSON documents grouped into named collections.
//!
//! # Design
//!
//! The `DocumentStore` trait is deliberately minimal. It provides exactly what the
//! queue engine needs:
//!
//! - Point reads by collection and document id
//! - Queries with equality/`in`/range filters, a single ordering, a limit and a
//!   "start after" cursor
//! - Atomic batch writes (all-or-nothing) with optional per-document version
//!   preconditions for optimistic concurrency
//!
//! Every document carries a [`Version`] that the store increments on each write.
//! Callers that read-then-write pass the version they read as a precondition; a
//! concurrent writer makes the batch fail with [`DocumentStoreError::VersionConflict`]
//! and nothing in the batch becomes visible.
//!
//! # Implementations
//!
//! - `InMemoryDocumentStore` (in `campus-queue-testing`): fast, deterministic testing
//!   and the demo binary
//!
//! # Example
//!
//! ```no_run
//! use campus_queue_core::document_store::{
//!     Direction, DocumentId, DocumentStore, DocumentStoreError, Query, WriteBatch,
//! };
//! use serde_json::json;
//!
//! async fn example<S: DocumentStore>(store: &S) -> Result<(), DocumentStoreError> {
//!     let waiting = store
//!         .query(
//!             Query::collection("queue")
//!                 .where_eq("stationId", "station-1")
//!                 .where_in("status", ["waiting", "serving"])
//!                 .order_by("position", Direction::Ascending)
//!                 .limit(10),
//!         )
//!         .await?;
//!
//!     let mut batch = WriteBatch::new();
//!     for doc in &waiting {
//!         batch.update(
//!             "queue",
//!             doc.id.clone(),
//!             json!({ "estimatedWaitTime": 0 }),
//!             Some(doc.version),
//!         );
//!     }
//!     store.commit(batch).await
//! }
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Field map of a stored document.
pub type Fields = Map<String, Value>;

/// Boxed future returned by [`DocumentStore`] methods.
pub type StoreFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, DocumentStoreError>> + Send + 'a>>;

/// Identifier of a document inside its collection.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    /// Creates a document id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-document write counter used for optimistic concurrency.
///
/// A freshly created document is at version 1; every committed write that touches
/// the document increments it by one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// Version of a document that has just been created
    pub const INITIAL: Self = Self(1);

    /// Creates a version from a raw counter
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw counter
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Returns the version a write produces
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A document as returned by reads and queries.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    /// Document id
    pub id: DocumentId,
    /// Version at read time, usable as a write precondition
    pub version: Version,
    /// Stored fields
    pub fields: Fields,
}

impl Document {
    /// Returns a field value
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Deserializes the document fields into a typed record.
    ///
    /// The document id is injected as an `id` field so records can carry it.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the stored fields do not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DocumentStoreError> {
        let mut fields = self.fields.clone();
        fields.insert("id".to_string(), Value::String(self.id.0.clone()));
        serde_json::from_value(Value::Object(fields)).map_err(|e| {
            DocumentStoreError::Serialization(format!("document {}: {e}", self.id))
        })
    }
}

/// Serializes a typed record into a field map, dropping its `id` field.
///
/// # Errors
///
/// Returns `Serialization` if the record does not serialize to a JSON object.
pub fn encode<T: Serialize>(record: &T) -> Result<Fields, DocumentStoreError> {
    match serde_json::to_value(record) {
        Ok(Value::Object(mut fields)) => {
            fields.remove("id");
            Ok(fields)
        },
        Ok(other) => Err(DocumentStoreError::Serialization(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(e) => Err(DocumentStoreError::Serialization(e.to_string())),
    }
}

// ============================================================================
// Queries
// ============================================================================

/// Comparison applied by a [`Filter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOp {
    /// Field equals the value
    Eq,
    /// Field equals one of the values of an array
    In,
    /// Field is greater than or equal to the value
    Gte,
    /// Field is less than or equal to the value
    Lte,
}

/// A single field predicate. Documents missing the field never match.
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    /// Field name
    pub field: String,
    /// Comparison
    pub op: FilterOp,
    /// Operand (an array for `In`)
    pub value: Value,
}

impl Filter {
    /// Returns `true` if the document fields satisfy this predicate
    #[must_use]
    pub fn matches(&self, fields: &Fields) -> bool {
        let Some(actual) = fields.get(&self.field) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => compare_values(actual, &self.value) == Ordering::Equal,
            FilterOp::In => match &self.value {
                Value::Array(candidates) => candidates
                    .iter()
                    .any(|candidate| compare_values(actual, candidate) == Ordering::Equal),
                _ => false,
            },
            FilterOp::Gte => {
                same_kind(actual, &self.value)
                    && compare_values(actual, &self.value) != Ordering::Less
            },
            FilterOp::Lte => {
                same_kind(actual, &self.value)
                    && compare_values(actual, &self.value) != Ordering::Greater
            },
        }
    }
}

/// Sort direction of a query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Smallest first
    Ascending,
    /// Largest first
    Descending,
}

/// Ordering clause. Documents missing the field are excluded from ordered queries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderBy {
    /// Field name
    pub field: String,
    /// Direction
    pub direction: Direction,
}

/// A collection query: filters are AND-ed, then ordering, cursor and limit apply.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    /// Collection to scan
    pub collection: String,
    /// Predicates, all of which must match
    pub filters: Vec<Filter>,
    /// Optional ordering (ties are broken by document id in the same direction)
    pub order_by: Option<OrderBy>,
    /// Maximum number of documents to return
    pub limit: Option<usize>,
    /// Return only documents ordered strictly after this one.
    ///
    /// The cursor document must exist in the collection; it does not have to
    /// match the filters.
    pub start_after: Option<DocumentId>,
}

impl Query {
    /// Starts a query over a collection
    #[must_use]
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
            start_after: None,
        }
    }

    /// Adds an equality filter
    #[must_use]
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        });
        self
    }

    /// Adds a membership filter
    #[must_use]
    pub fn where_in<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.filters.push(Filter {
            field: field.into(),
            op: FilterOp::In,
            value: Value::Array(values.into_iter().map(Into::into).collect()),
        });
        self
    }

    /// Adds a lower bound (inclusive)
    #[must_use]
    pub fn where_gte(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op: FilterOp::Gte,
            value: value.into(),
        });
        self
    }

    /// Adds an upper bound (inclusive)
    #[must_use]
    pub fn where_lte(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op: FilterOp::Lte,
            value: value.into(),
        });
        self
    }

    /// Sets the ordering
    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    /// Sets the maximum number of results
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the "start after" cursor
    #[must_use]
    pub fn start_after(mut self, cursor: DocumentId) -> Self {
        self.start_after = Some(cursor);
        self
    }

    /// Returns `true` if the document fields satisfy every filter
    #[must_use]
    pub fn matches(&self, fields: &Fields) -> bool {
        self.filters.iter().all(|filter| filter.matches(fields))
    }
}

const fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn same_kind(a: &Value, b: &Value) -> bool {
    kind_rank(a) == kind_rank(b)
}

/// Total order over JSON values used for filtering and sorting.
///
/// Values of different kinds order by kind (null < bool < number < string <
/// array < object); numbers compare numerically, strings lexicographically.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.total_cmp(&y)
            },
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y.iter())
            .map(|(x, y)| compare_values(x, y))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()),
        _ => kind_rank(a).cmp(&kind_rank(b)),
    }
}

// ============================================================================
// Writes
// ============================================================================

/// A single write inside a [`WriteBatch`].
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOp {
    /// Insert a new document; fails with `AlreadyExists` if the id is taken
    Create {
        /// Collection
        collection: String,
        /// Document id
        id: DocumentId,
        /// Initial fields
        fields: Fields,
    },
    /// Merge fields into an existing document; fails with `NotFound` if missing
    Update {
        /// Collection
        collection: String,
        /// Document id
        id: DocumentId,
        /// Fields to overwrite (others are kept)
        fields: Fields,
        /// Required current version, if any
        expected_version: Option<Version>,
    },
}

impl WriteOp {
    /// Collection the write targets
    #[must_use]
    pub fn collection(&self) -> &str {
        match self {
            Self::Create { collection, .. } | Self::Update { collection, .. } => collection,
        }
    }

    /// Document the write targets
    #[must_use]
    pub const fn id(&self) -> &DocumentId {
        match self {
            Self::Create { id, .. } | Self::Update { id, .. } => id,
        }
    }
}

/// An ordered group of writes committed atomically.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Creates an empty batch
    #[must_use]
    pub const fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Queues a document creation
    pub fn create(
        &mut self,
        collection: impl Into<String>,
        id: DocumentId,
        fields: Fields,
    ) -> &mut Self {
        self.ops.push(WriteOp::Create {
            collection: collection.into(),
            id,
            fields,
        });
        self
    }

    /// Queues a field merge. Non-object `fields` values are ignored.
    pub fn update(
        &mut self,
        collection: impl Into<String>,
        id: DocumentId,
        fields: Value,
        expected_version: Option<Version>,
    ) -> &mut Self {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Fields::new(),
        };
        self.ops.push(WriteOp::Update {
            collection: collection.into(),
            id,
            fields,
            expected_version,
        });
        self
    }

    /// Appends all writes of another batch
    pub fn extend(&mut self, other: Self) -> &mut Self {
        self.ops.extend(other.ops);
        self
    }

    /// Number of queued writes
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns `true` if no write is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Queued writes in commit order
    #[must_use]
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Consumes the batch, returning its writes
    #[must_use]
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

// ============================================================================
// Store trait
// ============================================================================

/// Errors that can occur during document store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentStoreError {
    /// Optimistic concurrency conflict: the document changed since it was read.
    #[error("Version conflict on {collection}/{id}: expected {expected}, found {actual}")]
    VersionConflict {
        /// Collection of the conflicting document
        collection: String,
        /// Conflicting document id
        id: DocumentId,
        /// The version the writer expected
        expected: Version,
        /// The version currently stored
        actual: Version,
    },

    /// A create targeted an id that is already taken.
    #[error("Document already exists: {collection}/{id}")]
    AlreadyExists {
        /// Collection
        collection: String,
        /// Document id
        id: DocumentId,
    },

    /// An update or cursor referenced a missing document.
    #[error("Document not found: {collection}/{id}")]
    NotFound {
        /// Collection
        collection: String,
        /// Document id
        id: DocumentId,
    },

    /// The query cannot be evaluated.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Backend connection or I/O failure.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl DocumentStoreError {
    /// Returns `true` for failures caused by a concurrent writer, which a
    /// read-modify-write loop may retry after re-reading.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::VersionConflict { .. } | Self::AlreadyExists { .. })
    }
}

/// Transactional document store abstraction.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to be shared across concurrent requests.
///
/// # Dyn Compatibility
///
/// This trait uses explicit boxed futures instead of `async fn` so it can be used
/// as `Arc<dyn DocumentStore>` inside effects and services.
pub trait DocumentStore: Send + Sync {
    /// Reads a single document.
    ///
    /// Returns `Ok(None)` if the document does not exist.
    ///
    /// # Errors
    ///
    /// - `Backend`: the store could not be reached
    fn get<'a>(&'a self, collection: &'a str, id: &'a DocumentId) -> StoreFuture<'a, Option<Document>>;

    /// Runs a query.
    ///
    /// # Errors
    ///
    /// - `NotFound`: the `start_after` cursor document does not exist
    /// - `InvalidQuery`: the query cannot be evaluated by this backend
    /// - `Backend`: the store could not be reached
    fn query(&self, query: Query) -> StoreFuture<'_, Vec<Document>>;

    /// Commits a batch atomically: either every write is applied or none is.
    ///
    /// An empty batch is a no-op.
    ///
    /// # Errors
    ///
    /// - `VersionConflict`: an update precondition does not hold
    /// - `AlreadyExists`: a create targets an existing document
    /// - `NotFound`: an update targets a missing document
    /// - `Backend`: the store could not be reached
    fn commit(&self, batch: WriteBatch) -> StoreFuture<'_, ()>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => Fields::new(),
        }
    }

    #[test]
    fn equality_and_membership_filters() {
        let doc = fields(json!({ "stationId": "s1", "status": "waiting", "position": 2 }));

        assert!(Query::collection("queue").where_eq("stationId", "s1").matches(&doc));
        assert!(!Query::collection("queue").where_eq("stationId", "s2").matches(&doc));
        assert!(
            Query::collection("queue")
                .where_in("status", ["waiting", "serving"])
                .matches(&doc)
        );
        assert!(
            !Query::collection("queue")
                .where_in("status", ["completed"])
                .matches(&doc)
        );
    }

    #[test]
    fn range_filters_require_matching_kind() {
        let doc = fields(json!({ "servedAt": 1_000 }));

        assert!(Query::collection("queue").where_gte("servedAt", 1_000).matches(&doc));
        assert!(Query::collection("queue").where_lte("servedAt", 1_000).matches(&doc));
        assert!(!Query::collection("queue").where_gte("servedAt", 1_001).matches(&doc));
        assert!(!Query::collection("queue").where_gte("servedAt", "0").matches(&doc));
    }

    #[test]
    fn missing_field_never_matches() {
        let doc = fields(json!({ "status": "waiting" }));
        assert!(!Query::collection("queue").where_eq("counterId", Value::Null).matches(&doc));
    }

    #[test]
    fn integers_and_floats_compare_numerically() {
        assert_eq!(compare_values(&json!(2), &json!(2.0)), Ordering::Equal);
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
    }

    #[test]
    fn decode_injects_document_id() {
        #[derive(Deserialize)]
        struct Station {
            id: String,
            name: String,
        }

        let doc = Document {
            id: DocumentId::new("s1"),
            version: Version::INITIAL,
            fields: fields(json!({ "name": "Payment" })),
        };
        let station: Station = doc.decode().unwrap();
        assert_eq!(station.id, "s1");
        assert_eq!(station.name, "Payment");
    }

    #[test]
    fn transient_errors() {
        let conflict = DocumentStoreError::VersionConflict {
            collection: "queue".into(),
            id: DocumentId::new("a"),
            expected: Version::new(1),
            actual: Version::new(2),
        };
        assert!(conflict.is_transient());
        assert!(!DocumentStoreError::Backend("down".into()).is_transient());
    }

    proptest! {
        #[test]
        fn number_order_is_antisymmetric(a in any::<i64>(), b in any::<i64>()) {
            let forward = compare_values(&json!(a), &json!(b));
            let backward = compare_values(&json!(b), &json!(a));
            prop_assert_eq!(forward, backward.reverse());
        }
    }
}
