//! In-memory document store for fast, deterministic tests and the demo binary.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only follows a panicking test

use campus_queue_core::document_store::{
    compare_values, Direction, Document, DocumentId, DocumentStore, DocumentStoreError, Fields,
    Query, StoreFuture, Version, WriteBatch, WriteOp,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

type Collection = BTreeMap<DocumentId, (Version, Fields)>;

/// `HashMap`-backed [`DocumentStore`].
///
/// Clones share the same data. Batches are validated in full before any write is
/// applied, so a failing batch leaves the store untouched.
///
/// # Example
///
/// ```
/// use campus_queue_testing::InMemoryDocumentStore;
/// use campus_queue_core::document_store::{DocumentId, DocumentStore, Query};
/// use serde_json::json;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryDocumentStore::new();
/// store.insert("stations", "s1", json!({ "name": "Cashier", "type": "payment" }));
///
/// let station = store.get("stations", &DocumentId::new("s1")).await?;
/// assert!(station.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: Arc<RwLock<HashMap<String, Collection>>>,
    fail_next_commit: Arc<RwLock<Option<DocumentStoreError>>>,
}

impl InMemoryDocumentStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document outside of any batch (test seeding).
    ///
    /// Non-object values are stored as an empty document.
    pub fn insert(&self, collection: &str, id: &str, fields: Value) {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Fields::new(),
        };
        let mut collections = self.collections.write().unwrap();
        let docs = collections.entry(collection.to_string()).or_default();
        let version = docs
            .get(&DocumentId::new(id))
            .map_or(Version::INITIAL, |(version, _)| version.next());
        docs.insert(DocumentId::new(id), (version, fields));
    }

    /// Every document of a collection, in id order
    #[must_use]
    pub fn snapshot(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .unwrap()
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, (version, fields))| Document {
                        id: id.clone(),
                        version: *version,
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of documents in a collection
    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .unwrap()
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Check if a collection holds no document
    #[must_use]
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Make the next `commit` fail with `error` without applying anything
    pub fn fail_next_commit(&self, error: DocumentStoreError) {
        *self.fail_next_commit.write().unwrap() = Some(error);
    }

    fn run_query(&self, query: &Query) -> Result<Vec<Document>, DocumentStoreError> {
        let collections = self.collections.read().unwrap();
        let empty = Collection::new();
        let docs = collections.get(&query.collection).unwrap_or(&empty);

        let mut matched: Vec<Document> = docs
            .iter()
            .filter(|(_, (_, fields))| query.matches(fields))
            .map(|(id, (version, fields))| Document {
                id: id.clone(),
                version: *version,
                fields: fields.clone(),
            })
            .collect();

        if let Some(order) = &query.order_by {
            matched.retain(|doc| doc.fields.contains_key(&order.field));
            matched.sort_by(|a, b| {
                let ordering = compare_values(&a.fields[&order.field], &b.fields[&order.field])
                    .then_with(|| a.id.cmp(&b.id));
                match order.direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            });
        }

        if let Some(cursor) = &query.start_after {
            let Some((_, cursor_fields)) = docs.get(cursor) else {
                return Err(DocumentStoreError::NotFound {
                    collection: query.collection.clone(),
                    id: cursor.clone(),
                });
            };
            let cursor_doc = Document {
                id: cursor.clone(),
                version: Version::INITIAL,
                fields: cursor_fields.clone(),
            };
            let skip = matched
                .iter()
                .position(|doc| doc.id == cursor_doc.id)
                .map_or_else(|| count_before(&matched, &cursor_doc, query), |index| index + 1);
            matched.drain(..skip);
        }

        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }

        Ok(matched)
    }

    fn apply(&self, batch: WriteBatch) -> Result<(), DocumentStoreError> {
        if let Some(error) = self.fail_next_commit.write().unwrap().take() {
            return Err(error);
        }

        let mut collections = self.collections.write().unwrap();

        // Validate every write against the current state, then apply.
        let mut touched: HashMap<(String, DocumentId), Version> = HashMap::new();
        for op in batch.ops() {
            let key = (op.collection().to_string(), op.id().clone());
            let current = touched.get(&key).copied().or_else(|| {
                collections
                    .get(op.collection())
                    .and_then(|docs| docs.get(op.id()))
                    .map(|(version, _)| *version)
            });
            match op {
                WriteOp::Create { collection, id, .. } => {
                    if current.is_some() {
                        return Err(DocumentStoreError::AlreadyExists {
                            collection: collection.clone(),
                            id: id.clone(),
                        });
                    }
                    touched.insert(key, Version::INITIAL);
                },
                WriteOp::Update {
                    collection,
                    id,
                    expected_version,
                    ..
                } => {
                    let Some(actual) = current else {
                        return Err(DocumentStoreError::NotFound {
                            collection: collection.clone(),
                            id: id.clone(),
                        });
                    };
                    if let Some(expected) = expected_version {
                        if *expected != actual {
                            return Err(DocumentStoreError::VersionConflict {
                                collection: collection.clone(),
                                id: id.clone(),
                                expected: *expected,
                                actual,
                            });
                        }
                    }
                    touched.insert(key, actual.next());
                },
            }
        }

        let writes = batch.len();
        for op in batch.into_ops() {
            match op {
                WriteOp::Create {
                    collection,
                    id,
                    fields,
                } => {
                    collections
                        .entry(collection)
                        .or_default()
                        .insert(id, (Version::INITIAL, fields));
                },
                WriteOp::Update {
                    collection,
                    id,
                    fields,
                    ..
                } => {
                    if let Some((version, stored)) = collections
                        .get_mut(&collection)
                        .and_then(|docs| docs.get_mut(&id))
                    {
                        *version = version.next();
                        stored.extend(fields);
                    }
                },
            }
        }

        tracing::trace!(writes, "In-memory batch committed");
        Ok(())
    }
}

/// Number of ordered documents that sort at or before a cursor that is not part
/// of the result set itself.
fn count_before(matched: &[Document], cursor: &Document, query: &Query) -> usize {
    let Some(order) = &query.order_by else {
        return matched.iter().take_while(|doc| doc.id <= cursor.id).count();
    };
    let Some(cursor_value) = cursor.fields.get(&order.field) else {
        return matched.len();
    };
    matched
        .iter()
        .take_while(|doc| {
            let ordering = compare_values(&doc.fields[&order.field], cursor_value)
                .then_with(|| doc.id.cmp(&cursor.id));
            match order.direction {
                Direction::Ascending => ordering.is_le(),
                Direction::Descending => ordering.is_ge(),
            }
        })
        .count()
}

impl DocumentStore for InMemoryDocumentStore {
    fn get<'a>(&'a self, collection: &'a str, id: &'a DocumentId) -> StoreFuture<'a, Option<Document>> {
        Box::pin(async move {
            let collections = self.collections.read().unwrap();
            Ok(collections
                .get(collection)
                .and_then(|docs| docs.get(id))
                .map(|(version, fields)| Document {
                    id: id.clone(),
                    version: *version,
                    fields: fields.clone(),
                }))
        })
    }

    fn query(&self, query: Query) -> StoreFuture<'_, Vec<Document>> {
        Box::pin(async move { self.run_query(&query) })
    }

    fn commit(&self, batch: WriteBatch) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.apply(batch) })
    }
}
