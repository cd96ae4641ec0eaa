use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// A stored record: a JSON object keyed by field name. Every document has a
/// string `id` field once written.
pub type Document = Map<String, Value>;

/// Named collections the engine reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Subscriptions,
    Templates,
    Campaigns,
    DeliveryReceipts,
    InboundEvents,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Subscriptions => "subscriptions",
            Collection::Templates => "templates",
            Collection::Campaigns => "campaigns",
            Collection::DeliveryReceipts => "delivery_receipts",
            Collection::InboundEvents => "inbound_events",
        }
    }

    /// Field whose string value identifies at most one document.
    pub fn unique_field(&self) -> Option<&'static str> {
        match self {
            Collection::DeliveryReceipts => Some("provider_message_id"),
            _ => None,
        }
    }
}

/// Exact-match filter. A `null` value matches a field that is absent or null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    fields: Map<String, Value>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self::new().eq("id", id.into())
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The `id` this filter pins, when it filters on nothing else.
    pub fn only_id(&self) -> Option<&str> {
        if self.fields.len() == 1 {
            self.fields.get("id").and_then(Value::as_str)
        } else {
            None
        }
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.fields.iter().all(|(field, expected)| {
            match (document.get(field), expected) {
                (None, Value::Null) => true,
                (Some(actual), expected) => actual == expected,
                (None, _) => false,
            }
        })
    }

    /// Seed for an upserted document: the filter's non-null equality fields.
    pub fn seed_document(&self) -> Document {
        self.fields
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched: u64,
    pub matched_id: Option<String>,
    pub upserted_id: Option<String>,
}

/// Collection-style persistence used by every engine component. Backends
/// must be `Send + Sync + 'static` so a handle can live in axum state and
/// cross task boundaries.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    async fn find_one(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> StoreResult<Option<Document>>;

    /// Matching documents in insertion order.
    async fn find_many(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> StoreResult<Vec<Document>>;

    /// Insert a document, assigning an `id` when it has none. Returns the id.
    /// Fails with `Duplicate` when the id, or the collection's unique field
    /// value, is already taken.
    async fn insert_one(&self, collection: Collection, document: Document) -> StoreResult<String>;

    /// Merge `set` into the first matching document. With `upsert`, a new
    /// document built from the filter and `set` is inserted when none match,
    /// subject to the same uniqueness rules as `insert_one`.
    async fn update_one(
        &self,
        collection: Collection,
        filter: &Filter,
        set: Document,
        upsert: bool,
    ) -> StoreResult<UpdateResult>;

    async fn delete_one(&self, collection: Collection, filter: &Filter) -> StoreResult<bool>;

    async fn count(&self, collection: Collection, filter: &Filter) -> StoreResult<u64> {
        Ok(self.find_many(collection, filter).await?.len() as u64)
    }
}

/// Ensure a document carries a string `id`, generating one if absent or null.
pub(crate) fn ensure_id(document: &mut Document) -> StoreResult<String> {
    match document.get("id") {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(Value::Null) | None => {
            let id = uuid::Uuid::new_v4().to_string();
            document.insert("id".to_string(), Value::String(id.clone()));
            Ok(id)
        }
        Some(other) => Err(StoreError::InvalidDocument(format!(
            "id must be a string, got {other}"
        ))),
    }
}

/// The collection's unique field and its string value in `document`.
pub(crate) fn unique_key<'a>(
    collection: Collection,
    document: &'a Document,
) -> Option<(&'static str, &'a str)> {
    let field = collection.unique_field()?;
    document.get(field).and_then(Value::as_str).map(|value| (field, value))
}

/// Convert a serializable record into a `Document`.
pub fn to_document<T: serde::Serialize>(record: &T) -> StoreResult<Document> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidDocument(other.to_string())),
    }
}
