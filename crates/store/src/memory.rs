//! In-memory document store backed by DashMap.
//!
//! Used for development and tests; `RedisStore` offers the same surface
//! against a shared server.

use crate::error::{StoreError, StoreResult};
use crate::traits::{
    ensure_id, unique_key, Collection, Document, DocumentStore, Filter, UpdateResult,
};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

/// Thread-safe store keeping each collection as an insertion-ordered list.
pub struct InMemoryStore {
    collections: DashMap<Collection, Vec<Document>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        info!("Document store initialized (in-memory, development mode)");
        Self {
            collections: DashMap::new(),
        }
    }

    /// Copy of every document in a collection, in insertion order.
    pub fn all(&self, collection: Collection) -> Vec<Document> {
        self.collections
            .get(&collection)
            .map(|docs| docs.clone())
            .unwrap_or_default()
    }

    pub fn len(&self, collection: Collection) -> usize {
        self.collections.get(&collection).map(|d| d.len()).unwrap_or(0)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn document_id(document: &Document) -> Option<&str> {
    document.get("id").and_then(|v| v.as_str())
}

/// Reject `document` if its id or unique field value is held by another
/// document in `docs`. `skip` is the position `document` will replace.
fn check_unique(
    collection: Collection,
    docs: &[Document],
    document: &Document,
    skip: Option<usize>,
) -> StoreResult<()> {
    let id = document_id(document);
    let unique = unique_key(collection, document);
    for (position, other) in docs.iter().enumerate() {
        if Some(position) == skip {
            continue;
        }
        if id.is_some() && document_id(other) == id {
            return Err(StoreError::Duplicate {
                collection: collection.as_str(),
                id: id.unwrap_or_default().to_string(),
            });
        }
        if let Some((field, value)) = unique {
            if other.get(field).and_then(|v| v.as_str()) == Some(value) {
                return Err(StoreError::DuplicateKey {
                    collection: collection.as_str(),
                    field,
                    value: value.to_string(),
                });
            }
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn find_one(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> StoreResult<Option<Document>> {
        Ok(self
            .collections
            .get(&collection)
            .and_then(|docs| docs.iter().find(|d| filter.matches(d)).cloned()))
    }

    async fn find_many(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> StoreResult<Vec<Document>> {
        Ok(self
            .collections
            .get(&collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_one(
        &self,
        collection: Collection,
        mut document: Document,
    ) -> StoreResult<String> {
        let id = ensure_id(&mut document)?;
        let mut docs = self.collections.entry(collection).or_default();
        check_unique(collection, &docs, &document, None)?;
        docs.push(document);
        debug!(collection = collection.as_str(), id = %id, "Document inserted");
        Ok(id)
    }

    async fn update_one(
        &self,
        collection: Collection,
        filter: &Filter,
        set: Document,
        upsert: bool,
    ) -> StoreResult<UpdateResult> {
        let mut docs = self.collections.entry(collection).or_default();
        if let Some(index) = docs.iter().position(|d| filter.matches(d)) {
            let mut merged = docs[index].clone();
            merged.extend(set);
            check_unique(collection, &docs, &merged, Some(index))?;
            let matched_id = document_id(&merged).map(str::to_string);
            docs[index] = merged;
            return Ok(UpdateResult {
                matched: 1,
                matched_id,
                upserted_id: None,
            });
        }
        if !upsert {
            return Ok(UpdateResult::default());
        }

        let mut document = filter.seed_document();
        document.extend(set);
        let id = ensure_id(&mut document)?;
        check_unique(collection, &docs, &document, None)?;
        docs.push(document);
        debug!(collection = collection.as_str(), id = %id, "Document upserted");
        Ok(UpdateResult {
            matched: 0,
            matched_id: None,
            upserted_id: Some(id),
        })
    }

    async fn delete_one(&self, collection: Collection, filter: &Filter) -> StoreResult<bool> {
        let Some(mut docs) = self.collections.get_mut(&collection) else {
            return Ok(false);
        };
        match docs.iter().position(|d| filter.matches(d)) {
            Some(index) => {
                docs.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_preserves_order() {
        let store = InMemoryStore::new();
        let a = store
            .insert_one(Collection::Subscriptions, doc(json!({"user_id": "a", "topic": "T"})))
            .await
            .unwrap();
        store
            .insert_one(Collection::Subscriptions, doc(json!({"user_id": "b", "topic": "T"})))
            .await
            .unwrap();
        assert!(!a.is_empty());

        let found = store
            .find_many(Collection::Subscriptions, &Filter::new().eq("topic", "T"))
            .await
            .unwrap();
        let users: Vec<_> = found.iter().map(|d| d["user_id"].clone()).collect();
        assert_eq!(users, vec![json!("a"), json!("b")]);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let store = InMemoryStore::new();
        store
            .insert_one(Collection::Users, doc(json!({"id": "+15550001111"})))
            .await
            .unwrap();
        let err = store
            .insert_one(Collection::Users, doc(json!({"id": "+15550001111"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_update_with_and_without_upsert() {
        let store = InMemoryStore::new();
        let filter = Filter::new().eq("provider_message_id", "SM1");

        let read = || doc(json!({"status": "READ"}));
        let missed = store
            .update_one(Collection::DeliveryReceipts, &filter, read(), false)
            .await
            .unwrap();
        assert_eq!(missed, UpdateResult::default());
        assert_eq!(store.len(Collection::DeliveryReceipts), 0);

        let created = store
            .update_one(Collection::DeliveryReceipts, &filter, doc(json!({"status": "SENT"})), true)
            .await
            .unwrap();
        assert!(created.upserted_id.is_some());

        let updated = store
            .update_one(Collection::DeliveryReceipts, &filter, read(), true)
            .await
            .unwrap();
        assert_eq!(updated.matched, 1);
        assert_eq!(updated.matched_id, created.upserted_id);

        let all = store.all(Collection::DeliveryReceipts);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0]["status"], json!("READ"));
        assert_eq!(all[0]["provider_message_id"], json!("SM1"));
    }

    #[tokio::test]
    async fn test_provider_message_id_is_unique() {
        let store = InMemoryStore::new();
        store
            .insert_one(
                Collection::DeliveryReceipts,
                doc(json!({"id": "r1", "provider_message_id": "SM1"})),
            )
            .await
            .unwrap();
        let err = store
            .insert_one(
                Collection::DeliveryReceipts,
                doc(json!({"id": "r2", "provider_message_id": "SM1"})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { field: "provider_message_id", .. }));

        // An upsert whose filter misses the holder still cannot mint a second one.
        let filter = Filter::new()
            .eq("provider_message_id", "SM1")
            .eq("decision", Value::Null)
            .eq("id", "r3");
        let err = store
            .update_one(Collection::DeliveryReceipts, &filter, Document::new(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));

        // Receipts without a provider id never collide.
        for id in ["r4", "r5"] {
            store
                .insert_one(Collection::DeliveryReceipts, doc(json!({"id": id})))
                .await
                .unwrap();
        }
        assert_eq!(store.len(Collection::DeliveryReceipts), 3);
    }

    #[tokio::test]
    async fn test_delete_one() {
        let store = InMemoryStore::new();
        store
            .insert_one(Collection::Campaigns, doc(json!({"id": "c1"})))
            .await
            .unwrap();
        assert!(store.delete_one(Collection::Campaigns, &Filter::by_id("c1")).await.unwrap());
        assert!(!store.delete_one(Collection::Campaigns, &Filter::by_id("c1")).await.unwrap());
        assert_eq!(store.count(Collection::Campaigns, &Filter::new()).await.unwrap(), 0);
    }
}
