//! Redis-backed document store.
//!
//! Layout per collection: a hash `{prefix}:{collection}` of id -> JSON
//! document, and a sorted set `{prefix}:{collection}:order` scoring ids by
//! an insertion sequence so reads come back in insertion order. A
//! collection's unique field is indexed in `{prefix}:{collection}:unique:{field}`
//! (value -> id), so lookups by id or unique value never scan. Other filters
//! are evaluated client-side.
//!
//! Writes to a collection run under a lease lock (`SET NX PX`) so the
//! read-merge-write of `update_one` and the uniqueness checks are atomic
//! across processes.

use crate::error::{StoreError, StoreResult};
use crate::traits::{
    ensure_id, unique_key, Collection, Document, DocumentStore, Filter, UpdateResult,
};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

const LOCK_TTL_MS: u64 = 5_000;
const LOCK_WAIT: Duration = Duration::from_secs(5);
const LOCK_RETRY: Duration = Duration::from_millis(10);

/// Deletes the lock only if this holder still owns it.
const RELEASE_LOCK: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// Key naming for one store prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
struct KeySpace {
    prefix: String,
}

impl KeySpace {
    fn data(&self, collection: Collection) -> String {
        format!("{}:{}", self.prefix, collection.as_str())
    }

    fn order(&self, collection: Collection) -> String {
        format!("{}:{}:order", self.prefix, collection.as_str())
    }

    fn unique(&self, collection: Collection, field: &str) -> String {
        format!("{}:{}:unique:{}", self.prefix, collection.as_str(), field)
    }

    fn lock(&self, collection: Collection) -> String {
        format!("{}:{}:lock", self.prefix, collection.as_str())
    }

    fn seq(&self) -> String {
        format!("{}:seq", self.prefix)
    }
}

struct WriteLock {
    key: String,
    token: String,
}

pub struct RedisStore {
    conn: ConnectionManager,
    keys: KeySpace,
}

impl RedisStore {
    /// Connect and verify the server answers PING.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> StoreResult<Self> {
        info!(url = %url, "Connecting to Redis document store");

        let client = redis::Client::open(url)?;
        let mut conn = ConnectionManager::new(client).await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(response = %pong, "Redis connection established");

        Ok(Self {
            conn,
            keys: KeySpace {
                prefix: prefix.into(),
            },
        })
    }

    async fn acquire(&self, collection: Collection) -> StoreResult<WriteLock> {
        let key = self.keys.lock(collection);
        let token = uuid::Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();
        let deadline = tokio::time::Instant::now() + LOCK_WAIT;
        loop {
            let acquired: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(LOCK_TTL_MS)
                .query_async(&mut conn)
                .await?;
            if acquired.is_some() {
                return Ok(WriteLock { key, token });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(StoreError::LockTimeout(key));
            }
            tokio::time::sleep(LOCK_RETRY).await;
        }
    }

    async fn release(&self, lock: WriteLock) {
        let mut conn = self.conn.clone();
        let released: redis::RedisResult<i64> = redis::Script::new(RELEASE_LOCK)
            .key(&lock.key)
            .arg(&lock.token)
            .invoke_async(&mut conn)
            .await;
        if let Err(e) = released {
            warn!(key = %lock.key, error = %e, "Failed to release write lock, waiting for expiry");
        }
    }

    async fn load_by_id(&self, collection: Collection, id: &str) -> StoreResult<Option<Document>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(self.keys.data(collection), id).await?;
        raw.map(|json| parse_document(&json)).transpose()
    }

    async fn load_all(&self, collection: Collection) -> StoreResult<Vec<Document>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.zrange(self.keys.order(collection), 0, -1).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(self.keys.data(collection))
            .arg(&ids)
            .query_async(&mut conn)
            .await?;
        raw.into_iter()
            .flatten()
            .map(|json| parse_document(&json))
            .collect()
    }

    async fn index_holder(
        &self,
        collection: Collection,
        field: &str,
        value: &str,
    ) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.hget(self.keys.unique(collection, field), value).await?)
    }

    /// Matches for a filter that pins the unique field, resolved through the
    /// index. `None` when the filter does not pin it.
    async fn find_indexed(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> StoreResult<Option<Vec<Document>>> {
        let Some(field) = collection.unique_field() else {
            return Ok(None);
        };
        let Some(value) = filter.get(field).and_then(Value::as_str) else {
            return Ok(None);
        };
        let Some(id) = self.index_holder(collection, field, value).await? else {
            return Ok(Some(Vec::new()));
        };
        let found = self.load_by_id(collection, &id).await?;
        Ok(Some(found.into_iter().filter(|d| filter.matches(d)).collect()))
    }

    async fn append(
        &self,
        collection: Collection,
        id: &str,
        document: &Document,
    ) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let seq: i64 = conn.incr(self.keys.seq(), 1).await?;
        let json = serde_json::to_string(document)?;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(self.keys.data(collection), id, json)
            .ignore()
            .zadd(self.keys.order(collection), id, seq)
            .ignore();
        if let Some((field, value)) = unique_key(collection, document) {
            pipe.hset(self.keys.unique(collection, field), value, id).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    /// Overwrite a stored document, moving its index entry when the unique
    /// value changed.
    async fn replace(
        &self,
        collection: Collection,
        id: &str,
        document: &Document,
        previous: Option<(&'static str, String)>,
    ) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(document)?;
        let mut pipe = redis::pipe();
        pipe.atomic().hset(self.keys.data(collection), id, json).ignore();
        let current = unique_key(collection, document);
        if let Some((field, old)) = &previous {
            if current.map(|(_, value)| value) != Some(old.as_str()) {
                pipe.hdel(self.keys.unique(collection, field), old).ignore();
            }
        }
        if let Some((field, value)) = current {
            pipe.hset(self.keys.unique(collection, field), value, id).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn insert_locked(
        &self,
        collection: Collection,
        mut document: Document,
    ) -> StoreResult<String> {
        let id = ensure_id(&mut document)?;
        let mut conn = self.conn.clone();
        let exists: bool = conn.hexists(self.keys.data(collection), &id).await?;
        if exists {
            return Err(StoreError::Duplicate {
                collection: collection.as_str(),
                id,
            });
        }
        if let Some((field, value)) = unique_key(collection, &document) {
            if self.index_holder(collection, field, value).await?.is_some() {
                return Err(StoreError::DuplicateKey {
                    collection: collection.as_str(),
                    field,
                    value: value.to_string(),
                });
            }
        }
        self.append(collection, &id, &document).await?;
        Ok(id)
    }

    async fn update_locked(
        &self,
        collection: Collection,
        filter: &Filter,
        set: Document,
        upsert: bool,
    ) -> StoreResult<UpdateResult> {
        if let Some(mut existing) = self.find_one(collection, filter).await? {
            let id = document_id(&existing)
                .ok_or_else(|| StoreError::InvalidDocument("stored document has no id".into()))?;
            let previous = unique_key(collection, &existing).map(|(f, v)| (f, v.to_string()));
            existing.extend(set);

            if let Some((field, value)) = unique_key(collection, &existing) {
                let holder = self.index_holder(collection, field, value).await?;
                if holder.is_some_and(|holder| holder != id) {
                    return Err(StoreError::DuplicateKey {
                        collection: collection.as_str(),
                        field,
                        value: value.to_string(),
                    });
                }
            }
            self.replace(collection, &id, &existing, previous).await?;
            return Ok(UpdateResult {
                matched: 1,
                matched_id: Some(id),
                upserted_id: None,
            });
        }
        if !upsert {
            return Ok(UpdateResult::default());
        }

        let mut document = filter.seed_document();
        document.extend(set);
        let id = self.insert_locked(collection, document).await?;
        debug!(collection = collection.as_str(), id = %id, "Document upserted");
        Ok(UpdateResult {
            matched: 0,
            matched_id: None,
            upserted_id: Some(id),
        })
    }

    async fn delete_locked(&self, collection: Collection, filter: &Filter) -> StoreResult<bool> {
        let Some(existing) = self.find_one(collection, filter).await? else {
            return Ok(false);
        };
        let Some(id) = document_id(&existing) else {
            return Ok(false);
        };
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hdel(self.keys.data(collection), &id)
            .zrem(self.keys.order(collection), &id)
            .ignore();
        if let Some((field, value)) = unique_key(collection, &existing) {
            pipe.hdel(self.keys.unique(collection, field), value).ignore();
        }
        let (removed,): (i64,) = pipe.query_async(&mut conn).await?;
        Ok(removed > 0)
    }
}

fn parse_document(json: &str) -> StoreResult<Document> {
    match serde_json::from_str::<Value>(json)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidDocument(other.to_string())),
    }
}

fn document_id(document: &Document) -> Option<String> {
    document.get("id").and_then(Value::as_str).map(str::to_string)
}

#[async_trait]
impl DocumentStore for RedisStore {
    async fn find_one(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> StoreResult<Option<Document>> {
        if let Some(id) = filter.only_id() {
            return self.load_by_id(collection, id).await;
        }
        if let Some(found) = self.find_indexed(collection, filter).await? {
            return Ok(found.into_iter().next());
        }
        Ok(self
            .load_all(collection)
            .await?
            .into_iter()
            .find(|d| filter.matches(d)))
    }

    async fn find_many(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> StoreResult<Vec<Document>> {
        if let Some(found) = self.find_indexed(collection, filter).await? {
            return Ok(found);
        }
        let mut docs = self.load_all(collection).await?;
        docs.retain(|d| filter.matches(d));
        Ok(docs)
    }

    async fn insert_one(&self, collection: Collection, document: Document) -> StoreResult<String> {
        let lock = self.acquire(collection).await?;
        let result = self.insert_locked(collection, document).await;
        self.release(lock).await;
        let id = result?;
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
        let lock = self.acquire(collection).await?;
        let result = self.update_locked(collection, filter, set, upsert).await;
        self.release(lock).await;
        result
    }

    async fn delete_one(&self, collection: Collection, filter: &Filter) -> StoreResult<bool> {
        let lock = self.acquire(collection).await?;
        let result = self.delete_locked(collection, filter).await;
        self.release(lock).await;
        result
    }
}
