//! Document store seam for the campaign engine.
//!
//! `DocumentStore` is the narrow collection-style interface the engine
//! needs; `Repository` layers typed, validated records on top of it.

#![warn(clippy::unwrap_used)]

pub mod error;
pub mod memory;
pub mod redis_store;
pub mod repository;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use redis_store::RedisStore;
pub use repository::{Repository, UpsertOutcome};
pub use traits::{Collection, Document, DocumentStore, Filter, UpdateResult};
