use campaign_core::CampaignError;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("duplicate id '{id}' in collection '{collection}'")]
    Duplicate { collection: &'static str, id: String },

    #[error("duplicate {field} '{value}' in collection '{collection}'")]
    DuplicateKey {
        collection: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("timed out waiting for the write lock on '{0}'")]
    LockTimeout(String),

    #[error("document is not a JSON object: {0}")]
    InvalidDocument(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<StoreError> for CampaignError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Serialization(e) => CampaignError::Serialization(e),
            other => CampaignError::Store(other.to_string()),
        }
    }
}
