//! Send provider seam and the in-process implementations.

use async_trait::async_trait;
use campaign_core::CampaignError;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use tracing::info;

/// One outbound message, already rendered and addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub from: String,
    pub to: String,
    /// Provider-side content template reference, if the template has one.
    pub content_ref: Option<String>,
    /// Positional content variables; slot "1" carries the rendered text.
    pub variables: BTreeMap<String, String>,
    pub body: String,
}

impl SendRequest {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        content_ref: Option<String>,
        rendered: impl Into<String>,
    ) -> Self {
        let body = rendered.into();
        let mut variables = BTreeMap::new();
        variables.insert("1".to_string(), body.clone());
        Self {
            from: from.into(),
            to: to.into(),
            content_ref,
            variables,
            body,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Worth retrying: network failure, throttling, provider 5xx.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// The provider rejected the request itself; retrying will not help.
    #[error("permanent provider error: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ProviderError::Transient(msg) | ProviderError::Permanent(msg) => msg,
        }
    }
}

impl From<ProviderError> for CampaignError {
    fn from(err: ProviderError) -> Self {
        CampaignError::Provider(err.to_string())
    }
}

/// External send API. Returns the provider's message id on acceptance.
#[async_trait]
pub trait SendProvider: Send + Sync + 'static {
    async fn send(&self, request: &SendRequest) -> Result<String, ProviderError>;

    fn name(&self) -> &'static str;
}

/// Development provider: logs the message and accepts it.
#[derive(Debug, Default)]
pub struct LogProvider;

#[async_trait]
impl SendProvider for LogProvider {
    async fn send(&self, request: &SendRequest) -> Result<String, ProviderError> {
        let message_id = format!("LOG{}", uuid::Uuid::new_v4().simple());
        info!(
            from = %request.from,
            to = %request.to,
            content_ref = ?request.content_ref,
            body = %request.body,
            message_id = %message_id,
            "Message accepted by log provider"
        );
        Ok(message_id)
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Provider that replays a queue of canned responses and records every
/// request. Once the queue is empty every send succeeds.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<SendRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(
        responses: impl IntoIterator<Item = Result<String, ProviderError>>,
    ) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::default(),
        }
    }

    /// Fail every one of the next `count` sends with a transient error.
    pub fn failing(count: usize) -> Self {
        Self::with_responses(
            (0..count).map(|_| Err(ProviderError::Transient("connection reset".into()))),
        )
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<SendRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SendProvider for ScriptedProvider {
    async fn send(&self, request: &SendRequest) -> Result<String, ProviderError> {
        let call = match self.requests.lock() {
            Ok(mut requests) => {
                requests.push(request.clone());
                requests.len()
            }
            Err(_) => return Err(ProviderError::Transient("request log poisoned".into())),
        };
        let scripted = self.responses.lock().ok().and_then(|mut r| r.pop_front());
        scripted.unwrap_or_else(|| Ok(format!("SM{call:032}")))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
