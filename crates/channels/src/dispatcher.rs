//! Dispatcher: sends one message through the provider under a retry policy.

use crate::provider::{ProviderError, SendProvider, SendRequest};
use campaign_core::config::RunnerConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const REASON_MAX_RETRIES: &str = "max retries reached";

/// Fixed-delay retry for transient provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            delay: config.retry_delay(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent {
        provider_message_id: String,
        attempts: u32,
    },
    Failed {
        reason: String,
        attempts: u32,
    },
}

impl DispatchOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            DispatchOutcome::Sent { attempts, .. } | DispatchOutcome::Failed { attempts, .. } => {
                *attempts
            }
        }
    }
}

pub struct Dispatcher {
    provider: Arc<dyn SendProvider>,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(provider: Arc<dyn SendProvider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Send `request`, retrying transient errors up to the policy's attempt
    /// budget. Permanent errors end the dispatch at once.
    pub async fn dispatch(&self, request: &SendRequest) -> DispatchOutcome {
        let max_attempts = self.policy.max_attempts.max(1);
        let start = Instant::now();

        for attempt in 1..=max_attempts {
            metrics::counter!("dispatch.attempts", "provider" => self.provider.name()).increment(1);

            match self.provider.send(request).await {
                Ok(provider_message_id) => {
                    metrics::histogram!("dispatch.latency_ms")
                        .record(start.elapsed().as_secs_f64() * 1000.0);
                    debug!(
                        to = %request.to,
                        provider_message_id = %provider_message_id,
                        attempt,
                        "Message dispatched"
                    );
                    return DispatchOutcome::Sent {
                        provider_message_id,
                        attempts: attempt,
                    };
                }
                Err(ProviderError::Permanent(message)) => {
                    warn!(to = %request.to, attempt, error = %message, "Provider rejected message");
                    metrics::counter!("dispatch.failures", "kind" => "permanent").increment(1);
                    return DispatchOutcome::Failed {
                        reason: format!("rejected by provider: {message}"),
                        attempts: attempt,
                    };
                }
                Err(ProviderError::Transient(message)) => {
                    warn!(
                        to = %request.to,
                        attempt,
                        max_attempts,
                        error = %message,
                        "Send attempt failed"
                    );
                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.delay).await;
                    }
                }
            }
        }

        metrics::counter!("dispatch.failures", "kind" => "exhausted").increment(1);
        DispatchOutcome::Failed {
            reason: REASON_MAX_RETRIES.to_string(),
            attempts: max_attempts,
        }
    }
}
