use campaign_channels::parse_inbound;
use campaign_core::types::{ConsentState, InboundCommand, InboundEvent};
use campaign_core::{CampaignResult, Clock};
use campaign_store::Repository;
use std::sync::Arc;
use tracing::info;

/// Applies inbound keyword commands to consent and subscriptions, and logs
/// every inbound message.
#[derive(Clone)]
pub struct InboundHandler {
    repo: Repository,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for InboundHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundHandler").finish_non_exhaustive()
    }
}

impl InboundHandler {
    pub fn new(repo: Repository, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    pub async fn handle(&self, from: &str, body: &str) -> CampaignResult<InboundEvent> {
        let message = parse_inbound(from, body);
        let now = self.clock.now_utc();
        let sender = message.sender.as_str();

        match (message.command, message.topic.as_deref()) {
            (Some(InboundCommand::Start), _) => {
                self.repo.set_consent(sender, ConsentState::Subscribed, now).await?;
            }
            (Some(InboundCommand::Stop), _) => {
                self.repo.set_consent(sender, ConsentState::Stopped, now).await?;
            }
            (Some(InboundCommand::Subscribe), Some(topic)) => {
                self.repo.subscribe(sender, topic, now).await?;
            }
            (Some(InboundCommand::Unsubscribe), Some(topic)) => {
                if !self.repo.unsubscribe(sender, topic, now).await? {
                    info!(from = %sender, topic = %topic, "No active subscription to cancel");
                }
            }
            _ => {}
        }

        let event = InboundEvent {
            id: uuid::Uuid::new_v4().to_string(),
            from: message.sender.clone(),
            body: body.to_string(),
            command: message.command,
            topic: message.topic.clone(),
            timestamp: now,
        };
        self.repo.insert_inbound_event(&event).await?;
        metrics::counter!("inbound.messages").increment(1);
        info!(
            from = %event.from,
            command = ?event.command,
            topic = ?event.topic,
            "Inbound message processed"
        );
        Ok(event)
    }
}
