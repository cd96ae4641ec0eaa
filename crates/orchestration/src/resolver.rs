use campaign_core::CampaignResult;
use campaign_store::Repository;
use tracing::debug;

/// Resolves a topic to the user ids holding an active subscription.
#[derive(Debug, Clone)]
pub struct RecipientResolver {
    repo: Repository,
}

impl RecipientResolver {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// One entry per active subscription row, in store order. A user
    /// subscribed twice appears twice.
    pub async fn resolve(&self, topic: &str) -> CampaignResult<Vec<String>> {
        let recipients: Vec<String> = self
            .repo
            .active_subscriptions(topic)
            .await?
            .into_iter()
            .map(|sub| sub.user_id)
            .collect();
        debug!(topic = %topic, count = recipients.len(), "Recipients resolved");
        Ok(recipients)
    }
}
