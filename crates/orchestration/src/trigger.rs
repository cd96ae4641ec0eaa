use crate::runner::CampaignRunner;
use campaign_core::types::RunSummary;
use campaign_core::CampaignResult;
use campaign_store::Repository;
use tracing::{debug, info};

/// Run the scheduled campaign targeting `topic`, if there is one.
///
/// Returns `None` when no campaign with that topic is in `scheduled` state.
pub async fn trigger_topic(
    repo: &Repository,
    runner: &CampaignRunner,
    topic: &str,
) -> CampaignResult<Option<RunSummary>> {
    let Some(campaign) = repo.find_scheduled_campaign(topic).await? else {
        debug!(topic = %topic, "No scheduled campaign for topic");
        return Ok(None);
    };
    info!(topic = %topic, campaign_id = %campaign.id, "Topic event triggered campaign");
    runner.run_campaign(&campaign.id).await.map(Some)
}
