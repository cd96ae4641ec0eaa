//! Wiring of the engine components around one store handle.

use crate::inbound::InboundHandler;
use crate::reconciler::StatusReconciler;
use crate::runner::{CampaignRunner, CancelToken, RunnerSettings};
use crate::stats::delivery_stats;
use crate::trigger::trigger_topic;
use campaign_channels::SendProvider;
use campaign_core::types::{DeliveryStats, InboundEvent, RunSummary, StatusCallback};
use campaign_core::{AppConfig, CampaignResult, Clock};
use campaign_store::{Repository, UpsertOutcome};
use std::sync::Arc;

/// Cheap-to-clone handle over every engine entry point.
#[derive(Clone, Debug)]
pub struct CampaignEngine {
    repo: Repository,
    runner: Arc<CampaignRunner>,
    reconciler: StatusReconciler,
    inbound: InboundHandler,
}

impl CampaignEngine {
    pub fn new(
        repo: Repository,
        provider: Arc<dyn SendProvider>,
        clock: Arc<dyn Clock>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            runner: Arc::new(CampaignRunner::new(
                repo.clone(),
                provider,
                Arc::clone(&clock),
                settings,
            )),
            reconciler: StatusReconciler::new(repo.clone(), Arc::clone(&clock)),
            inbound: InboundHandler::new(repo.clone(), clock),
            repo,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        repo: Repository,
        provider: Arc<dyn SendProvider>,
        clock: Arc<dyn Clock>,
    ) -> CampaignResult<Self> {
        Ok(Self::new(repo, provider, clock, RunnerSettings::from_config(config)?))
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn runner(&self) -> &Arc<CampaignRunner> {
        &self.runner
    }

    pub async fn run_campaign(&self, campaign_id: &str) -> CampaignResult<RunSummary> {
        self.runner.run_campaign(campaign_id).await
    }

    pub async fn run_campaign_with_cancel(
        &self,
        campaign_id: &str,
        cancel: &CancelToken,
    ) -> CampaignResult<RunSummary> {
        self.runner.run_campaign_with_cancel(campaign_id, cancel).await
    }

    pub async fn trigger_topic(&self, topic: &str) -> CampaignResult<Option<RunSummary>> {
        trigger_topic(&self.repo, &self.runner, topic).await
    }

    pub async fn reconcile(&self, callback: &StatusCallback) -> CampaignResult<UpsertOutcome> {
        self.reconciler.reconcile(callback).await
    }

    pub async fn handle_inbound(&self, from: &str, body: &str) -> CampaignResult<InboundEvent> {
        self.inbound.handle(from, body).await
    }

    pub async fn stats(&self) -> CampaignResult<DeliveryStats> {
        delivery_stats(&self.repo).await
    }
}
