//! Campaign run controller.
//!
//! A run loads the campaign and its template, resolves the topic's
//! recipients, and processes them one at a time: gate, render, dispatch,
//! record, throttle. The campaign is marked completed when the loop ends,
//! whatever the per-recipient outcomes were.

use crate::recorder::ReceiptRecorder;
use crate::resolver::RecipientResolver;
use campaign_channels::{DispatchOutcome, Dispatcher, RetryPolicy, SendProvider, SendRequest};
use campaign_core::templates::render_template;
use campaign_core::types::{
    Campaign, Decision, DeliveryReceipt, QuietHoursWindow, ReceiptContext, RunSummary, Template,
};
use campaign_core::{AppConfig, CampaignError, CampaignResult, Clock};
use campaign_intelligent_delivery::{DeliveryGate, RunThrottle};
use campaign_store::Repository;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const REASON_USER_NOT_FOUND: &str = "user not found";

/// Cooperative cancellation flag, checked between recipients.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runner knobs resolved from `AppConfig`.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub default_rate_limit: u32,
    pub cooldown: Duration,
    pub default_quiet_hours: QuietHoursWindow,
    pub retry: RetryPolicy,
    pub from_address: String,
    pub default_content_sid: Option<String>,
    pub record_missing_recipients: bool,
}

impl RunnerSettings {
    pub fn from_config(config: &AppConfig) -> CampaignResult<Self> {
        let runner = &config.runner;
        let default_quiet_hours =
            QuietHoursWindow::parse(&runner.quiet_hours_start, &runner.quiet_hours_end)
                .map_err(|e| CampaignError::Config(format!("runner quiet hours: {e}")))?;
        if runner.default_rate_limit == 0 {
            return Err(CampaignError::Config(
                "runner.default_rate_limit must be greater than zero".into(),
            ));
        }
        Ok(Self {
            default_rate_limit: runner.default_rate_limit,
            cooldown: runner.cooldown(),
            default_quiet_hours,
            retry: RetryPolicy::from_config(runner),
            from_address: config.provider.from_address.clone(),
            default_content_sid: config.provider.default_content_sid.clone(),
            record_missing_recipients: runner.record_missing_recipients,
        })
    }
}

/// Removes the campaign from the active-run table when dropped.
struct RunGuard {
    active_runs: Arc<DashMap<String, Uuid>>,
    campaign_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.active_runs.remove(&self.campaign_id);
    }
}

pub struct CampaignRunner {
    repo: Repository,
    resolver: RecipientResolver,
    recorder: ReceiptRecorder,
    gate: DeliveryGate,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    settings: RunnerSettings,
    active_runs: Arc<DashMap<String, Uuid>>,
}

impl std::fmt::Debug for CampaignRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CampaignRunner")
            .field("settings", &self.settings)
            .field("active_runs", &self.active_runs.len())
            .finish()
    }
}

impl CampaignRunner {
    pub fn new(
        repo: Repository,
        provider: Arc<dyn SendProvider>,
        clock: Arc<dyn Clock>,
        settings: RunnerSettings,
    ) -> Self {
        info!(
            provider = provider.name(),
            default_rate_limit = settings.default_rate_limit,
            max_attempts = settings.retry.max_attempts,
            "Campaign runner initialized"
        );
        Self {
            resolver: RecipientResolver::new(repo.clone()),
            recorder: ReceiptRecorder::new(repo.clone()),
            gate: DeliveryGate::new(settings.default_quiet_hours),
            dispatcher: Dispatcher::new(provider, settings.retry),
            repo,
            clock,
            settings,
            active_runs: Arc::new(DashMap::new()),
        }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Whether a run of `campaign_id` is currently in progress.
    pub fn is_running(&self, campaign_id: &str) -> bool {
        self.active_runs.contains_key(campaign_id)
    }

    pub async fn run_campaign(&self, campaign_id: &str) -> CampaignResult<RunSummary> {
        self.run_campaign_with_cancel(campaign_id, &CancelToken::new()).await
    }

    /// Execute one run of `campaign_id`.
    ///
    /// Fails with `RunInProgress` if the campaign is already running in
    /// this process, and with `NotFound` if the campaign or its template is
    /// missing; neither case writes a receipt. Once recipients are being
    /// processed, per-recipient failures are recorded and the run goes on.
    /// A cancelled run stops before the next recipient and leaves the
    /// campaign status untouched.
    pub async fn run_campaign_with_cancel(
        &self,
        campaign_id: &str,
        cancel: &CancelToken,
    ) -> CampaignResult<RunSummary> {
        let run_id = Uuid::new_v4();
        let _guard = self.acquire(campaign_id, run_id)?;
        let started = Instant::now();

        let campaign = self
            .repo
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| CampaignError::not_found("campaign", campaign_id))?;
        let template = self
            .repo
            .get_template(&campaign.template_id)
            .await?
            .ok_or_else(|| CampaignError::not_found("template", &campaign.template_id))?;

        let recipients = self.resolver.resolve(&campaign.topic).await?;
        let throttle = RunThrottle::new(
            campaign.rate_limit.unwrap_or(self.settings.default_rate_limit),
            self.settings.cooldown,
        );

        info!(
            campaign_id = %campaign.id,
            run_id = %run_id,
            topic = %campaign.topic,
            template_id = %template.id,
            recipients = recipients.len(),
            rate_limit = throttle.limit(),
            "Campaign run started"
        );
        metrics::counter!("campaign.runs").increment(1);

        let mut summary = RunSummary {
            campaign_id: campaign.id.clone(),
            run_id: run_id.to_string(),
            ..RunSummary::default()
        };

        for user_id in &recipients {
            if cancel.is_cancelled() {
                warn!(campaign_id = %campaign.id, run_id = %run_id, "Campaign run cancelled");
                summary.cancelled = true;
                break;
            }
            self.process_recipient(&campaign, &template, user_id, &throttle, &mut summary)
                .await;
        }

        if summary.cancelled {
            metrics::counter!("campaign.runs_cancelled").increment(1);
        } else {
            self.repo
                .finalize_campaign(&campaign.id, self.clock.now_utc())
                .await?;
        }

        metrics::histogram!("campaign.run_duration_ms")
            .record(started.elapsed().as_secs_f64() * 1000.0);
        info!(
            campaign_id = %campaign.id,
            run_id = %run_id,
            processed = summary.total_processed,
            sent = summary.total_sent,
            skipped = summary.total_skipped,
            delayed = summary.total_delayed,
            failed = summary.total_failed,
            missing = summary.total_missing,
            cancelled = summary.cancelled,
            "Campaign run finished"
        );
        Ok(summary)
    }

    fn acquire(&self, campaign_id: &str, run_id: Uuid) -> CampaignResult<RunGuard> {
        match self.active_runs.entry(campaign_id.to_string()) {
            Entry::Occupied(existing) => {
                warn!(
                    campaign_id = %campaign_id,
                    active_run_id = %existing.get(),
                    "Rejecting concurrent campaign run"
                );
                Err(CampaignError::RunInProgress(campaign_id.to_string()))
            }
            Entry::Vacant(slot) => {
                slot.insert(run_id);
                Ok(RunGuard {
                    active_runs: Arc::clone(&self.active_runs),
                    campaign_id: campaign_id.to_string(),
                })
            }
        }
    }

    async fn process_recipient(
        &self,
        campaign: &Campaign,
        template: &Template,
        user_id: &str,
        throttle: &RunThrottle,
        summary: &mut RunSummary,
    ) {
        let ctx = ReceiptContext {
            campaign_id: campaign.id.clone(),
            run_id: summary.run_id.clone(),
            user_id: user_id.to_string(),
        };

        let user = match self.repo.get_user(user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                summary.total_missing += 1;
                warn!(campaign_id = %campaign.id, user_id = %user_id, "Subscribed user not found");
                if self.settings.record_missing_recipients {
                    let receipt = DeliveryReceipt::gated(
                        &ctx,
                        Decision::Skipped,
                        REASON_USER_NOT_FOUND,
                        self.clock.now_utc(),
                    );
                    self.recorder.record(&receipt).await;
                    summary.total_skipped += 1;
                }
                return;
            }
            Err(e) => {
                error!(
                    campaign_id = %campaign.id,
                    user_id = %user_id,
                    error = %e,
                    "User lookup failed"
                );
                let receipt = DeliveryReceipt::failed(
                    &ctx,
                    format!("user lookup failed: {e}"),
                    self.clock.now_utc(),
                );
                self.recorder.record(&receipt).await;
                summary.total_failed += 1;
                return;
            }
        };

        let decision = self
            .gate
            .evaluate(&user, campaign.quiet_hours.as_ref(), self.clock.local_time());
        if let Some((decision, reason)) = decision.receipt() {
            let receipt = DeliveryReceipt::gated(&ctx, decision, reason, self.clock.now_utc());
            self.recorder.record(&receipt).await;
            match decision {
                Decision::Delayed => summary.total_delayed += 1,
                _ => summary.total_skipped += 1,
            }
            return;
        }

        let rendered = render_template(&template.content, &user.attributes);
        let request = SendRequest::new(
            self.settings.from_address.clone(),
            template.channel.address(&user.id),
            template
                .content_sid
                .clone()
                .or_else(|| self.settings.default_content_sid.clone()),
            rendered,
        );

        let outcome = self.dispatcher.dispatch(&request).await;
        debug!(
            campaign_id = %campaign.id,
            user_id = %user.id,
            attempts = outcome.attempts(),
            "Dispatch finished"
        );
        let now = self.clock.now_utc();
        let receipt = match outcome {
            DispatchOutcome::Sent {
                provider_message_id,
                ..
            } => {
                summary.total_sent += 1;
                DeliveryReceipt::sent(&ctx, provider_message_id, now)
            }
            DispatchOutcome::Failed { reason, .. } => {
                summary.total_failed += 1;
                DeliveryReceipt::failed(&ctx, reason, now)
            }
        };
        self.recorder.record(&receipt).await;
        summary.total_processed += 1;

        throttle.after_dispatch().await;
    }
}
