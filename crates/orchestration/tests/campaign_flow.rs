//! End-to-end campaign runs against the in-memory store.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use campaign_channels::{
    ProviderError, RetryPolicy, ScriptedProvider, SendProvider, SendRequest,
};
use campaign_core::types::{
    Campaign, CampaignStatus, ConsentState, Decision, DeliveryReceipt, DeliveryStatus,
    QuietHoursWindow, StatusCallback, Subscription, Template, User,
};
use campaign_core::{CampaignError, FixedClock};
use campaign_orchestration::{CampaignEngine, CancelToken, RunnerSettings};
use campaign_store::{Collection, InMemoryStore, Repository, UpsertOutcome};
use chrono::{NaiveTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

const ANN: &str = "+15550000001";
const BOB: &str = "+15550000002";

fn settings() -> RunnerSettings {
    RunnerSettings {
        default_rate_limit: 50,
        cooldown: Duration::ZERO,
        default_quiet_hours: QuietHoursWindow::parse("22:00", "06:00").unwrap(),
        retry: RetryPolicy {
            max_attempts: 3,
            delay: Duration::ZERO,
        },
        from_address: "whatsapp:+14155238886".into(),
        default_content_sid: None,
        record_missing_recipients: false,
    }
}

struct Harness {
    store: Arc<InMemoryStore>,
    repo: Repository,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let repo = Repository::new(store.clone());
        Self { store, repo }
    }

    fn engine_at(
        &self,
        provider: Arc<dyn SendProvider>,
        hour: u32,
        settings: RunnerSettings,
    ) -> CampaignEngine {
        let clock = Arc::new(FixedClock::at(NaiveTime::from_hms_opt(hour, 0, 0).unwrap()));
        CampaignEngine::new(self.repo.clone(), provider, clock, settings)
    }

    fn engine(&self, provider: Arc<dyn SendProvider>) -> CampaignEngine {
        self.engine_at(provider, 12, settings())
    }

    async fn user(&self, id: &str, name: &str, consent: ConsentState) {
        let now = Utc::now();
        let user = User {
            id: id.into(),
            wa_id: None,
            name: Some(name.into()),
            attributes: [("name".to_string(), json!(name))].into_iter().collect(),
            consent_state: consent,
            created_at: now,
            updated_at: now,
        };
        self.repo.insert_user(&user).await.unwrap();
    }

    async fn subscribe(&self, user_id: &str, topic: &str) {
        let sub = Subscription {
            id: None,
            user_id: user_id.into(),
            topic: topic.into(),
            subscribed_at: Utc::now(),
            unsubscribed_at: None,
        };
        self.repo.insert_subscription(&sub).await.unwrap();
    }

    async fn template(&self, id: &str, content: &str, content_sid: Option<&str>) {
        let template: Template = serde_json::from_value(json!({
            "id": id,
            "content": content,
            "content_sid": content_sid,
        }))
        .unwrap();
        self.repo.insert_template(&template).await.unwrap();
    }

    async fn campaign(&self, id: &str, topic: &str, template_id: &str) {
        self.campaign_with_limit(id, topic, template_id, 50).await;
    }

    async fn campaign_with_limit(&self, id: &str, topic: &str, template_id: &str, limit: u32) {
        let campaign: Campaign = serde_json::from_value(json!({
            "id": id,
            "topic": topic,
            "template_id": template_id,
            "rate_limit": limit,
        }))
        .unwrap();
        self.repo.insert_campaign(&campaign).await.unwrap();
    }

    async fn receipts(&self, campaign_id: &str) -> Vec<DeliveryReceipt> {
        self.repo.receipts_for_campaign(campaign_id).await.unwrap()
    }

    async fn status(&self, campaign_id: &str) -> CampaignStatus {
        self.repo.get_campaign(campaign_id).await.unwrap().unwrap().status
    }

    /// Ann subscribed to PROMOS, template "Hi {{name}}", campaign c1.
    async fn standard(&self, consent: ConsentState) {
        self.user(ANN, "Ann", consent).await;
        self.subscribe(ANN, "PROMOS").await;
        self.template("t1", "Hi {{name}}", None).await;
        self.campaign("c1", "PROMOS", "t1").await;
    }
}

#[tokio::test]
async fn test_single_recipient_end_to_end() {
    let h = Harness::new();
    h.standard(ConsentState::Subscribed).await;
    let provider = Arc::new(ScriptedProvider::new());
    let engine = h.engine(provider.clone());

    let summary = engine.run_campaign("c1").await.unwrap();
    assert_eq!(summary.total_processed, 1);
    assert_eq!(summary.total_sent, 1);
    assert!(!summary.cancelled);

    let receipts = h.receipts("c1").await;
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].decision, Some(Decision::Sent));
    assert_eq!(receipts[0].status, Some(DeliveryStatus::Success));
    assert_eq!(receipts[0].run_id.as_deref(), Some(summary.run_id.as_str()));
    assert!(receipts[0].provider_message_id.is_some());

    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].to, "whatsapp:+15550000001");
    assert_eq!(requests[0].from, "whatsapp:+14155238886");
    assert_eq!(requests[0].variables["1"], "Hi Ann");

    let campaign = h.repo.get_campaign("c1").await.unwrap().unwrap();
    assert_eq!(campaign.status, CampaignStatus::Completed);
    assert!(campaign.last_run.is_some());
}

#[tokio::test]
async fn test_opted_out_user_never_reaches_provider() {
    let h = Harness::new();
    h.standard(ConsentState::Stopped).await;
    let provider = Arc::new(ScriptedProvider::new());

    let summary = h.engine(provider.clone()).run_campaign("c1").await.unwrap();
    assert_eq!(summary.total_processed, 0);
    assert_eq!(summary.total_skipped, 1);
    assert_eq!(provider.calls(), 0);

    let receipts = h.receipts("c1").await;
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].decision, Some(Decision::Skipped));
    assert_eq!(receipts[0].reason.as_deref(), Some("opted out"));
}

#[tokio::test]
async fn test_quiet_hours_delay_recipient() {
    let h = Harness::new();
    h.standard(ConsentState::Started).await;
    let provider = Arc::new(ScriptedProvider::new());

    let summary = h
        .engine_at(provider.clone(), 23, settings())
        .run_campaign("c1")
        .await
        .unwrap();
    assert_eq!(summary.total_delayed, 1);
    assert_eq!(provider.calls(), 0);

    let receipts = h.receipts("c1").await;
    assert_eq!(receipts[0].decision, Some(Decision::Delayed));
    assert_eq!(receipts[0].reason.as_deref(), Some("quiet hours"));
    assert_eq!(h.status("c1").await, CampaignStatus::Completed);
}

#[tokio::test]
async fn test_exhausted_retries_record_failure_and_still_complete() {
    let h = Harness::new();
    h.standard(ConsentState::Subscribed).await;
    let provider = Arc::new(ScriptedProvider::failing(3));

    let summary = h.engine(provider.clone()).run_campaign("c1").await.unwrap();
    assert_eq!(summary.total_processed, 1);
    assert_eq!(summary.total_sent, 0);
    assert_eq!(summary.total_failed, 1);
    assert_eq!(provider.calls(), 3);

    let receipts = h.receipts("c1").await;
    assert_eq!(receipts[0].decision, Some(Decision::Failed));
    assert_eq!(receipts[0].reason.as_deref(), Some("max retries reached"));
    assert_eq!(receipts[0].status, Some(DeliveryStatus::Error));
    assert_eq!(h.status("c1").await, CampaignStatus::Completed);
}

#[tokio::test]
async fn test_permanent_rejection_is_not_retried() {
    let h = Harness::new();
    h.standard(ConsentState::Subscribed).await;
    let provider = Arc::new(ScriptedProvider::with_responses([Err(ProviderError::Permanent(
        "Invalid 'To' Phone Number".into(),
    ))]));

    h.engine(provider.clone()).run_campaign("c1").await.unwrap();
    assert_eq!(provider.calls(), 1);
    let receipts = h.receipts("c1").await;
    assert_eq!(
        receipts[0].reason.as_deref(),
        Some("rejected by provider: Invalid 'To' Phone Number")
    );
}

#[tokio::test]
async fn test_missing_campaign_or_template_is_not_found() {
    let h = Harness::new();
    let engine = h.engine(Arc::new(ScriptedProvider::new()));

    let err = engine.run_campaign("nope").await.unwrap_err();
    assert!(err.is_not_found());

    h.user(ANN, "Ann", ConsentState::Subscribed).await;
    h.subscribe(ANN, "PROMOS").await;
    h.campaign("c1", "PROMOS", "missing-template").await;
    match engine.run_campaign("c1").await.unwrap_err() {
        CampaignError::NotFound { entity, id } => {
            assert_eq!(entity, "template");
            assert_eq!(id, "missing-template");
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
    assert_eq!(h.store.len(Collection::DeliveryReceipts), 0);
    assert_eq!(h.status("c1").await, CampaignStatus::Scheduled);
    assert!(!engine.runner().is_running("c1"));
}

#[tokio::test]
async fn test_missing_user_dropped_without_receipt() {
    let h = Harness::new();
    h.standard(ConsentState::Subscribed).await;
    h.subscribe(BOB, "PROMOS").await;

    let engine = h.engine(Arc::new(ScriptedProvider::new()));
    let summary = engine.run_campaign("c1").await.unwrap();
    assert_eq!(summary.total_missing, 1);
    assert_eq!(summary.total_processed, 1);
    assert_eq!(h.receipts("c1").await.len(), 1);
}

#[tokio::test]
async fn test_missing_user_recorded_when_configured() {
    let h = Harness::new();
    h.standard(ConsentState::Subscribed).await;
    h.subscribe(BOB, "PROMOS").await;
    let settings = RunnerSettings {
        record_missing_recipients: true,
        ..settings()
    };

    let summary = h
        .engine_at(Arc::new(ScriptedProvider::new()), 12, settings)
        .run_campaign("c1")
        .await
        .unwrap();
    assert_eq!(summary.total_missing, 1);
    assert_eq!(summary.total_skipped, 1);

    let receipts = h.receipts("c1").await;
    let missing = receipts
        .iter()
        .find(|r| r.user_id.as_deref() == Some(BOB))
        .unwrap();
    assert_eq!(missing.decision, Some(Decision::Skipped));
    assert_eq!(missing.reason.as_deref(), Some("user not found"));
}

#[tokio::test]
async fn test_duplicate_subscriptions_processed_independently() {
    let h = Harness::new();
    h.standard(ConsentState::Subscribed).await;
    h.subscribe(ANN, "PROMOS").await;
    let provider = Arc::new(ScriptedProvider::new());

    let summary = h.engine(provider.clone()).run_campaign("c1").await.unwrap();
    assert_eq!(summary.total_processed, 2);
    assert_eq!(provider.calls(), 2);
    assert_eq!(h.receipts("c1").await.len(), 2);
}

#[tokio::test]
async fn test_receipts_follow_processing_order() {
    let h = Harness::new();
    h.standard(ConsentState::Subscribed).await;
    h.user(BOB, "Bob", ConsentState::Stopped).await;
    h.subscribe(BOB, "PROMOS").await;

    h.engine(Arc::new(ScriptedProvider::new())).run_campaign("c1").await.unwrap();
    let decisions: Vec<_> = h.receipts("c1").await.iter().map(|r| r.decision).collect();
    assert_eq!(decisions, vec![Some(Decision::Sent), Some(Decision::Skipped)]);
}

#[tokio::test]
async fn test_content_sid_falls_back_to_default() {
    let h = Harness::new();
    h.standard(ConsentState::Subscribed).await;
    h.template("t2", "Bye {{name}}", Some("HXtemplate")).await;
    h.campaign("c2", "PROMOS", "t2").await;
    let provider = Arc::new(ScriptedProvider::new());
    let settings = RunnerSettings {
        default_content_sid: Some("HXdefault".into()),
        ..settings()
    };
    let engine = h.engine_at(provider.clone(), 12, settings);

    engine.run_campaign("c1").await.unwrap();
    engine.run_campaign("c2").await.unwrap();
    let refs: Vec<_> = provider
        .requests()
        .into_iter()
        .map(|r| r.content_ref)
        .collect();
    assert_eq!(refs, vec![Some("HXdefault".to_string()), Some("HXtemplate".to_string())]);
}

#[tokio::test]
async fn test_trigger_topic_runs_scheduled_campaign_once() {
    let h = Harness::new();
    h.standard(ConsentState::Subscribed).await;
    let engine = h.engine(Arc::new(ScriptedProvider::new()));

    let summary = engine.trigger_topic("PROMOS").await.unwrap().unwrap();
    assert_eq!(summary.campaign_id, "c1");
    assert_eq!(summary.total_sent, 1);

    assert!(engine.trigger_topic("PROMOS").await.unwrap().is_none());
    assert!(engine.trigger_topic("UNKNOWN").await.unwrap().is_none());
}

#[tokio::test]
async fn test_status_callback_reconciles_sent_receipt() {
    let h = Harness::new();
    h.standard(ConsentState::Subscribed).await;
    let engine = h.engine(Arc::new(ScriptedProvider::new()));
    engine.run_campaign("c1").await.unwrap();
    let sent_id = h.receipts("c1").await[0].provider_message_id.clone().unwrap();

    for status in ["delivered", "read"] {
        let outcome = engine
            .reconcile(&StatusCallback {
                message_id: sent_id.clone(),
                status: status.into(),
                error_code: None,
                raw_payload: json!({"MessageSid": sent_id, "MessageStatus": status}),
            })
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);
    }

    let receipts = h.receipts("c1").await;
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].status, Some(DeliveryStatus::Read));
    assert_eq!(receipts[0].decision, Some(Decision::Sent));

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.delivery_pct, 100.0);
    assert_eq!(stats.total_users, 1);
}

fn callback(message_id: &str, status: &str) -> StatusCallback {
    StatusCallback {
        message_id: message_id.into(),
        status: status.into(),
        error_code: None,
        raw_payload: json!({"MessageSid": message_id, "MessageStatus": status}),
    }
}

#[tokio::test]
async fn test_callback_before_receipt_reconciles_single_record() {
    let h = Harness::new();
    h.standard(ConsentState::Subscribed).await;
    let provider = Arc::new(ScriptedProvider::with_responses([Ok("SMearly".to_string())]));
    let engine = h.engine(provider);

    let early = engine.reconcile(&callback("SMearly", "sent")).await.unwrap();
    assert_eq!(early, UpsertOutcome::Created);

    engine.run_campaign("c1").await.unwrap();
    assert_eq!(h.store.len(Collection::DeliveryReceipts), 1);

    let late = engine.reconcile(&callback("SMearly", "delivered")).await.unwrap();
    assert_eq!(late, UpsertOutcome::Updated);

    let receipts = h.receipts("c1").await;
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].decision, Some(Decision::Sent));
    assert_eq!(receipts[0].user_id.as_deref(), Some(ANN));
    assert_eq!(receipts[0].status, Some(DeliveryStatus::Delivered));
    assert_eq!(engine.stats().await.unwrap().sent, 1);
}

#[tokio::test]
async fn test_unlisted_provider_status_stored_as_reported() {
    let h = Harness::new();
    h.standard(ConsentState::Subscribed).await;
    let engine = h.engine(Arc::new(ScriptedProvider::new()));
    engine.run_campaign("c1").await.unwrap();
    let sent_id = h.receipts("c1").await[0].provider_message_id.clone().unwrap();

    engine.reconcile(&callback(&sent_id, "canceled")).await.unwrap();
    let receipt = h.repo.receipt_by_provider_id(&sent_id).await.unwrap().unwrap();
    assert_eq!(receipt.status, Some(DeliveryStatus::Other("canceled".into())));
}

/// Holds every send until released.
struct BlockingProvider {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl SendProvider for BlockingProvider {
    async fn send(&self, _request: &SendRequest) -> Result<String, ProviderError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok("SMblocked".into())
    }

    fn name(&self) -> &'static str {
        "blocking"
    }
}

#[tokio::test]
async fn test_concurrent_run_of_same_campaign_rejected() {
    let h = Harness::new();
    h.standard(ConsentState::Subscribed).await;
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let engine = h.engine(Arc::new(BlockingProvider {
        entered: entered.clone(),
        release: release.clone(),
    }));

    let background = engine.clone();
    let first = tokio::spawn(async move { background.run_campaign("c1").await });
    entered.notified().await;

    assert!(engine.runner().is_running("c1"));
    let err = engine.run_campaign("c1").await.unwrap_err();
    assert!(matches!(err, CampaignError::RunInProgress(ref id) if id == "c1"));

    release.notify_one();
    let summary = first.await.unwrap().unwrap();
    assert_eq!(summary.total_sent, 1);
    assert!(!engine.runner().is_running("c1"));
    assert_eq!(h.receipts("c1").await.len(), 1);
}

/// Accepts sends and cancels the run on the first one.
struct CancellingProvider {
    token: CancelToken,
}

#[async_trait]
impl SendProvider for CancellingProvider {
    async fn send(&self, _request: &SendRequest) -> Result<String, ProviderError> {
        self.token.cancel();
        Ok("SMcancel".into())
    }

    fn name(&self) -> &'static str {
        "cancelling"
    }
}

#[tokio::test]
async fn test_cancelled_run_stops_between_recipients_without_finalizing() {
    let h = Harness::new();
    h.standard(ConsentState::Subscribed).await;
    h.user(BOB, "Bob", ConsentState::Subscribed).await;
    h.subscribe(BOB, "PROMOS").await;

    let token = CancelToken::new();
    let engine = h.engine(Arc::new(CancellingProvider {
        token: token.clone(),
    }));

    let summary = engine.run_campaign_with_cancel("c1", &token).await.unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.total_processed, 1);
    assert_eq!(h.receipts("c1").await.len(), 1);
    assert_eq!(h.status("c1").await, CampaignStatus::Scheduled);
}

#[tokio::test]
async fn test_rate_limit_does_not_drop_recipients() {
    let h = Harness::new();
    h.user(ANN, "Ann", ConsentState::Subscribed).await;
    h.user(BOB, "Bob", ConsentState::Subscribed).await;
    h.subscribe(ANN, "PROMOS").await;
    h.subscribe(BOB, "PROMOS").await;
    h.template("t1", "Hi {{name}}", None).await;
    h.campaign_with_limit("c1", "PROMOS", "t1", 1).await;

    let engine = h.engine(Arc::new(ScriptedProvider::new()));
    let summary = engine.run_campaign("c1").await.unwrap();
    assert_eq!(summary.total_processed, 2);
    assert_eq!(summary.total_sent, 2);
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_after_every_limit_dispatches() {
    let h = Harness::new();
    h.template("t1", "Hi {{name}}", None).await;
    h.campaign_with_limit("c1", "PROMOS", "t1", 2).await;
    for i in 0..6 {
        let id = format!("+1555000010{i}");
        let consent = if i == 2 {
            ConsentState::Stopped
        } else {
            ConsentState::Subscribed
        };
        h.user(&id, "Guest", consent).await;
        h.subscribe(&id, "PROMOS").await;
    }
    let settings = RunnerSettings {
        cooldown: Duration::from_secs(60),
        ..settings()
    };
    let provider = Arc::new(ScriptedProvider::new());
    let engine = h.engine_at(provider.clone(), 12, settings);

    let started = tokio::time::Instant::now();
    let summary = engine.run_campaign("c1").await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(summary.total_processed, 5);
    assert_eq!(summary.total_skipped, 1);
    assert_eq!(provider.calls(), 5);
    // Pauses after the 2nd and 4th dispatch; the opted-out user is not counted.
    assert!(elapsed >= Duration::from_secs(120), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(180), "elapsed {elapsed:?}");
}
