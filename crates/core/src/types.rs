//! Typed records for every collection the campaign engine touches.

use crate::error::{CampaignError, FieldError};
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Free-form user attributes used for placeholder substitution.
pub type Attributes = BTreeMap<String, serde_json::Value>;

// ─── Users ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsentState {
    #[default]
    Started,
    Subscribed,
    Stopped,
}

impl ConsentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentState::Started => "STARTED",
            ConsentState::Subscribed => "SUBSCRIBED",
            ConsentState::Stopped => "STOPPED",
        }
    }
}

/// A message recipient, keyed by channel address (E.164 phone number).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub wa_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub consent_state: ConsentState,
    #[serde(default = "chrono::Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "chrono::Utc::now")]
    pub updated_at: DateTime<Utc>,
}

// ─── Subscriptions ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub user_id: String,
    pub topic: String,
    #[serde(default = "chrono::Utc::now")]
    pub subscribed_at: DateTime<Utc>,
    #[serde(default)]
    pub unsubscribed_at: Option<DateTime<Utc>>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.unsubscribed_at.is_none()
    }
}

// ─── Templates ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageChannel {
    #[default]
    Whatsapp,
    Sms,
}

impl MessageChannel {
    /// Address format the provider expects for a recipient on this channel.
    pub fn address(&self, user_id: &str) -> String {
        match self {
            MessageChannel::Whatsapp => format!("whatsapp:{user_id}"),
            MessageChannel::Sms => user_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    #[serde(default)]
    pub channel: MessageChannel,
    #[serde(default = "default_locale")]
    pub locale: String,
    pub content: String,
    #[serde(default)]
    pub placeholders: Vec<String>,
    /// Provider-side content template reference (e.g. a Twilio Content SID).
    #[serde(default)]
    pub content_sid: Option<String>,
    #[serde(default = "chrono::Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_locale() -> String {
    "en_US".to_string()
}

// ─── Campaigns ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    #[default]
    Scheduled,
    Running,
    Paused,
    Completed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Running => "running",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schedule {
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

/// Daily do-not-send window, stored as "HH:MM" strings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuietHoursWindow {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

impl QuietHoursWindow {
    pub fn parse(start: &str, end: &str) -> Result<Self, CampaignError> {
        let mut errors = Vec::new();
        let start = hhmm::parse(start)
            .map_err(|e| errors.push(FieldError::new("quiet_hours.start", e)))
            .ok();
        let end = hhmm::parse(end)
            .map_err(|e| errors.push(FieldError::new("quiet_hours.end", e)))
            .ok();
        match (start, end) {
            (Some(start), Some(end)) => Ok(Self { start, end }),
            _ => Err(CampaignError::Validation(errors)),
        }
    }

    pub fn wraps_midnight(&self) -> bool {
        self.start > self.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub topic: String,
    pub template_id: String,
    #[serde(default)]
    pub segment_id: Option<String>,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub status: CampaignStatus,
    #[serde(default)]
    pub rate_limit: Option<u32>,
    #[serde(default)]
    pub quiet_hours: Option<QuietHoursWindow>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default = "chrono::Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "chrono::Utc::now")]
    pub updated_at: DateTime<Utc>,
}

// ─── Delivery receipts ────────────────────────────────────────────────────

/// Gating or dispatch outcome of one recipient in one run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Sent,
    Skipped,
    Delayed,
    Failed,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Sent => "SENT",
            Decision::Skipped => "SKIPPED",
            Decision::Delayed => "DELAYED",
            Decision::Failed => "FAILED",
        }
    }
}

/// Send status: SUCCESS/ERROR at dispatch time, then whatever lifecycle
/// state the provider reports through status callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Success,
    Error,
    Accepted,
    Queued,
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
    Undelivered,
    Unknown,
    /// Provider status outside the lifecycle above, kept as reported.
    Other(String),
}

impl DeliveryStatus {
    const STORED: [DeliveryStatus; 11] = [
        DeliveryStatus::Success,
        DeliveryStatus::Error,
        DeliveryStatus::Accepted,
        DeliveryStatus::Queued,
        DeliveryStatus::Sending,
        DeliveryStatus::Sent,
        DeliveryStatus::Delivered,
        DeliveryStatus::Read,
        DeliveryStatus::Failed,
        DeliveryStatus::Undelivered,
        DeliveryStatus::Unknown,
    ];

    /// Map a provider lifecycle status (`delivered`, `read`, ...) onto the enum.
    pub fn from_provider(status: &str) -> Self {
        let status = status.trim();
        match status.to_ascii_lowercase().as_str() {
            "" => DeliveryStatus::Unknown,
            "accepted" => DeliveryStatus::Accepted,
            "queued" => DeliveryStatus::Queued,
            "sending" => DeliveryStatus::Sending,
            "sent" => DeliveryStatus::Sent,
            "delivered" => DeliveryStatus::Delivered,
            "read" => DeliveryStatus::Read,
            "failed" => DeliveryStatus::Failed,
            "undelivered" => DeliveryStatus::Undelivered,
            _ => DeliveryStatus::Other(status.to_string()),
        }
    }

    /// Inverse of `as_str` for values read back from the store.
    fn from_stored(value: String) -> Self {
        Self::STORED
            .into_iter()
            .find(|status| status.as_str() == value)
            .unwrap_or(DeliveryStatus::Other(value))
    }

    pub fn as_str(&self) -> &str {
        match self {
            DeliveryStatus::Success => "SUCCESS",
            DeliveryStatus::Error => "ERROR",
            DeliveryStatus::Accepted => "ACCEPTED",
            DeliveryStatus::Queued => "QUEUED",
            DeliveryStatus::Sending => "SENDING",
            DeliveryStatus::Sent => "SENT",
            DeliveryStatus::Delivered => "DELIVERED",
            DeliveryStatus::Read => "READ",
            DeliveryStatus::Failed => "FAILED",
            DeliveryStatus::Undelivered => "UNDELIVERED",
            DeliveryStatus::Unknown => "UNKNOWN",
            DeliveryStatus::Other(status) => status,
        }
    }
}

impl Serialize for DeliveryStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DeliveryStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from_stored)
    }
}

/// Identifies the run a receipt belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptContext {
    pub campaign_id: String,
    pub run_id: String,
    pub user_id: String,
}

/// Audit record for one recipient in one run, later reconciled with
/// provider status callbacks by `provider_message_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryReceipt {
    pub id: String,
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub decision: Option<Decision>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub status: Option<DeliveryStatus>,
    #[serde(default)]
    pub provider_message_id: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub raw_payload: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl DeliveryReceipt {
    fn for_run(
        ctx: &ReceiptContext,
        decision: Decision,
        reason: Option<String>,
        status: Option<DeliveryStatus>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            campaign_id: Some(ctx.campaign_id.clone()),
            run_id: Some(ctx.run_id.clone()),
            user_id: Some(ctx.user_id.clone()),
            decision: Some(decision),
            reason,
            status,
            provider_message_id: None,
            error_code: None,
            raw_payload: None,
            timestamp: now,
            updated_at: None,
        }
    }

    /// Recipient stopped by policy before dispatch.
    pub fn gated(
        ctx: &ReceiptContext,
        decision: Decision,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self::for_run(ctx, decision, Some(reason.into()), None, now)
    }

    pub fn sent(ctx: &ReceiptContext, provider_message_id: String, now: DateTime<Utc>) -> Self {
        let mut receipt =
            Self::for_run(ctx, Decision::Sent, None, Some(DeliveryStatus::Success), now);
        receipt.provider_message_id = Some(provider_message_id);
        receipt
    }

    pub fn failed(ctx: &ReceiptContext, reason: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::for_run(
            ctx,
            Decision::Failed,
            Some(reason.into()),
            Some(DeliveryStatus::Error),
            now,
        )
    }
}

/// Lifecycle update reported by the send provider's status webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusCallback {
    pub message_id: String,
    pub status: String,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub raw_payload: serde_json::Value,
}

// ─── Inbound events ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundCommand {
    Start,
    Stop,
    Subscribe,
    Unsubscribe,
}

/// Audit entry for one inbound message from a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub id: String,
    pub from: String,
    pub body: String,
    #[serde(default)]
    pub command: Option<InboundCommand>,
    #[serde(default)]
    pub topic: Option<String>,
    pub timestamp: DateTime<Utc>,
}

// ─── Run results ──────────────────────────────────────────────────────────

/// Counts returned by a campaign run. `completed` campaigns may still have
/// `total_sent < total_processed`; callers inspect the counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSummary {
    pub campaign_id: String,
    pub run_id: String,
    pub total_processed: u64,
    pub total_sent: u64,
    pub total_skipped: u64,
    pub total_delayed: u64,
    pub total_failed: u64,
    pub total_missing: u64,
    pub cancelled: bool,
}

/// Dashboard-level delivery counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeliveryStats {
    pub total_users: u64,
    pub opt_outs: u64,
    pub sent: u64,
    pub failed: u64,
    pub delivery_pct: f64,
    pub failed_pct: f64,
}

/// "HH:MM" (de)serialization for time-of-day fields.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn parse(value: &str) -> Result<NaiveTime, String> {
        NaiveTime::parse_from_str(value.trim(), FORMAT)
            .map_err(|e| format!("expected HH:MM, got '{value}' ({e})"))
    }

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }
}
