//! Typed access to the document store.
//!
//! Every read decodes and validates into a `campaign_core::types` record;
//! every write serializes a typed record. Raw documents stay inside this
//! module.

use crate::error::StoreError;
use crate::traits::{to_document, Collection, Document, DocumentStore, Filter};
use campaign_core::types::{
    Campaign, CampaignStatus, ConsentState, Decision, DeliveryReceipt, DeliveryStatus,
    InboundEvent, StatusCallback, Subscription, Template, User,
};
use campaign_core::validation::{check, decode, Validate};
use campaign_core::CampaignResult;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Whether a status callback matched an existing receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Updated,
    Created,
}

/// Explicit store handle passed to every engine component.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn DocumentStore>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository").finish_non_exhaustive()
    }
}

impl Repository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    async fn find_typed<T>(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> CampaignResult<Option<T>>
    where
        T: DeserializeOwned + Validate,
    {
        match self.store.find_one(collection, filter).await? {
            Some(document) => Ok(Some(decode(Value::Object(document))?)),
            None => Ok(None),
        }
    }

    async fn insert_typed<T>(&self, collection: Collection, record: &T) -> CampaignResult<String>
    where
        T: serde::Serialize + Validate,
    {
        check(record)?;
        Ok(self.store.insert_one(collection, to_document(record)?).await?)
    }

    // ─── Users ─────────────────────────────────────────────────────────────

    pub async fn get_user(&self, id: &str) -> CampaignResult<Option<User>> {
        self.find_typed(Collection::Users, &Filter::by_id(id)).await
    }

    pub async fn insert_user(&self, user: &User) -> CampaignResult<String> {
        self.insert_typed(Collection::Users, user).await
    }

    /// Set a user's consent state, creating a bare user record if needed.
    pub async fn set_consent(
        &self,
        user_id: &str,
        state: ConsentState,
        now: DateTime<Utc>,
    ) -> CampaignResult<()> {
        let result = self
            .store
            .update_one(
                Collection::Users,
                &Filter::by_id(user_id),
                fields(json!({
                    "consent_state": state.as_str(),
                    "updated_at": now,
                })),
                false,
            )
            .await?;
        if result.matched == 0 {
            let user = User {
                id: user_id.to_string(),
                wa_id: None,
                name: None,
                attributes: Default::default(),
                consent_state: state,
                created_at: now,
                updated_at: now,
            };
            self.insert_user(&user).await?;
        }
        Ok(())
    }

    // ─── Subscriptions ─────────────────────────────────────────────────────

    pub async fn insert_subscription(&self, subscription: &Subscription) -> CampaignResult<String> {
        self.insert_typed(Collection::Subscriptions, subscription).await
    }

    /// Active subscriptions for `topic`, in store order. Rows that fail
    /// validation are logged and skipped rather than failing the read.
    pub async fn active_subscriptions(&self, topic: &str) -> CampaignResult<Vec<Subscription>> {
        let filter = Filter::new()
            .eq("topic", topic)
            .eq("unsubscribed_at", Value::Null);
        let documents = self.store.find_many(Collection::Subscriptions, &filter).await?;
        let mut subscriptions = Vec::with_capacity(documents.len());
        for document in documents {
            match decode::<Subscription>(Value::Object(document)) {
                Ok(sub) => subscriptions.push(sub),
                Err(e) => warn!(topic = %topic, error = %e, "Skipping invalid subscription record"),
            }
        }
        Ok(subscriptions)
    }

    /// Mark `user_id` as subscribed to `topic`, reactivating a prior row.
    pub async fn subscribe(
        &self,
        user_id: &str,
        topic: &str,
        now: DateTime<Utc>,
    ) -> CampaignResult<()> {
        let filter = Filter::new().eq("user_id", user_id).eq("topic", topic);
        self.store
            .update_one(
                Collection::Subscriptions,
                &filter,
                fields(json!({
                    "subscribed_at": now,
                    "unsubscribed_at": null,
                })),
                true,
            )
            .await?;
        Ok(())
    }

    /// Stamp `unsubscribed_at` on the active subscription. Returns whether
    /// one existed.
    pub async fn unsubscribe(
        &self,
        user_id: &str,
        topic: &str,
        now: DateTime<Utc>,
    ) -> CampaignResult<bool> {
        let filter = Filter::new()
            .eq("user_id", user_id)
            .eq("topic", topic)
            .eq("unsubscribed_at", Value::Null);
        let result = self
            .store
            .update_one(
                Collection::Subscriptions,
                &filter,
                fields(json!({ "unsubscribed_at": now })),
                false,
            )
            .await?;
        Ok(result.matched > 0)
    }

    // ─── Templates & campaigns ─────────────────────────────────────────────

    pub async fn get_template(&self, id: &str) -> CampaignResult<Option<Template>> {
        self.find_typed(Collection::Templates, &Filter::by_id(id)).await
    }

    pub async fn insert_template(&self, template: &Template) -> CampaignResult<String> {
        self.insert_typed(Collection::Templates, template).await
    }

    pub async fn get_campaign(&self, id: &str) -> CampaignResult<Option<Campaign>> {
        self.find_typed(Collection::Campaigns, &Filter::by_id(id)).await
    }

    pub async fn insert_campaign(&self, campaign: &Campaign) -> CampaignResult<String> {
        self.insert_typed(Collection::Campaigns, campaign).await
    }

    /// First scheduled campaign targeting `topic`.
    pub async fn find_scheduled_campaign(&self, topic: &str) -> CampaignResult<Option<Campaign>> {
        let filter = Filter::new()
            .eq("topic", topic)
            .eq("status", CampaignStatus::Scheduled.as_str());
        self.find_typed(Collection::Campaigns, &filter).await
    }

    /// Mark a campaign completed and stamp its last run time.
    pub async fn finalize_campaign(&self, id: &str, now: DateTime<Utc>) -> CampaignResult<()> {
        self.store
            .update_one(
                Collection::Campaigns,
                &Filter::by_id(id),
                fields(json!({
                    "status": CampaignStatus::Completed.as_str(),
                    "last_run": now,
                    "updated_at": now,
                })),
                false,
            )
            .await?;
        Ok(())
    }

    // ─── Delivery receipts ─────────────────────────────────────────────────

    /// Store a run receipt. A receipt carrying a provider message id is
    /// merged into the status record a callback may already have created for
    /// that id; the callback's lifecycle fields are kept. Returns the id of
    /// the stored record.
    pub async fn insert_receipt(&self, receipt: &DeliveryReceipt) -> CampaignResult<String> {
        let Some(message_id) = receipt.provider_message_id.as_deref() else {
            return self.insert_typed(Collection::DeliveryReceipts, receipt).await;
        };
        check(receipt)?;
        if let Some(id) = self.merge_into_status_record(message_id, receipt).await? {
            return Ok(id);
        }
        let document = to_document(receipt)?;
        match self.store.insert_one(Collection::DeliveryReceipts, document).await {
            Ok(id) => Ok(id),
            // A callback landed between the merge attempt and the insert.
            Err(StoreError::DuplicateKey { .. }) => {
                match self.merge_into_status_record(message_id, receipt).await? {
                    Some(id) => Ok(id),
                    None => Err(StoreError::DuplicateKey {
                        collection: Collection::DeliveryReceipts.as_str(),
                        field: "provider_message_id",
                        value: message_id.to_string(),
                    }
                    .into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Copy the run fields of `receipt` onto a callback-only record for
    /// `message_id`. `None` when no such record exists.
    async fn merge_into_status_record(
        &self,
        message_id: &str,
        receipt: &DeliveryReceipt,
    ) -> CampaignResult<Option<String>> {
        let filter = Filter::new()
            .eq("provider_message_id", message_id)
            .eq("decision", Value::Null);
        let mut set = to_document(receipt)?;
        for lifecycle in ["id", "status", "error_code", "raw_payload", "updated_at"] {
            set.remove(lifecycle);
        }
        let result = self
            .store
            .update_one(Collection::DeliveryReceipts, &filter, set, false)
            .await?;
        if result.matched > 0 {
            debug!(message_id = %message_id, "Run receipt merged into earlier status callback");
        }
        Ok(result.matched_id)
    }

    pub async fn receipts_for_campaign(
        &self,
        campaign_id: &str,
    ) -> CampaignResult<Vec<DeliveryReceipt>> {
        self.receipts(&Filter::new().eq("campaign_id", campaign_id)).await
    }

    pub async fn receipt_by_provider_id(
        &self,
        message_id: &str,
    ) -> CampaignResult<Option<DeliveryReceipt>> {
        self.find_typed(
            Collection::DeliveryReceipts,
            &Filter::new().eq("provider_message_id", message_id),
        )
        .await
    }

    async fn receipts(&self, filter: &Filter) -> CampaignResult<Vec<DeliveryReceipt>> {
        self.store
            .find_many(Collection::DeliveryReceipts, filter)
            .await?
            .into_iter()
            .map(|d| decode(Value::Object(d)))
            .collect()
    }

    /// Apply a provider status callback to the receipt with the same
    /// provider message id, creating a record if none exists yet.
    pub async fn upsert_status(
        &self,
        callback: &StatusCallback,
        now: DateTime<Utc>,
    ) -> CampaignResult<UpsertOutcome> {
        let status = DeliveryStatus::from_provider(&callback.status);
        let filter = Filter::new().eq("provider_message_id", callback.message_id.as_str());
        let set = fields(json!({
            "status": status,
            "error_code": callback.error_code,
            "raw_payload": callback.raw_payload,
            "updated_at": now,
        }));

        let mut result = self
            .store
            .update_one(Collection::DeliveryReceipts, &filter, set.clone(), false)
            .await?;
        if result.matched == 0 {
            let mut seed = set.clone();
            seed.insert("timestamp".into(), json!(now));
            result = match self
                .store
                .update_one(Collection::DeliveryReceipts, &filter, seed, true)
                .await
            {
                // Another writer created the record first; apply on top of it.
                Err(StoreError::DuplicateKey { .. }) => {
                    self.store
                        .update_one(Collection::DeliveryReceipts, &filter, set, false)
                        .await?
                }
                other => other?,
            };
        }

        debug!(
            message_id = %callback.message_id,
            status = %status.as_str(),
            matched = result.matched,
            "Receipt status reconciled"
        );
        Ok(if result.matched > 0 {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        })
    }

    // ─── Inbound events & stats ────────────────────────────────────────────

    pub async fn insert_inbound_event(&self, event: &InboundEvent) -> CampaignResult<String> {
        Ok(self
            .store
            .insert_one(Collection::InboundEvents, to_document(event)?)
            .await?)
    }

    pub async fn count_users(&self, consent: Option<ConsentState>) -> CampaignResult<u64> {
        let filter = match consent {
            Some(state) => Filter::new().eq("consent_state", state.as_str()),
            None => Filter::new(),
        };
        Ok(self.store.count(Collection::Users, &filter).await?)
    }

    /// Receipts written by campaign runs, optionally narrowed to one
    /// decision. Records created only by status callbacks are not counted.
    pub async fn count_receipts(&self, decision: Option<Decision>) -> CampaignResult<u64> {
        let receipts = Collection::DeliveryReceipts;
        match decision {
            Some(decision) => {
                let filter = Filter::new().eq("decision", decision.as_str());
                Ok(self.store.count(receipts, &filter).await?)
            }
            None => {
                let all = self.store.count(receipts, &Filter::new()).await?;
                let undecided = Filter::new().eq("decision", Value::Null);
                let callback_only = self.store.count(receipts, &undecided).await?;
                Ok(all.saturating_sub(callback_only))
            }
        }
    }
}

fn fields(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}
