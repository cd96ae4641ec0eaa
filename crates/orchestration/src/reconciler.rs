use campaign_core::types::StatusCallback;
use campaign_core::{CampaignResult, Clock};
use campaign_store::{Repository, UpsertOutcome};
use std::sync::Arc;
use tracing::info;

/// Applies provider status callbacks to delivery receipts.
///
/// Callbacks may arrive before the receipt of the send they describe, so
/// an unknown message id creates a record. Callbacks for one id are
/// applied in arrival order; the last one wins.
#[derive(Clone)]
pub struct StatusReconciler {
    repo: Repository,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for StatusReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusReconciler").finish_non_exhaustive()
    }
}

impl StatusReconciler {
    pub fn new(repo: Repository, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    pub async fn reconcile(&self, callback: &StatusCallback) -> CampaignResult<UpsertOutcome> {
        let outcome = self.repo.upsert_status(callback, self.clock.now_utc()).await?;
        metrics::counter!(
            "status_callbacks",
            "status" => callback.status.to_ascii_lowercase()
        )
        .increment(1);
        info!(
            message_id = %callback.message_id,
            status = %callback.status,
            error_code = ?callback.error_code,
            outcome = ?outcome,
            "Status callback reconciled"
        );
        Ok(outcome)
    }
}
