use campaign_core::types::DeliveryReceipt;
use campaign_store::Repository;
use tracing::{debug, error};

/// Appends one delivery receipt per recipient outcome.
#[derive(Debug, Clone)]
pub struct ReceiptRecorder {
    repo: Repository,
}

impl ReceiptRecorder {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Insert `receipt`. A failed write is logged and counted; it never
    /// interrupts the run. Returns whether the receipt was stored.
    pub async fn record(&self, receipt: &DeliveryReceipt) -> bool {
        let decision = receipt.decision.map(|d| d.as_str()).unwrap_or("NONE");
        match self.repo.insert_receipt(receipt).await {
            Ok(id) => {
                metrics::counter!("campaign.receipts", "decision" => decision).increment(1);
                debug!(
                    receipt_id = %id,
                    user_id = ?receipt.user_id,
                    decision,
                    reason = ?receipt.reason,
                    "Receipt recorded"
                );
                true
            }
            Err(e) => {
                metrics::counter!("campaign.receipt_write_failures").increment(1);
                error!(
                    user_id = ?receipt.user_id,
                    decision,
                    error = %e,
                    "Failed to record delivery receipt"
                );
                false
            }
        }
    }
}
