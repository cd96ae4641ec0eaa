use campaign_core::types::{ConsentState, Decision, DeliveryStats};
use campaign_core::CampaignResult;
use campaign_store::Repository;

/// Dashboard counters over users and run receipts. Sent and failed follow
/// the run's decision, so later status callbacks do not move them.
/// Percentages are relative to all run receipts and rounded to two decimals.
pub async fn delivery_stats(repo: &Repository) -> CampaignResult<DeliveryStats> {
    let total_users = repo.count_users(None).await?;
    let opt_outs = repo.count_users(Some(ConsentState::Stopped)).await?;
    let total_receipts = repo.count_receipts(None).await?;
    let sent = repo.count_receipts(Some(Decision::Sent)).await?;
    let failed = repo.count_receipts(Some(Decision::Failed)).await?;

    Ok(DeliveryStats {
        total_users,
        opt_outs,
        sent,
        failed,
        delivery_pct: percentage(sent, total_receipts),
        failed_pct: percentage(failed, total_receipts),
    })
}

fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = part as f64 / total as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}
