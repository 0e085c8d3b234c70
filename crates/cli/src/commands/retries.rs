//! Retry queue commands.

use chrono::Utc;

use delivery_dates_server::services::scheduled_retries;

use super::CommandError;

/// Process every retry due now, once.
///
/// # Errors
///
/// Returns `CommandError` if storage fails mid-sweep.
pub async fn run() -> Result<(), CommandError> {
    let state = super::app_state().await?;
    let sweep = state.pipeline().process_due_retries(Utc::now()).await?;

    tracing::info!(
        "Processed {} retries: {} succeeded, {} requeued, {} dead-lettered",
        sweep.processed,
        sweep.succeeded,
        sweep.requeued,
        sweep.dead_lettered
    );
    Ok(())
}

/// Show up to `limit` scheduled retries.
///
/// # Errors
///
/// Returns `CommandError` if storage cannot be read.
pub async fn list(limit: usize) -> Result<(), CommandError> {
    let kv = super::kv().await?;
    let retries = scheduled_retries(kv.as_ref(), limit).await?;

    tracing::info!("{} retries scheduled", retries.len());
    for retry in retries {
        tracing::info!(
            "  {} order {}  attempt {} at {} ({}): {}",
            retry.job.shop,
            retry.job.order_id,
            retry.attempts,
            retry.next_attempt_at.format("%Y-%m-%d %H:%M:%S"),
            retry.category,
            retry.reason
        );
    }
    Ok(())
}
