//! Dead-letter queue commands.

use delivery_dates_server::kv::keys;
use delivery_dates_server::services::dead_letters;

use super::CommandError;

/// Print up to `limit` dead letters, oldest first.
///
/// # Errors
///
/// Returns `CommandError` if storage cannot be read.
pub async fn list(limit: usize) -> Result<(), CommandError> {
    let kv = super::kv().await?;
    let letters = dead_letters(kv.as_ref(), limit).await?;

    tracing::info!("{} dead letter(s)", letters.len());
    for entry in letters {
        tracing::info!(
            "  {}  {} order {}  [{} / {}] after {} attempt(s): {}",
            entry.id,
            entry.job.shop,
            entry.job.order_id,
            entry.category,
            entry.severity,
            entry.attempts,
            entry.error
        );
    }
    Ok(())
}

/// Replay one dead letter through the pipeline.
///
/// # Errors
///
/// Returns `CommandError::NotFound` for an unknown id.
pub async fn replay(id: &str) -> Result<(), CommandError> {
    let state = super::app_state().await?;
    let outcome = state
        .pipeline()
        .replay_dead_letter(id)
        .await?
        .ok_or_else(|| CommandError::NotFound(format!("dead letter {id}")))?;

    tracing::info!(
        "Replayed {}: {}",
        id,
        serde_json::to_string(&outcome).unwrap_or_default()
    );
    Ok(())
}

/// Delete one dead letter.
///
/// # Errors
///
/// Returns `CommandError::NotFound` for an unknown id.
pub async fn discard(id: &str) -> Result<(), CommandError> {
    let kv = super::kv().await?;
    if !kv.delete(&keys::dlq(id)).await? {
        return Err(CommandError::NotFound(format!("dead letter {id}")));
    }

    tracing::info!("Discarded {}", id);
    Ok(())
}
