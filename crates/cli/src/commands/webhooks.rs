//! Webhook subscription commands.

use delivery_dates_server::shopify::{WEBHOOK_TOPICS, WebhookRegistration};

use super::CommandError;

/// Register every webhook topic for `shop` using its stored token.
///
/// # Errors
///
/// Returns `CommandError::NotFound` if the shop has no token, or the first
/// Shopify error encountered.
pub async fn register(shop: &str) -> Result<(), CommandError> {
    let shop = super::parse_shop(shop)?;
    let state = super::app_state().await?;

    let token = state
        .tokens()
        .get(&shop)
        .await?
        .ok_or_else(|| CommandError::NotFound(format!("token for {shop}")))?;

    for &topic in WEBHOOK_TOPICS {
        let callback_url = state.config().webhook_callback_url(topic);
        match state
            .shopify()
            .register_webhook(&shop, &token.access_token, topic, &callback_url)
            .await?
        {
            WebhookRegistration::Created { id } => {
                tracing::info!("Registered {} -> {} ({})", topic, callback_url, id);
            }
            WebhookRegistration::AlreadyRegistered => {
                tracing::info!("Already registered {} -> {}", topic, callback_url);
            }
        }
    }
    Ok(())
}
