//! Shop access token commands.
//!
//! Normally tokens arrive through the OAuth callback; these commands cover
//! custom-app installs and cleanup.

use delivery_dates_server::services::TokenStore;

use super::CommandError;

/// Store `token` for `shop`.
///
/// # Errors
///
/// Returns `CommandError` if the shop is invalid or the write fails.
pub async fn set(shop: &str, token: &str, scopes: &str) -> Result<(), CommandError> {
    let shop = super::parse_shop(shop)?;
    let scopes: Vec<String> = scopes
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    let store = TokenStore::new(super::kv().await?);
    store.save(&shop, token, scopes).await?;

    tracing::info!("Token stored for {}", shop);
    Ok(())
}

/// Remove the token for `shop`.
///
/// # Errors
///
/// Returns `CommandError::NotFound` if no token was stored.
pub async fn delete(shop: &str) -> Result<(), CommandError> {
    let shop = super::parse_shop(shop)?;
    let store = TokenStore::new(super::kv().await?);

    if !store.delete(&shop).await? {
        return Err(CommandError::NotFound(format!("token for {shop}")));
    }

    tracing::info!("Token removed for {}", shop);
    Ok(())
}

/// List shops with a stored token.
///
/// # Errors
///
/// Returns `CommandError` if listing fails.
pub async fn list() -> Result<(), CommandError> {
    let store = TokenStore::new(super::kv().await?);
    let shops = store.list_shops().await?;

    tracing::info!("{} shop(s) installed", shops.len());
    for shop in shops {
        if let Some(token) = store.get(&shop).await? {
            tracing::info!(
                "  {} (scopes: {}, installed {})",
                shop,
                token.scopes.join(","),
                token.installed_at.format("%Y-%m-%d %H:%M")
            );
        }
    }
    Ok(())
}
